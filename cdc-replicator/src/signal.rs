#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Process signals that stop the replicator.
///
/// SIGTERM and SIGQUIT handlers are installed on registration, so those signals are not lost
/// while the pipeline is still starting.
pub struct TerminationSignals {
    #[cfg(unix)]
    sigterm: Signal,
    #[cfg(unix)]
    sigquit: Signal,
}

impl TerminationSignals {
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next termination signal and returns its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "sigint",
            _ = self.sigterm.recv() => "sigterm",
            _ = self.sigquit.recv() => "sigquit",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
