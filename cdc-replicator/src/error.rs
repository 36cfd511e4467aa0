use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use cdc::error::CdcError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Backtrace captured when an infrastructure error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

/// Error type for the replicator service.
///
/// Wraps [`CdcError`] for pipeline failures and adds variants for the failures of the
/// process around it.
pub enum ReplicatorError {
    /// Pipeline failure.
    Cdc(CdcError),
    /// Loading, parsing or validating configuration failed.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O failure, such as building the runtime or binding the health server.
    Io(std::io::Error, CapturedBacktrace),
}

impl ReplicatorError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Cdc(_) => "pipeline error",
            ReplicatorError::Config(_, _) => "configuration error",
            ReplicatorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            // Already part of the pipeline error's own message.
            ReplicatorError::Cdc(_) => None,
            ReplicatorError::Config(_, backtrace) | ReplicatorError::Io(_, backtrace) => {
                Some(&backtrace.0)
            }
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report for terminal output, with the chain of causes and, when
    /// `RUST_BACKTRACE` is set, the backtrace.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ReplicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicatorError::Cdc(err) => write!(f, "{err}"),
            ReplicatorError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReplicatorError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

// `main` returns this error, and the standard library prints it with `Debug`.
impl fmt::Debug for ReplicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_report())
    }
}

impl Error for ReplicatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplicatorError::Cdc(err) => err.source(),
            ReplicatorError::Config(source, _) => Some(source.as_ref()),
            ReplicatorError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ReplicatorError {
    fn from(err: std::io::Error) -> Self {
        ReplicatorError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<CdcError> for ReplicatorError {
    fn from(err: CdcError) -> Self {
        ReplicatorError::Cdc(err)
    }
}

#[cfg(test)]
mod tests {
    use cdc::error::ErrorKind;
    use cdc_config::shared::ValidationError;

    use super::*;

    #[test]
    fn report_names_category_and_causes() {
        let err = ReplicatorError::config(ValidationError::NoSinks);

        let report = err.render_report();

        assert!(report.starts_with("replicator failed\n"));
        assert!(report.contains("category: configuration error\n"));
        assert!(report.contains(&format!("cause 1: {}", ValidationError::NoSinks)));
    }

    #[test]
    fn pipeline_errors_keep_their_message() {
        let err = ReplicatorError::from(CdcError::from((
            ErrorKind::SinkConnectionFailed,
            "Failed to connect to sink",
        )));

        assert_eq!(err.category(), "pipeline error");
        assert!(err.to_string().contains("Failed to connect to sink"));
    }
}
