use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};

/// Owns every task spawned by a running pipeline.
///
/// Tasks are named so failures can be attributed in logs. [`TaskScope::join_all`] waits for all
/// of them and aggregates their errors; panics surface as [`ErrorKind::WorkerPanic`].
#[derive(Debug, Default)]
pub struct TaskScope {
    join_set: JoinSet<(String, CdcResult<()>)>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self {
            join_set: JoinSet::new(),
        }
    }

    /// Spawns a named task into the scope.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = CdcResult<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "spawning task");

        self.join_set.spawn(async move {
            let result = future.await;
            (name, result)
        });
    }

    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Waits until every task has finished.
    ///
    /// All tasks are awaited even if some fail; the errors of every failed task are returned
    /// together.
    pub async fn join_all(mut self) -> CdcResult<()> {
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((name, Ok(()))) => {
                    debug!(task = %name, "task completed");
                }
                Ok((name, Err(err))) => {
                    error!(task = %name, error = %err, "task completed with error");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("task was cancelled");
                    } else {
                        error!(error = %join_err, "task panicked");
                        errors.push(cdc_error!(
                            ErrorKind::WorkerPanic,
                            "Pipeline task panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
