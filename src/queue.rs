use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Background jobs run on the runtime, at most `max_concurrency` at a time.
#[derive(Debug, Clone)]
pub struct JobQueue {
    semaphore: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Queues `job` and returns its id; the outcome is only logged.
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> uuid::Uuid
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = uuid::Uuid::new_v4();
        let label = label.into();
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::warn!(job_id = %id, label = %label, "queue closed; job dropped");
                return;
            };
            tracing::info!(job_id = %id, label = %label, "job started");
            match job.await {
                Ok(()) => tracing::info!(job_id = %id, label = %label, "job finished"),
                Err(err) => {
                    tracing::error!(job_id = %id, label = %label, error = %format!("{err:#}"), "job failed")
                }
            }
        });
        id
    }
}
