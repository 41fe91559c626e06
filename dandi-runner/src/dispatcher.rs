// Job dispatcher: admission control, execution, and status reporting.
//
// Per-job state machine:
//
//   Received -> Rejected
//            -> Accepted -> Completed | Errored
//
// Terminal states are final; every admitted job produces exactly one
// terminal response. There is no cancellation and no execution timeout --
// a hung script holds its admission slot until process restart.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::bus::{BusConnector, BusEnvelope, ConnectionHandle, EnvelopeCallback};
use crate::config::LimitsConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::protocol::{parse_job, JobRequest, JobResponse};
use crate::publisher::ResponsePublisher;

/// Seam between dispatch and script execution, so tests can drive the
/// dispatcher with controllable executors.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        job: &JobRequest,
        events: mpsc::UnboundedSender<String>,
    ) -> RunnerResult<String>;
}

pub const OUTPUT_TRUNCATION_MARKER: &str = "... [output truncated]";

#[derive(Clone)]
pub struct JobDispatcher {
    executor: Arc<dyn JobExecutor>,
    publisher: Arc<ResponsePublisher>,
    permits: Arc<Semaphore>,
    max_output_chars: usize,
}

impl JobDispatcher {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        publisher: Arc<ResponsePublisher>,
        limits: &LimitsConfig,
    ) -> Self {
        JobDispatcher {
            executor,
            publisher,
            permits: Arc::new(Semaphore::new(limits.max_concurrent_jobs)),
            max_output_chars: limits.max_output_chars,
        }
    }

    /// Subscribe this dispatcher to the job channel.
    pub async fn start(
        &self,
        connector: &Arc<dyn BusConnector>,
        handle: &ConnectionHandle,
        job_channel: &str,
    ) -> RunnerResult<()> {
        let dispatcher = self.clone();
        let callback: EnvelopeCallback = Arc::new(move |envelope| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                dispatcher.handle_envelope(envelope).await;
                Ok(())
            })
        });
        connector.subscribe(handle, job_channel, callback).await?;
        info!("[Dispatcher] listening on channel {}", job_channel);
        Ok(())
    }

    /// Validate an inbound payload; anything malformed is logged and
    /// dropped without a response to either party.
    pub async fn handle_envelope(&self, envelope: BusEnvelope) {
        match parse_job(&envelope.payload) {
            Some(job) => self.handle_job(job).await,
            None => {
                warn!(
                    "[Dispatcher] dropping invalid message on channel {}",
                    envelope.channel
                );
            }
        }
    }

    pub async fn handle_job(&self, job: JobRequest) {
        info!(
            "[Dispatcher] processing job {} ({} slot(s) free)",
            job.job_id,
            self.permits.available_permits()
        );
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                info!(
                    "[Dispatcher] maximum concurrent jobs reached, rejecting job {}",
                    job.job_id
                );
                let response = JobResponse::rejected(
                    &job.job_id,
                    RunnerError::CapacityExceeded.to_string(),
                );
                if let Err(e) = self.publisher.publish(&response).await {
                    error!(
                        "[Dispatcher] failed to send rejection for job {}: {}",
                        job.job_id, e
                    );
                }
                return;
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&JobResponse::accepted(&job.job_id))
            .await
        {
            // The caller will most likely give up waiting; the job still
            // runs and its terminal response is still attempted.
            error!(
                "[Dispatcher] failed to send acceptance for job {}: {}",
                job.job_id, e
            );
        }

        let executor = self.executor.clone();
        let publisher = self.publisher.clone();
        let max_output_chars = self.max_output_chars;
        tokio::spawn(async move {
            // Owning the permit here guarantees release on every exit
            // path of the execution task.
            let _permit = permit;

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let status_job_id = job.job_id.clone();
            let status_logger = tokio::spawn(async move {
                while let Some(message) = events_rx.recv().await {
                    info!("[Dispatcher] job {} status: {}", status_job_id, message);
                }
            });

            let response = match executor.execute(&job, events_tx).await {
                Ok(output) => {
                    info!("[Dispatcher] job {} completed", job.job_id);
                    JobResponse::completed(&job.job_id, truncate_output(output, max_output_chars))
                }
                Err(e) => {
                    info!("[Dispatcher] job {} failed: {}", job.job_id, e);
                    JobResponse::error(&job.job_id, e.to_string())
                }
            };
            if let Err(e) = publisher.publish(&response).await {
                // The work already ran; its outcome is lost to the
                // caller. Known limitation of the protocol.
                error!(
                    "[Dispatcher] failed to send terminal response for job {}: {}",
                    job.job_id, e
                );
            }
            let _ = status_logger.await;
        });
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Cap output at `max_chars` characters, appending a fixed marker when
/// anything was dropped.
fn truncate_output(output: String, max_chars: usize) -> String {
    if output.chars().count() <= max_chars {
        return output;
    }
    let kept: String = output.chars().take(max_chars).collect();
    format!("{}{}", kept, OUTPUT_TRUNCATION_MARKER)
}
