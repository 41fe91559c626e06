// Caller-side client for the job protocol. Submits scripts over the bus
// and correlates out-of-order responses by job id.
//
// Contract: wait up to the admission timeout for `accepted`; treat a
// timeout as runner-offline and fail locally without retry. Once
// accepted, wait indefinitely for the terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BusConnector, ConnectionHandle, EnvelopeCallback};
use crate::error::{RunnerError, RunnerResult};
use crate::protocol::{JobResponse, JobStatus, JOB_MESSAGE_TYPE};

struct PendingJob {
    accepted_tx: Option<oneshot::Sender<()>>,
    result_tx: Option<oneshot::Sender<Result<String, RunnerError>>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingJob>>>;

pub struct JobClient {
    connector: Arc<dyn BusConnector>,
    handle: ConnectionHandle,
    job_channel: String,
    admission_timeout: Duration,
    pending: PendingMap,
}

impl JobClient {
    /// Connects the response-channel subscription. The handle must come
    /// from the same connector.
    pub async fn new(
        connector: Arc<dyn BusConnector>,
        handle: ConnectionHandle,
        job_channel: impl Into<String>,
        response_channel: &str,
        admission_timeout: Duration,
    ) -> RunnerResult<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let subscription_pending = pending.clone();
        let callback: EnvelopeCallback = Arc::new(move |envelope| {
            let pending = subscription_pending.clone();
            Box::pin(async move {
                match serde_json::from_value::<JobResponse>(envelope.payload) {
                    Ok(response) => handle_response(&pending, response),
                    Err(_) => warn!("[Client] dropping invalid response message"),
                }
                Ok(())
            })
        });
        connector
            .subscribe(&handle, response_channel, callback)
            .await?;

        Ok(JobClient {
            connector,
            handle,
            job_channel: job_channel.into(),
            admission_timeout,
            pending,
        })
    }

    /// Submit a script and wait for its output.
    pub async fn execute_script(&self, script: &str) -> RunnerResult<String> {
        let job_id = Uuid::new_v4().simple().to_string();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| RunnerError::Bus("pending jobs poisoned".to_string()))?;
            pending.insert(
                job_id.clone(),
                PendingJob {
                    accepted_tx: Some(accepted_tx),
                    result_tx: Some(result_tx),
                },
            );
        }

        let payload = json!({
            "jobId": job_id,
            "script": script,
            "type": JOB_MESSAGE_TYPE,
        });
        if let Err(e) = self
            .connector
            .publish(&self.handle, &self.job_channel, payload)
            .await
        {
            self.forget(&job_id);
            return Err(e);
        }

        if timeout(self.admission_timeout, accepted_rx).await.is_err() {
            self.forget(&job_id);
            return Err(RunnerError::RunnerOffline);
        }

        // accepted; wait indefinitely for the terminal response
        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Bus("response subscription dropped".to_string())),
        }
    }

    fn forget(&self, job_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(job_id);
        }
    }
}

fn handle_response(pending: &PendingMap, response: JobResponse) {
    let Ok(mut pending) = pending.lock() else {
        return;
    };
    let Some(entry) = pending.get_mut(&response.job_id) else {
        warn!("[Client] response for unknown job {}", response.job_id);
        return;
    };
    match response.status {
        JobStatus::Accepted => {
            if let Some(tx) = entry.accepted_tx.take() {
                let _ = tx.send(());
            }
        }
        JobStatus::Completed => {
            if let Some(tx) = entry.result_tx.take() {
                let output = response.output.unwrap_or_else(|| "no output".to_string());
                let _ = tx.send(Ok(output));
            }
            pending.remove(&response.job_id);
        }
        JobStatus::Rejected | JobStatus::Error => {
            if let Some(tx) = entry.result_tx.take() {
                let message = response.error.unwrap_or_else(|| "Job failed".to_string());
                let _ = tx.send(Err(RunnerError::JobFailed(message)));
            }
            pending.remove(&response.job_id);
        }
    }
}
