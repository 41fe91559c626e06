// Reliable response delivery: bounded retries with exponential backoff.
//
// Retries exist for response delivery only. Job execution and remote
// dataset calls are never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::bus::{BusConnector, ConnectionHandle};
use crate::config::RetryConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::protocol::JobResponse;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(2_000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }
}

pub struct ResponsePublisher {
    connector: Arc<dyn BusConnector>,
    handle: ConnectionHandle,
    channel: String,
    policy: RetryPolicy,
}

impl ResponsePublisher {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        handle: ConnectionHandle,
        channel: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        ResponsePublisher {
            connector,
            handle,
            channel: channel.into(),
            policy,
        }
    }

    /// Deliver one response. The delay doubles after every failed
    /// attempt; there is no delay after the final one.
    pub async fn publish(&self, response: &JobResponse) -> RunnerResult<()> {
        let payload = serde_json::to_value(response)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.base_delay;
        for attempt in 1..=max_attempts {
            match self
                .connector
                .publish(&self.handle, &self.channel, payload.clone())
                .await
            {
                Ok(_) => {
                    debug!(
                        "published {:?} response for job {}",
                        response.status, response.job_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "[Publisher] attempt {}/{} failed for job {}: {}",
                        attempt, max_attempts, response.job_id, e
                    );
                    if attempt < max_attempts {
                        sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(RunnerError::DeliveryExhausted {
            job_id: response.job_id.clone(),
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EnvelopeCallback, HealthStatus, PublishReceipt};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Connector that fails the first `failures` publish attempts, then
    /// succeeds, recording every delivered payload.
    struct FlakyConnector {
        failures: AtomicU32,
        delivered: Mutex<Vec<Value>>,
    }

    impl FlakyConnector {
        fn failing(failures: u32) -> Self {
            FlakyConnector {
                failures: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BusConnector for FlakyConnector {
        async fn connect(&self) -> RunnerResult<ConnectionHandle> {
            Ok(ConnectionHandle {
                id: "flaky".to_string(),
                endpoint: "test".to_string(),
            })
        }

        async fn disconnect(&self, _handle: &ConnectionHandle) -> RunnerResult<()> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _handle: &ConnectionHandle,
            _channel: &str,
            _callback: EnvelopeCallback,
        ) -> RunnerResult<()> {
            Ok(())
        }

        async fn publish(
            &self,
            _handle: &ConnectionHandle,
            _channel: &str,
            payload: Value,
        ) -> RunnerResult<PublishReceipt> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RunnerError::Bus("relay unavailable".to_string()));
            }
            self.delivered.lock().unwrap().push(payload);
            Ok(PublishReceipt { message_id: None })
        }

        async fn health(&self, _handle: &ConnectionHandle) -> RunnerResult<HealthStatus> {
            Ok(HealthStatus {
                ok: true,
                details: None,
            })
        }
    }

    fn publisher(connector: Arc<FlakyConnector>) -> ResponsePublisher {
        ResponsePublisher::new(
            connector,
            ConnectionHandle {
                id: "c".to_string(),
                endpoint: "test".to_string(),
            },
            "responses",
            RetryPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_succeeds() {
        let connector = Arc::new(FlakyConnector::failing(3));
        let publisher = publisher(connector.clone());
        let started = Instant::now();
        publisher
            .publish(&JobResponse::accepted("a1"))
            .await
            .unwrap();
        // 2000 + 4000 + 8000 ms of backoff before the 4th attempt lands
        assert_eq!(started.elapsed(), Duration::from_millis(14_000));
        assert_eq!(connector.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_raise_delivery_error() {
        let connector = Arc::new(FlakyConnector::failing(4));
        let publisher = publisher(connector.clone());
        let started = Instant::now();
        let err = publisher
            .publish(&JobResponse::accepted("a1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::DeliveryExhausted { attempts: 4, .. }
        ));
        // no delay after the final attempt
        assert_eq!(started.elapsed(), Duration::from_millis(14_000));
        assert!(connector.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_is_immediate() {
        let connector = Arc::new(FlakyConnector::failing(0));
        let publisher = publisher(connector.clone());
        let started = Instant::now();
        publisher
            .publish(&JobResponse::completed("a1", "hi\n".to_string()))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
