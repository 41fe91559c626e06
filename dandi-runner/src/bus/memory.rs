// In-process bus: channel subscriptions dispatched by direct call, for
// setups where caller and runner share one process (tests, embedders).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::RunnerResult;

use super::{
    BusConnector, BusEnvelope, ConnectionHandle, EnvelopeCallback, HealthStatus, PublishReceipt,
};

#[derive(Default)]
pub struct InProcessBusConnector {
    subscriptions: RwLock<HashMap<String, EnvelopeCallback>>,
}

impl InProcessBusConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BusConnector for InProcessBusConnector {
    async fn connect(&self) -> RunnerResult<ConnectionHandle> {
        Ok(ConnectionHandle {
            id: Uuid::new_v4().to_string(),
            endpoint: "in-process".to_string(),
        })
    }

    async fn disconnect(&self, _handle: &ConnectionHandle) -> RunnerResult<()> {
        self.subscriptions.write().await.clear();
        Ok(())
    }

    async fn subscribe(
        &self,
        _handle: &ConnectionHandle,
        channel: &str,
        callback: EnvelopeCallback,
    ) -> RunnerResult<()> {
        self.subscriptions
            .write()
            .await
            .insert(channel.to_string(), callback);
        Ok(())
    }

    async fn publish(
        &self,
        _handle: &ConnectionHandle,
        channel: &str,
        payload: Value,
    ) -> RunnerResult<PublishReceipt> {
        let callback = self.subscriptions.read().await.get(channel).cloned();
        let message_id = Uuid::new_v4().to_string();
        match callback {
            Some(callback) => {
                let envelope = BusEnvelope {
                    id: message_id.clone(),
                    channel: channel.to_string(),
                    payload,
                    timestamp: Utc::now().to_rfc3339(),
                };
                callback(envelope).await?;
            }
            None => debug!("no subscriber for channel {}", channel),
        }
        Ok(PublishReceipt {
            message_id: Some(message_id),
        })
    }

    async fn health(&self, _handle: &ConnectionHandle) -> RunnerResult<HealthStatus> {
        Ok(HealthStatus {
            ok: true,
            details: Some("in-process bus".to_string()),
        })
    }
}
