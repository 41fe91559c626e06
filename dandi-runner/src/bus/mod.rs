// Message bus abstraction. The runner subscribes to one job channel and
// publishes to one response channel; everything else about the transport
// lives behind this trait.

pub mod memory;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunnerResult;

pub use memory::InProcessBusConnector;
pub use webhook::{WebhookBusConfig, WebhookBusConnector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub id: String,
    pub channel: String,
    pub payload: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub id: String,
    pub endpoint: String,
}

pub type EnvelopeCallback = Arc<
    dyn Fn(BusEnvelope) -> futures::future::BoxFuture<'static, RunnerResult<()>> + Send + Sync,
>;

#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> RunnerResult<ConnectionHandle>;
    async fn disconnect(&self, handle: &ConnectionHandle) -> RunnerResult<()>;
    /// Register the subscriber for a channel. At most one subscriber per
    /// channel; a second registration replaces the first.
    async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        channel: &str,
        callback: EnvelopeCallback,
    ) -> RunnerResult<()>;
    async fn publish(
        &self,
        handle: &ConnectionHandle,
        channel: &str,
        payload: Value,
    ) -> RunnerResult<PublishReceipt>;
    async fn health(&self, handle: &ConnectionHandle) -> RunnerResult<HealthStatus>;
}
