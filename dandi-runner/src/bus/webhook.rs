// Webhook-backed bus connector: an axum listener receives inbound channel
// messages as POSTs from the bus relay, and outbound publishes are POSTed
// back to the relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::post, Router};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{RunnerError, RunnerResult};

use super::{
    BusConnector, BusEnvelope, ConnectionHandle, EnvelopeCallback, HealthStatus, PublishReceipt,
};

pub const BUS_SECRET_HEADER: &str = "x-runner-bus-secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBusConfig {
    pub bind_addr: String,
    pub shared_secret: String,
    /// Relay endpoint outbound messages are POSTed to; publishing fails
    /// when unset.
    pub relay_url: Option<String>,
}

struct WebhookBusState {
    config: WebhookBusConfig,
    subscriptions: RwLock<HashMap<String, EnvelopeCallback>>,
}

#[derive(Clone)]
pub struct WebhookBusConnector {
    state: Arc<WebhookBusState>,
    client: Client,
    server_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl WebhookBusConnector {
    pub fn new(config: WebhookBusConfig) -> Self {
        WebhookBusConnector {
            state: Arc::new(WebhookBusState {
                config,
                subscriptions: RwLock::new(HashMap::new()),
            }),
            client: Client::new(),
            server_handle: Arc::new(Mutex::new(None)),
            shutdown_tx: Arc::new(Mutex::new(None)),
        }
    }

    async fn start_server(&self) -> RunnerResult<()> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let mut guard = self.shutdown_tx.lock().await;
        *guard = Some(shutdown_tx);
        drop(guard);

        let state = self.state.clone();
        let router = Router::new()
            .route("/bus/inbound", post(inbound_handler))
            .with_state(state);

        let addr: SocketAddr = self
            .state
            .config
            .bind_addr
            .parse()
            .map_err(|_| RunnerError::Bus("invalid bind_addr".to_string()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RunnerError::Bus(format!("failed to bind listener: {}", e)))?;
        let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
            async move {
                let _ = shutdown_rx.await;
            },
        );

        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        let mut handle_guard = self.server_handle.lock().await;
        *handle_guard = Some(handle);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BusConnector for WebhookBusConnector {
    async fn connect(&self) -> RunnerResult<ConnectionHandle> {
        self.start_server().await?;
        Ok(ConnectionHandle {
            id: Uuid::new_v4().to_string(),
            endpoint: self.state.config.bind_addr.clone(),
        })
    }

    async fn disconnect(&self, _handle: &ConnectionHandle) -> RunnerResult<()> {
        let mut guard = self.shutdown_tx.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _handle: &ConnectionHandle,
        channel: &str,
        callback: EnvelopeCallback,
    ) -> RunnerResult<()> {
        let mut guard = self.state.subscriptions.write().await;
        guard.insert(channel.to_string(), callback);
        Ok(())
    }

    async fn publish(
        &self,
        _handle: &ConnectionHandle,
        channel: &str,
        payload: serde_json::Value,
    ) -> RunnerResult<PublishReceipt> {
        let Some(relay_url) = &self.state.config.relay_url else {
            return Err(RunnerError::Bus("relay_url not configured".to_string()));
        };

        let body = OutboundMessage {
            channel: channel.to_string(),
            message: payload,
        };
        let resp = self
            .client
            .post(relay_url)
            .header(BUS_SECRET_HEADER, self.state.config.shared_secret.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::Bus(format!("outbound publish failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(RunnerError::Bus(format!(
                "relay returned status {}",
                resp.status()
            )));
        }

        Ok(PublishReceipt {
            message_id: Some(Uuid::new_v4().to_string()),
        })
    }

    async fn health(&self, _handle: &ConnectionHandle) -> RunnerResult<HealthStatus> {
        let subscriptions = self.state.subscriptions.read().await.len();
        Ok(HealthStatus {
            ok: true,
            details: Some(format!("{} channel subscription(s)", subscriptions)),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OutboundMessage {
    channel: String,
    message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InboundPayload {
    channel: String,
    message: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct InboundResponse {
    accepted: bool,
    message_id: Option<String>,
    error: Option<String>,
}

async fn inbound_handler(
    State(state): State<Arc<WebhookBusState>>,
    headers: HeaderMap,
    Json(payload): Json<InboundPayload>,
) -> impl IntoResponse {
    let secret = headers
        .get(BUS_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if secret != state.config.shared_secret {
        return (
            StatusCode::UNAUTHORIZED,
            Json(InboundResponse {
                accepted: false,
                message_id: None,
                error: Some("unauthorized".to_string()),
            }),
        );
    }

    let callback = state.subscriptions.read().await.get(&payload.channel).cloned();
    let Some(callback) = callback else {
        // Messages on channels nobody listens to are dropped, as on any
        // pub/sub bus.
        debug!("no subscriber for channel {}", payload.channel);
        return (
            StatusCode::OK,
            Json(InboundResponse {
                accepted: false,
                message_id: None,
                error: None,
            }),
        );
    };

    let message_id = Uuid::new_v4().to_string();
    let envelope = BusEnvelope {
        id: message_id.clone(),
        channel: payload.channel,
        payload: payload.message,
        timestamp: Utc::now().to_rfc3339(),
    };

    if let Err(e) = callback(envelope).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(InboundResponse {
                accepted: false,
                message_id: None,
                error: Some(format!("subscriber error: {}", e)),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(InboundResponse {
            accepted: true,
            message_id: Some(message_id),
            error: None,
        }),
    )
}
