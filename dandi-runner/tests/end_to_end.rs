// End-to-end: caller -> bus -> dispatcher -> sandbox -> publisher ->
// caller, all over the in-process bus.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use dandi_runner::bus::{
    BusConnector, ConnectionHandle, EnvelopeCallback, HealthStatus, InProcessBusConnector,
    PublishReceipt,
};
use dandi_runner::cache::DiskCache;
use dandi_runner::config::{ApiConfig, LimitsConfig};
use dandi_runner::dandi::{DandiApiClient, DandiInterface, SnapshotStore};
use dandi_runner::error::{RunnerError, RunnerResult};
use dandi_runner::publisher::RetryPolicy;
use dandi_runner::{JobClient, JobDispatcher, ResponsePublisher, SandboxExecutor};

/// Pass-through connector that records every published payload, so tests
/// can assert on response ordering without a second subscriber slot.
struct TapConnector {
    inner: Arc<dyn BusConnector>,
    record: Mutex<Vec<(String, Value)>>,
}

impl TapConnector {
    fn new(inner: Arc<dyn BusConnector>) -> Self {
        TapConnector {
            inner,
            record: Mutex::new(Vec::new()),
        }
    }

    fn recorded(&self) -> Vec<(String, Value)> {
        self.record.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BusConnector for TapConnector {
    async fn connect(&self) -> RunnerResult<ConnectionHandle> {
        self.inner.connect().await
    }

    async fn disconnect(&self, handle: &ConnectionHandle) -> RunnerResult<()> {
        self.inner.disconnect(handle).await
    }

    async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        channel: &str,
        callback: EnvelopeCallback,
    ) -> RunnerResult<()> {
        self.inner.subscribe(handle, channel, callback).await
    }

    async fn publish(
        &self,
        handle: &ConnectionHandle,
        channel: &str,
        payload: Value,
    ) -> RunnerResult<PublishReceipt> {
        self.record
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.clone()));
        self.inner.publish(handle, channel, payload).await
    }

    async fn health(&self, handle: &ConnectionHandle) -> RunnerResult<HealthStatus> {
        self.inner.health(handle).await
    }
}

fn write_snapshot(dir: &TempDir) {
    let mut dandisets = Vec::new();
    for (id, stars) in [("000003", 5), ("000004", 0), ("000005", 2)] {
        dandisets.push(json!({
            "dandiset_id": id,
            "version": "0.1",
            "name": format!("Dataset {}", id),
            "created": "2024-01-01T00:00:00Z",
            "modified": "2024-06-01T00:00:00Z",
            "asset_count": 4,
            "size": 100,
            "contact_person": "Doe, Jane",
            "embargo_status": "OPEN",
            "star_count": stars
        }));
    }
    fs::write(
        dir.path().join("dandi.json"),
        json!({ "dandisets": dandisets }).to_string(),
    )
    .unwrap();
}

struct Harness {
    client: JobClient,
    tap: Arc<TapConnector>,
    _dir: TempDir,
}

async fn start_harness() -> Harness {
    let dir = TempDir::new().unwrap();
    write_snapshot(&dir);

    let bus = Arc::new(InProcessBusConnector::new());
    let tap = Arc::new(TapConnector::new(bus.clone() as Arc<dyn BusConnector>));
    let handle = bus.connect().await.unwrap();

    let interface = DandiInterface::new(
        SnapshotStore::new(dir.path()),
        DandiApiClient::new(&ApiConfig {
            dandi_api_base: "http://127.0.0.1:9/api".to_string(),
            semantic_search_url: "http://127.0.0.1:9/semantic".to_string(),
        }),
        DiskCache::new(dir.path().join("cache")),
    );
    let executor = Arc::new(SandboxExecutor::new(Arc::new(interface)));
    let publisher = Arc::new(ResponsePublisher::new(
        tap.clone() as Arc<dyn BusConnector>,
        handle.clone(),
        "responses",
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
        },
    ));
    let limits = LimitsConfig::default();
    let dispatcher = JobDispatcher::new(executor, publisher, &limits);
    let connector: Arc<dyn BusConnector> = bus.clone();
    dispatcher
        .start(&connector, &handle, "jobs")
        .await
        .unwrap();

    let client = JobClient::new(
        bus,
        handle,
        "jobs",
        "responses",
        Duration::from_millis(limits.admission_timeout_ms),
    )
    .await
    .unwrap();

    Harness {
        client,
        tap,
        _dir: dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_job_round_trip() {
    let harness = start_harness().await;
    let output = harness
        .client
        .execute_script("dandi.print('hi'); return;")
        .await
        .unwrap();
    assert_eq!(output, "hi\n");

    // accepted strictly before completed, exactly one terminal response
    let statuses: Vec<String> = harness
        .tap
        .recorded()
        .iter()
        .filter(|(channel, _)| channel == "responses")
        .filter_map(|(_, payload)| payload.get("status").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    assert_eq!(statuses, vec!["accepted", "completed"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripts_query_the_dataset_layer() {
    let harness = start_harness().await;
    let script = r#"
        let starred = 0;
        for ds in dandi.get_dandisets() {
            if ds.star_count > 0 { starred = starred + 1; }
        }
        dandi.print('starred: ' + str(starred));
    "#;
    let output = harness.client.execute_script(script).await.unwrap();
    assert_eq!(output, "starred: 2\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_jobs_complete_out_of_order() {
    let harness = start_harness().await;

    // The slow job suspends on a host call per iteration; the fast one
    // finishes in a single print.
    let slow = r#"
        let rounds = 0;
        for i in range(400) {
            let sets = dandi.get_dandisets();
            rounds = rounds + 1;
        }
        dandi.print('slow ' + str(rounds));
    "#;
    let fast = "dandi.print('fast');";

    let (slow_result, fast_result) = tokio::join!(
        harness.client.execute_script(slow),
        harness.client.execute_script(fast)
    );
    assert_eq!(slow_result.unwrap(), "slow 400\n");
    assert_eq!(fast_result.unwrap(), "fast\n");

    let completions: Vec<String> = harness
        .tap
        .recorded()
        .iter()
        .filter_map(|(_, payload)| {
            if payload.get("status").and_then(Value::as_str) == Some("completed") {
                payload
                    .get("output")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                None
            }
        })
        .collect();
    assert_eq!(completions.len(), 2);
    assert!(
        completions[0].starts_with("fast"),
        "fast job should complete first, got {:?}",
        completions
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_script_surfaces_the_error_message() {
    let harness = start_harness().await;
    let err = harness
        .client
        .execute_script("return 1 / 0;")
        .await
        .unwrap_err();
    match err {
        RunnerError::JobFailed(message) => assert!(message.contains("division by zero")),
        other => panic!("expected JobFailed, got {:?}", other),
    }
}
