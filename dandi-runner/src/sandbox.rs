// Script sandbox: builds the capability object for one job and executes
// the job's script against it.
//
// The capability object bound as `dandi` is the entire surface a script
// can reach: an output-accumulating print, three dataset read operations,
// and the handles they return. There is no other isolation boundary (no
// resource quotas, no execution timeout); a hostile or runaway script can
// spin forever and hold its concurrency slot until restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use dandiscript::{Evaluator, HostRef, ScriptError, ScriptHost, ScriptResult, Value};

use crate::dandi::{
    AssetDetail, DandiInterface, DandisetRecord, FindQuery, NeurodataObjectRecord, NwbFileRecord,
};
use crate::dispatcher::JobExecutor;
use crate::error::{RunnerError, RunnerResult};
use crate::protocol::JobRequest;

/// Production [`JobExecutor`]: one sandbox per job, sharing the dataset
/// access layer across jobs.
pub struct SandboxExecutor {
    interface: Arc<DandiInterface>,
}

impl SandboxExecutor {
    pub fn new(interface: Arc<DandiInterface>) -> Self {
        SandboxExecutor { interface }
    }
}

#[async_trait]
impl JobExecutor for SandboxExecutor {
    async fn execute(
        &self,
        job: &JobRequest,
        events: mpsc::UnboundedSender<String>,
    ) -> RunnerResult<String> {
        let program = dandiscript::parse_program(&job.script)?;
        let host = DandiHost::new(self.interface.clone(), events);
        let root = host.root_handle();
        let evaluator = Evaluator::new(&host);
        evaluator
            .run(&program, vec![("dandi".to_string(), root)])
            .await?;
        Ok(host.take_output())
    }
}

enum Entity {
    Interface,
    Dandiset(DandisetRecord),
    NwbFile(NwbFileEntity),
    NeurodataObject(NeurodataObjectEntity),
}

#[derive(Clone)]
struct NwbFileEntity {
    dandiset_id: String,
    version: String,
    record: NwbFileRecord,
    /// Asset detail memoized on first successful load. An absent backing
    /// file is re-probed on each access rather than cached.
    detail: Option<AssetDetail>,
}

#[derive(Clone)]
struct NeurodataObjectEntity {
    dandiset_id: String,
    version: String,
    asset_id: String,
    record: NeurodataObjectRecord,
}

/// Capability object implementation. Handles returned to the script are
/// ids into the entity table; the table lives exactly as long as the job.
struct DandiHost {
    interface: Arc<DandiInterface>,
    events: mpsc::UnboundedSender<String>,
    output: Mutex<String>,
    entities: Mutex<HashMap<u64, Entity>>,
    next_id: AtomicU64,
}

const ROOT_HANDLE: u64 = 0;

fn host_err(e: RunnerError) -> ScriptError {
    ScriptError::Host(e.to_string())
}

impl DandiHost {
    fn new(interface: Arc<DandiInterface>, events: mpsc::UnboundedSender<String>) -> Self {
        let mut entities = HashMap::new();
        entities.insert(ROOT_HANDLE, Entity::Interface);
        let host = DandiHost {
            interface,
            events,
            output: Mutex::new(String::new()),
            entities: Mutex::new(entities),
            next_id: AtomicU64::new(ROOT_HANDLE + 1),
        };
        host.emit("Dandi interface initialized");
        host
    }

    fn root_handle(&self) -> Value {
        Value::Host(HostRef {
            id: ROOT_HANDLE,
            kind: "dandi".to_string(),
        })
    }

    fn take_output(&self) -> String {
        let mut guard = self.output.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    fn emit(&self, message: impl Into<String>) {
        let _ = self.events.send(message.into());
    }

    fn insert_entity(&self, entity: Entity, kind: &str) -> ScriptResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entities
            .lock()
            .map_err(|_| ScriptError::Host("entity table poisoned".to_string()))?
            .insert(id, entity);
        Ok(Value::Host(HostRef {
            id,
            kind: kind.to_string(),
        }))
    }

    fn dandiset_handle(&self, record: DandisetRecord) -> ScriptResult<Value> {
        self.insert_entity(Entity::Dandiset(record), "dandiset")
    }

    fn with_entity<R>(
        &self,
        target: &HostRef,
        f: impl FnOnce(&Entity) -> ScriptResult<R>,
    ) -> ScriptResult<R> {
        let entities = self
            .entities
            .lock()
            .map_err(|_| ScriptError::Host("entity table poisoned".to_string()))?;
        let entity = entities
            .get(&target.id)
            .ok_or_else(|| ScriptError::Host(format!("stale host reference #{}", target.id)))?;
        f(entity)
    }

    /// print: strings verbatim, anything else as pretty JSON; a value
    /// that cannot be serialized becomes error text in the output rather
    /// than aborting the job.
    fn print(&self, args: Vec<Value>) -> ScriptResult<Value> {
        let value = args.into_iter().next().unwrap_or(Value::Null);
        let text = match &value {
            Value::Str(s) => s.clone(),
            other => match self.value_to_json(other) {
                Ok(json) => serde_json::to_string_pretty(&json)
                    .unwrap_or_else(|e| format!("Error stringifying value: {}", e)),
                Err(e) => format!("Error stringifying value: {}", e),
            },
        };
        {
            let mut output = self
                .output
                .lock()
                .map_err(|_| ScriptError::Host("output buffer poisoned".to_string()))?;
            output.push_str(&text);
            output.push('\n');
        }
        self.emit(text);
        Ok(Value::Null)
    }

    fn value_to_json(&self, value: &Value) -> Result<serde_json::Value, String> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(json!(b)),
            Value::Int(i) => Ok(json!(i)),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .ok_or_else(|| format!("non-finite number {}", x)),
            Value::Str(s) => Ok(json!(s)),
            Value::List(items) => items
                .iter()
                .map(|item| self.value_to_json(item))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Value::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, item) in entries {
                    object.insert(key.clone(), self.value_to_json(item)?);
                }
                Ok(serde_json::Value::Object(object))
            }
            Value::Host(host_ref) => self.host_ref_to_json(host_ref),
        }
    }

    fn host_ref_to_json(&self, host_ref: &HostRef) -> Result<serde_json::Value, String> {
        let entities = self
            .entities
            .lock()
            .map_err(|_| "entity table poisoned".to_string())?;
        match entities.get(&host_ref.id) {
            Some(Entity::Dandiset(record)) => {
                serde_json::to_value(record).map_err(|e| e.to_string())
            }
            Some(Entity::NwbFile(file)) => Ok(json!({
                "dandiset_id": file.dandiset_id,
                "version": file.version,
                "path": file.record.path,
                "size": file.record.size,
                "asset_id": file.record.asset_id,
            })),
            Some(Entity::NeurodataObject(object)) => Ok(json!({
                "dandiset_id": object.dandiset_id,
                "version": object.version,
                "asset_id": object.asset_id,
                "path": object.record.path,
                "type": object.record.neurodata_type,
                "description": object.record.description,
            })),
            Some(Entity::Interface) => Err("cannot serialize the interface object".to_string()),
            None => Err(format!("stale host reference #{}", host_ref.id)),
        }
    }

    async fn get_dandisets(&self) -> ScriptResult<Value> {
        self.emit("Getting dandisets...");
        let records = self.interface.get_dandisets().await.map_err(host_err)?;
        let handles = records
            .into_iter()
            .map(|record| self.dandiset_handle(record))
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::List(handles))
    }

    async fn get_dandiset(&self, args: Vec<Value>) -> ScriptResult<Value> {
        let options = expect_map_arg("get_dandiset", args)?;
        let dandiset_id = required_str(&options, "get_dandiset", "dandiset_id")?;
        self.emit(format!("Getting dandiset: {}", dandiset_id));
        match self
            .interface
            .get_dandiset(&dandiset_id)
            .await
            .map_err(host_err)?
        {
            Some(record) => self.dandiset_handle(record),
            None => Ok(Value::Null),
        }
    }

    async fn find_dandisets(&self, args: Vec<Value>) -> ScriptResult<Value> {
        let options = expect_map_arg("find_dandisets", args)?;
        let query = FindQuery {
            search: optional_str(&options, "find_dandisets", "search")?,
            semantic_search: optional_str(&options, "find_dandisets", "semantic_search")?,
            restrict_to_dandisets: optional_str_list(
                &options,
                "find_dandisets",
                "restrict_to_dandisets",
            )?,
        };
        match (&query.search, &query.semantic_search) {
            (Some(search), None) if query.restrict_to_dandisets.is_none() => {
                self.emit(format!("Searching dandisets for: {}", search));
            }
            (None, Some(semantic)) => {
                self.emit(format!("Performing semantic search for: {}", semantic));
            }
            // Conflicting modes fall through; the interface rejects them.
            _ => {}
        }
        let records = self
            .interface
            .find_dandisets(&query)
            .await
            .map_err(host_err)?;
        let handles = records
            .into_iter()
            .map(|record| self.dandiset_handle(record))
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::List(handles))
    }

    async fn nwb_file_handles(
        &self,
        dandiset_id: &str,
        version: &str,
    ) -> ScriptResult<Value> {
        let records = self
            .interface
            .nwb_files(dandiset_id, version)
            .await
            .map_err(host_err)?;
        let handles = records
            .into_iter()
            .map(|record| {
                self.insert_entity(
                    Entity::NwbFile(NwbFileEntity {
                        dandiset_id: dandiset_id.to_string(),
                        version: version.to_string(),
                        record,
                        detail: None,
                    }),
                    "nwb_file",
                )
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::List(handles))
    }

    /// Load and memoize the asset detail behind an NWB file handle.
    /// Returns `None` when the backing file is absent, which projects to
    /// empty defaults rather than an error.
    async fn load_detail(
        &self,
        id: u64,
        file: &NwbFileEntity,
    ) -> ScriptResult<Option<AssetDetail>> {
        if let Some(detail) = &file.detail {
            return Ok(Some(detail.clone()));
        }
        let loaded = self
            .interface
            .asset_detail(&file.dandiset_id, &file.record.asset_id)
            .await
            .map_err(host_err)?;
        match &loaded {
            Some(_) => {
                let mut entities = self
                    .entities
                    .lock()
                    .map_err(|_| ScriptError::Host("entity table poisoned".to_string()))?;
                if let Some(Entity::NwbFile(entry)) = entities.get_mut(&id) {
                    entry.detail = loaded.clone();
                }
            }
            None => {
                warn!(
                    "asset data not loaded for {}/{}",
                    file.dandiset_id, file.record.asset_id
                );
            }
        }
        Ok(loaded)
    }

    fn neurodata_object_handles(
        &self,
        file: &NwbFileEntity,
        detail: &AssetDetail,
    ) -> ScriptResult<Value> {
        let handles = detail
            .neurodata_objects
            .iter()
            .map(|record| {
                self.insert_entity(
                    Entity::NeurodataObject(NeurodataObjectEntity {
                        dandiset_id: file.dandiset_id.clone(),
                        version: file.version.clone(),
                        asset_id: file.record.asset_id.clone(),
                        record: record.clone(),
                    }),
                    "neurodata_object",
                )
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::List(handles))
    }
}

#[async_trait]
impl ScriptHost for DandiHost {
    async fn get_property(&self, target: &HostRef, name: &str) -> ScriptResult<Value> {
        enum Plan {
            Value(Value),
            DandisetFiles { dandiset_id: String, version: String },
            FileDetail(NwbFileEntity),
        }
        let plan = self.with_entity(target, |entity| match entity {
            Entity::Interface => Err(unknown_member("dandi", name)),
            Entity::Dandiset(record) => match name {
                "dandiset_id" => Ok(Plan::Value(Value::Str(record.dandiset_id.clone()))),
                "version" => Ok(Plan::Value(Value::Str(record.version.clone()))),
                "name" => Ok(Plan::Value(Value::Str(record.name.clone()))),
                "created" => Ok(Plan::Value(Value::Str(record.created.clone()))),
                "modified" => Ok(Plan::Value(Value::Str(record.modified.clone()))),
                "asset_count" => Ok(Plan::Value(Value::Int(record.asset_count))),
                "size" => Ok(Plan::Value(Value::Int(record.size))),
                "contact_person" => Ok(Plan::Value(Value::Str(record.contact_person.clone()))),
                "embargo_status" => Ok(Plan::Value(Value::Str(record.embargo_status.clone()))),
                "star_count" => Ok(Plan::Value(Value::Int(record.star_count))),
                "nwb_files" => Ok(Plan::DandisetFiles {
                    dandiset_id: record.dandiset_id.clone(),
                    version: record.version.clone(),
                }),
                _ => Err(unknown_member("dandiset", name)),
            },
            Entity::NwbFile(file) => match name {
                "path" => Ok(Plan::Value(Value::Str(file.record.path.clone()))),
                "size" => Ok(Plan::Value(Value::Int(file.record.size))),
                "asset_id" => Ok(Plan::Value(Value::Str(file.record.asset_id.clone()))),
                "dandiset_id" => Ok(Plan::Value(Value::Str(file.dandiset_id.clone()))),
                "version" => Ok(Plan::Value(Value::Str(file.version.clone()))),
                "session_description" | "subject" | "neurodata_objects" => {
                    Ok(Plan::FileDetail(file.clone()))
                }
                _ => Err(unknown_member("nwb_file", name)),
            },
            Entity::NeurodataObject(object) => match name {
                "dandiset_id" => Ok(Plan::Value(Value::Str(object.dandiset_id.clone()))),
                "version" => Ok(Plan::Value(Value::Str(object.version.clone()))),
                "asset_id" => Ok(Plan::Value(Value::Str(object.asset_id.clone()))),
                "path" => Ok(Plan::Value(Value::Str(object.record.path.clone()))),
                "neurodata_type" => {
                    Ok(Plan::Value(Value::Str(object.record.neurodata_type.clone())))
                }
                "description" => Ok(Plan::Value(Value::Str(object.record.description.clone()))),
                _ => Err(unknown_member("neurodata_object", name)),
            },
        })?;

        match plan {
            Plan::Value(value) => Ok(value),
            Plan::DandisetFiles {
                dandiset_id,
                version,
            } => self.nwb_file_handles(&dandiset_id, &version).await,
            Plan::FileDetail(file) => {
                let detail = self.load_detail(target.id, &file).await?;
                match (name, detail) {
                    ("session_description", Some(detail)) => {
                        Ok(Value::Str(detail.session_description))
                    }
                    ("subject", Some(detail)) => subject_value(&detail),
                    ("neurodata_objects", Some(detail)) => {
                        self.neurodata_object_handles(&file, &detail)
                    }
                    ("subject", None) => Ok(Value::Map(BTreeMap::new())),
                    ("neurodata_objects", None) => Ok(Value::List(Vec::new())),
                    // session_description and any other detail-backed
                    // property degrade to an empty string
                    (_, None) => Ok(Value::Str(String::new())),
                    (_, Some(_)) => Err(unknown_member("nwb_file", name)),
                }
            }
        }
    }

    async fn call_method(
        &self,
        target: &HostRef,
        name: &str,
        args: Vec<Value>,
    ) -> ScriptResult<Value> {
        enum Plan {
            Print,
            GetDandisets,
            FindDandisets,
            GetDandiset,
            Metadata(String),
        }
        let plan = self.with_entity(target, |entity| match entity {
            Entity::Interface => match name {
                "print" => Ok(Plan::Print),
                "get_dandisets" => Ok(Plan::GetDandisets),
                "find_dandisets" => Ok(Plan::FindDandisets),
                "get_dandiset" => Ok(Plan::GetDandiset),
                _ => Err(unknown_member("dandi", name)),
            },
            Entity::Dandiset(record) => match name {
                "metadata" => Ok(Plan::Metadata(record.dandiset_id.clone())),
                _ => Err(unknown_member("dandiset", name)),
            },
            Entity::NwbFile(_) => Err(unknown_member("nwb_file", name)),
            Entity::NeurodataObject(_) => Err(unknown_member("neurodata_object", name)),
        })?;

        match plan {
            Plan::Print => self.print(args),
            Plan::GetDandisets => self.get_dandisets().await,
            Plan::FindDandisets => self.find_dandisets(args).await,
            Plan::GetDandiset => self.get_dandiset(args).await,
            Plan::Metadata(dandiset_id) => {
                let metadata = self
                    .interface
                    .metadata(&dandiset_id)
                    .await
                    .map_err(host_err)?;
                Ok(json_to_value(&metadata))
            }
        }
    }
}

fn unknown_member(target: &str, member: &str) -> ScriptError {
    ScriptError::UnknownMember {
        target: target.to_string(),
        member: member.to_string(),
    }
}

fn subject_value(detail: &AssetDetail) -> ScriptResult<Value> {
    let subject = serde_json::to_value(&detail.subject)
        .map_err(|e| ScriptError::Host(format!("subject serialization failed: {}", e)))?;
    Ok(json_to_value(&subject))
}

fn expect_map_arg(function: &str, args: Vec<Value>) -> ScriptResult<BTreeMap<String, Value>> {
    if args.len() != 1 {
        return Err(ScriptError::Arity {
            function: function.to_string(),
            expected: "1".to_string(),
            actual: args.len(),
        });
    }
    match args.into_iter().next() {
        Some(Value::Map(entries)) => Ok(entries),
        Some(other) => Err(ScriptError::Type {
            expected: "map".to_string(),
            actual: other.type_name().to_string(),
            operation: function.to_string(),
        }),
        None => Err(ScriptError::Type {
            expected: "map".to_string(),
            actual: "nothing".to_string(),
            operation: function.to_string(),
        }),
    }
}

fn required_str(
    options: &BTreeMap<String, Value>,
    function: &str,
    key: &str,
) -> ScriptResult<String> {
    optional_str(options, function, key)?.ok_or_else(|| ScriptError::Type {
        expected: format!("string `{}`", key),
        actual: "nothing".to_string(),
        operation: function.to_string(),
    })
}

fn optional_str(
    options: &BTreeMap<String, Value>,
    function: &str,
    key: &str,
) -> ScriptResult<Option<String>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ScriptError::Type {
            expected: format!("string `{}`", key),
            actual: other.type_name().to_string(),
            operation: function.to_string(),
        }),
    }
}

fn optional_str_list(
    options: &BTreeMap<String, Value>,
    function: &str,
    key: &str,
) -> ScriptResult<Option<Vec<String>>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::List(items)) => items
            .iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.clone()),
                other => Err(ScriptError::Type {
                    expected: format!("list of strings `{}`", key),
                    actual: other.type_name().to_string(),
                    operation: function.to_string(),
                }),
            })
            .collect::<ScriptResult<Vec<_>>>()
            .map(Some),
        Some(other) => Err(ScriptError::Type {
            expected: format!("list of strings `{}`", key),
            actual: other.type_name().to_string(),
            operation: function.to_string(),
        }),
    }
}

/// JSON -> script value. Integral numbers become ints, everything else
/// floats.
fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::List(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskCache;
    use crate::config::ApiConfig;
    use crate::dandi::{DandiApiClient, SnapshotStore};
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn record(id: &str, version: &str) -> serde_json::Value {
        json!({
            "dandiset_id": id,
            "version": version,
            "name": format!("Dataset {}", id),
            "created": "2024-01-01T00:00:00Z",
            "modified": "2024-06-01T00:00:00Z",
            "asset_count": 12,
            "size": 1024,
            "contact_person": "Doe, Jane",
            "embargo_status": "OPEN",
            "star_count": 3
        })
    }

    fn fixture_executor(dir: &TempDir) -> SandboxExecutor {
        let root = dir.path();
        fs::write(
            root.join("dandi.json"),
            json!({"dandisets": [record("000003", "0.1"), record("000004", "draft")]}).to_string(),
        )
        .unwrap();
        let nested = root.join("dandisets/000003");
        fs::create_dir_all(nested.join("assets.v7")).unwrap();
        let mut dandiset = record("000003", "0.1");
        dandiset["nwb_files"] =
            json!([{"path": "sub-01/sub-01.nwb", "size": 2048, "asset_id": "aaa"}]);
        dandiset["metadata"] = json!({
            "assetsSummary": {
                "species": [{"name": "Mus musculus"}],
                "approach": [],
                "dataStandard": [],
                "measurementTechnique": [],
                "variableMeasured": [],
                "numberOfFiles": 1
            }
        });
        fs::write(nested.join("dandiset.json"), dandiset.to_string()).unwrap();
        fs::write(
            nested.join("assets.v7/aaa.json"),
            json!({
                "dandiset_id": "000003",
                "asset_id": "aaa",
                "session_description": "awake recording",
                "subject": {
                    "age": "P90D", "sex": "M", "genotype": "wt",
                    "species": "Mus musculus", "subject_id": "01"
                },
                "neurodata_objects": [
                    {"path": "/units", "type": "Units", "description": "sorted spikes"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let api = DandiApiClient::new(&ApiConfig {
            dandi_api_base: "http://127.0.0.1:9/api".to_string(),
            semantic_search_url: "http://127.0.0.1:9/semantic".to_string(),
        });
        let interface = DandiInterface::new(
            SnapshotStore::new(root),
            api,
            DiskCache::new(root.join("cache")),
        );
        SandboxExecutor::new(Arc::new(interface))
    }

    async fn run(executor: &SandboxExecutor, script: &str) -> RunnerResult<(String, Vec<String>)> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = JobRequest {
            job_id: "test".to_string(),
            script: script.to_string(),
        };
        let output = executor.execute(&job, tx).await?;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Ok((output, events))
    }

    #[tokio::test]
    async fn print_appends_newline_and_reports_status() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let (output, events) = run(&executor, "dandi.print('hi'); return;").await.unwrap();
        assert_eq!(output, "hi\n");
        assert!(events.contains(&"hi".to_string()));
    }

    #[tokio::test]
    async fn print_serializes_non_string_values() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let (output, _) = run(&executor, "dandi.print({b: 1, a: 'x'});").await.unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(output.trim_end()).expect("output is JSON");
        assert_eq!(parsed, json!({"a": "x", "b": 1}));
    }

    #[tokio::test]
    async fn print_captures_serialization_failure_as_text() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let (output, _) = run(&executor, "dandi.print(1.0 / 0.0);").await.unwrap();
        assert!(output.starts_with("Error stringifying value:"), "{}", output);
    }

    #[tokio::test]
    async fn traverses_datasets_files_and_objects() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let script = r#"
            let sets = dandi.get_dandisets();
            dandi.print(str(len(sets)));
            let ds = dandi.get_dandiset({dandiset_id: '000003'});
            dandi.print(ds.name);
            for f in ds.nwb_files {
                dandi.print(f.path);
                dandi.print(f.session_description);
                dandi.print(f.subject.species);
                for obj in f.neurodata_objects {
                    dandi.print(obj.neurodata_type);
                }
            }
            return;
        "#;
        let (output, events) = run(&executor, script).await.unwrap();
        assert_eq!(
            output,
            "2\nDataset 000003\nsub-01/sub-01.nwb\nawake recording\nMus musculus\nUnits\n"
        );
        assert!(events.contains(&"Getting dandisets...".to_string()));
        assert!(events.contains(&"Getting dandiset: 000003".to_string()));
    }

    #[tokio::test]
    async fn metadata_is_redacted_for_scripts() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let script = r#"
            let ds = dandi.get_dandiset({dandiset_id: '000003'});
            let md = ds.metadata();
            dandi.print(str(len(md.assetsSummary.species)));
            dandi.print(str(md.assetsSummary.numberOfFiles));
        "#;
        let (output, _) = run(&executor, script).await.unwrap();
        assert_eq!(output, "0\n1\n");
    }

    #[tokio::test]
    async fn unknown_dandiset_is_null() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let script = r#"
            let ds = dandi.get_dandiset({dandiset_id: '999999'});
            if ds == null { dandi.print('not found'); }
        "#;
        let (output, _) = run(&executor, script).await.unwrap();
        assert_eq!(output, "not found\n");
    }

    #[tokio::test]
    async fn missing_asset_file_projects_empty_defaults() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        // point the listing at an asset with no backing detail file
        let nested = dir.path().join("dandisets/000003/dandiset.json");
        let mut dandiset: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&nested).unwrap()).unwrap();
        dandiset["nwb_files"] =
            json!([{"path": "sub-02/sub-02.nwb", "size": 1, "asset_id": "zzz"}]);
        fs::write(&nested, dandiset.to_string()).unwrap();

        let script = r#"
            let ds = dandi.get_dandiset({dandiset_id: '000003'});
            for f in ds.nwb_files {
                dandi.print(str(len(f.neurodata_objects)));
                dandi.print(str(len(keys(f.subject))));
                dandi.print(f.session_description);
            }
        "#;
        let (output, _) = run(&executor, script).await.unwrap();
        assert_eq!(output, "0\n0\n\n");
    }

    #[tokio::test]
    async fn data_access_failure_fails_the_job() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        fs::remove_file(dir.path().join("dandi.json")).unwrap();
        let err = run(&executor, "dandi.get_dandisets();").await.unwrap_err();
        assert!(err.to_string().contains("dandiset data file not found"));
    }

    #[tokio::test]
    async fn parse_errors_fail_the_job() {
        let dir = tempdir().unwrap();
        let executor = fixture_executor(&dir);
        let err = run(&executor, "let = ;").await.unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }
}
