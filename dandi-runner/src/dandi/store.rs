// Local snapshot store: point-in-time copies of DANDI archive metadata,
// written by an external snapshot job. Layout:
//
//   <root>/dandi.json                                  all dandiset summaries
//   <root>/dandisets/<id>/dandiset.json                files + metadata
//   <root>/dandisets/<id>/assets.v7/<asset_id>.json    per-file detail

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{RunnerError, RunnerResult};

use super::types::{AssetDetail, DandisetRecord, NwbFileRecord};

/// Summary sub-fields removed from metadata before it is handed to a
/// script, so downstream interpretation is not biased by them.
const REDACTED_SUMMARY_FIELDS: [&str; 5] = [
    "species",
    "approach",
    "dataStandard",
    "measurementTechnique",
    "variableMeasured",
];

#[derive(Debug, Deserialize)]
struct RootSnapshot {
    dandisets: Vec<DandisetRecord>,
}

#[derive(Debug, Deserialize)]
struct DandisetSnapshot {
    dandiset_id: String,
    version: String,
    #[serde(default)]
    nwb_files: Vec<NwbFileRecord>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SnapshotStore { root: root.into() }
    }

    fn root_file(&self) -> PathBuf {
        self.root.join("dandi.json")
    }

    fn dandiset_file(&self, dandiset_id: &str) -> PathBuf {
        self.root
            .join("dandisets")
            .join(dandiset_id)
            .join("dandiset.json")
    }

    fn asset_file(&self, dandiset_id: &str, asset_id: &str) -> PathBuf {
        self.root
            .join("dandisets")
            .join(dandiset_id)
            .join("assets.v7")
            .join(format!("{}.json", asset_id))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> RunnerResult<T> {
        if !path.exists() {
            return Err(RunnerError::SnapshotNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| RunnerError::SnapshotParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Every dandiset summary in the snapshot. A missing or malformed
    /// root file is a hard error here, unlike single-record lookups.
    pub fn list_dandisets(&self) -> RunnerResult<Vec<DandisetRecord>> {
        let snapshot: RootSnapshot = self.read_json(&self.root_file())?;
        Ok(snapshot.dandisets)
    }

    pub fn get_dandiset(&self, dandiset_id: &str) -> RunnerResult<Option<DandisetRecord>> {
        let snapshot: RootSnapshot = self.read_json(&self.root_file())?;
        Ok(snapshot
            .dandisets
            .into_iter()
            .find(|d| d.dandiset_id == dandiset_id))
    }

    /// NWB file listing for one dandiset+version pair. When the nested
    /// file reports a different identity than it was looked up under, the
    /// data is discarded and an empty listing returned.
    pub fn nwb_files(
        &self,
        dandiset_id: &str,
        version: &str,
    ) -> RunnerResult<Vec<NwbFileRecord>> {
        let snapshot: DandisetSnapshot = self.read_json(&self.dandiset_file(dandiset_id))?;
        if snapshot.dandiset_id != dandiset_id || snapshot.version != version {
            warn!(
                "dandiset identity mismatch: expected {}/{}, got {}/{}",
                dandiset_id, version, snapshot.dandiset_id, snapshot.version
            );
            return Ok(Vec::new());
        }
        Ok(snapshot.nwb_files)
    }

    /// Dandiset metadata with the summary redaction applied.
    pub fn metadata(&self, dandiset_id: &str) -> RunnerResult<Value> {
        let snapshot: DandisetSnapshot = self.read_json(&self.dandiset_file(dandiset_id))?;
        let mut metadata = snapshot.metadata;
        if let Some(summary) = metadata
            .get_mut("assetsSummary")
            .and_then(Value::as_object_mut)
        {
            for field in REDACTED_SUMMARY_FIELDS {
                summary.insert(field.to_string(), Value::Array(Vec::new()));
            }
        }
        Ok(metadata)
    }

    /// Per-file asset detail. A missing backing file is an absence, not
    /// an error; an identity mismatch here IS an error, unlike the
    /// file-listing path above.
    pub fn asset_detail(
        &self,
        dandiset_id: &str,
        asset_id: &str,
    ) -> RunnerResult<Option<AssetDetail>> {
        let path = self.asset_file(dandiset_id, asset_id);
        if !path.exists() {
            return Ok(None);
        }
        let detail: AssetDetail = self.read_json(&path)?;
        if detail.dandiset_id != dandiset_id || detail.asset_id != asset_id {
            return Err(RunnerError::SnapshotMismatch {
                expected: format!("{}/{}", dandiset_id, asset_id),
                actual: format!("{}/{}", detail.dandiset_id, detail.asset_id),
            });
        }
        Ok(Some(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn record(id: &str, version: &str) -> Value {
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

    fn write_fixture(dir: &TempDir) -> SnapshotStore {
        let root = dir.path();
        fs::write(
            root.join("dandi.json"),
            json!({"dandisets": [record("000003", "0.230629.1955"), record("000004", "draft")]})
                .to_string(),
        )
        .unwrap();

        let nested = root.join("dandisets/000003");
        fs::create_dir_all(nested.join("assets.v7")).unwrap();
        let mut dandiset = record("000003", "0.230629.1955");
        dandiset["nwb_files"] = json!([
            {"path": "sub-01/sub-01.nwb", "size": 2048, "asset_id": "aaa"},
        ]);
        dandiset["metadata"] = json!({
            "name": "Dataset 000003",
            "assetsSummary": {
                "species": [{"name": "Mus musculus"}],
                "approach": [{"name": "electrophysiology"}],
                "dataStandard": [{"name": "NWB"}],
                "measurementTechnique": [{"name": "patch clamp"}],
                "variableMeasured": ["Units"],
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
                "subject": {"age": "P90D", "sex": "M", "genotype": "wt", "species": "Mus musculus", "subject_id": "01"},
                "neurodata_objects": [
                    {"path": "/units", "type": "Units", "description": "sorted spikes"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        SnapshotStore::new(root)
    }

    #[test]
    fn lists_and_filters_dandisets() {
        let dir = tempdir().unwrap();
        let store = write_fixture(&dir);
        let all = store.list_dandisets().unwrap();
        assert_eq!(all.len(), 2);
        let one = store.get_dandiset("000003").unwrap().unwrap();
        assert_eq!(one.version, "0.230629.1955");
        assert!(store.get_dandiset("999999").unwrap().is_none());
    }

    #[test]
    fn missing_root_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.list_dandisets(),
            Err(RunnerError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn malformed_root_snapshot_is_a_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("dandi.json"), "{oops").unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.list_dandisets(),
            Err(RunnerError::SnapshotParse { .. })
        ));
    }

    #[test]
    fn nwb_files_and_metadata_redaction() {
        let dir = tempdir().unwrap();
        let store = write_fixture(&dir);
        let files = store.nwb_files("000003", "0.230629.1955").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].asset_id, "aaa");

        let metadata = store.metadata("000003").unwrap();
        let summary = metadata.get("assetsSummary").unwrap();
        for field in REDACTED_SUMMARY_FIELDS {
            assert_eq!(summary.get(field).unwrap(), &json!([]), "{}", field);
        }
        // untouched fields survive
        assert_eq!(summary.get("numberOfFiles").unwrap(), &json!(1));
    }

    #[test]
    fn version_mismatch_yields_empty_listing_not_error() {
        let dir = tempdir().unwrap();
        let store = write_fixture(&dir);
        let files = store.nwb_files("000003", "draft").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn asset_detail_absence_and_mismatch() {
        let dir = tempdir().unwrap();
        let store = write_fixture(&dir);

        let detail = store.asset_detail("000003", "aaa").unwrap().unwrap();
        assert_eq!(detail.session_description, "awake recording");
        assert_eq!(detail.neurodata_objects[0].neurodata_type, "Units");

        // missing backing file: absence, not error
        assert!(store.asset_detail("000003", "zzz").unwrap().is_none());

        // identity mismatch inside the file: hard error
        fs::write(
            dir.path().join("dandisets/000003/assets.v7/bbb.json"),
            json!({"dandiset_id": "000009", "asset_id": "bbb"}).to_string(),
        )
        .unwrap();
        assert!(matches!(
            store.asset_detail("000003", "bbb"),
            Err(RunnerError::SnapshotMismatch { .. })
        ));
    }
}
