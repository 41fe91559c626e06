// Record shapes exposed by the dataset access layer. Snapshot files and
// the remote search service are both reconciled into these.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DandisetRecord {
    pub dandiset_id: String,
    pub version: String,
    pub name: String,
    pub created: String,
    pub modified: String,
    pub asset_count: i64,
    pub size: i64,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub embargo_status: String,
    #[serde(default)]
    pub star_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbFileRecord {
    pub path: String,
    pub size: i64,
    pub asset_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectInfo {
    pub age: String,
    pub sex: String,
    pub genotype: String,
    pub species: String,
    pub subject_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specimen_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeurodataObjectRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub neurodata_type: String,
    #[serde(default)]
    pub description: String,
}

/// Per-file detail, loaded lazily from a nested snapshot file and
/// memoized for the lifetime of one capability object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDetail {
    pub dandiset_id: String,
    pub asset_id: String,
    #[serde(default)]
    pub session_description: String,
    #[serde(default)]
    pub subject: SubjectInfo,
    #[serde(default)]
    pub neurodata_objects: Vec<NeurodataObjectRecord>,
}
