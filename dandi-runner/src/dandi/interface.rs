// Capability-facing facade over the snapshot store, the remote services,
// and the disk cache. This is the complete read surface a script can
// reach; nothing else is exposed to it.

use serde_json::json;
use tracing::debug;

use crate::cache::DiskCache;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};

use super::api::DandiApiClient;
use super::store::SnapshotStore;
use super::types::{AssetDetail, DandisetRecord, NwbFileRecord};

const CACHE_VERSION: &str = "1";
const SEARCH_CACHE_TTL_MINUTES: u64 = 60;
const DRAFT_LISTING_TTL_MINUTES: u64 = 60;
const PUBLISHED_LISTING_TTL_MINUTES: u64 = 60 * 24 * 100;

/// One search request. Exactly one of `search` (keyword) or
/// `semantic_search` may be set; `restrict_to_dandisets` only combines
/// with semantic mode.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub search: Option<String>,
    pub semantic_search: Option<String>,
    pub restrict_to_dandisets: Option<Vec<String>>,
}

pub struct DandiInterface {
    store: SnapshotStore,
    api: DandiApiClient,
    cache: DiskCache,
}

impl DandiInterface {
    pub fn new(store: SnapshotStore, api: DandiApiClient, cache: DiskCache) -> Self {
        DandiInterface { store, api, cache }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        DandiInterface {
            store: SnapshotStore::new(config.data.snapshot_dir.clone()),
            api: DandiApiClient::new(&config.api),
            cache: DiskCache::new(config.data.cache_dir.clone()),
        }
    }

    pub async fn get_dandisets(&self) -> RunnerResult<Vec<DandisetRecord>> {
        self.store.list_dandisets()
    }

    pub async fn get_dandiset(&self, dandiset_id: &str) -> RunnerResult<Option<DandisetRecord>> {
        self.store.get_dandiset(dandiset_id)
    }

    /// Search the archive. Mode conflicts fail before any network call is
    /// made; they are caller bugs, never silently disambiguated.
    pub async fn find_dandisets(&self, query: &FindQuery) -> RunnerResult<Vec<DandisetRecord>> {
        if let Some(search) = &query.search {
            if query.semantic_search.is_some() {
                return Err(RunnerError::InvalidQuery(
                    "cannot use both `search` and `semantic_search` at the same time".to_string(),
                ));
            }
            if query.restrict_to_dandisets.is_some() {
                return Err(RunnerError::InvalidQuery(
                    "cannot use `restrict_to_dandisets` with `search`".to_string(),
                ));
            }
            return self.keyword_search(search).await;
        }

        if let Some(semantic_query) = &query.semantic_search {
            let ids = self
                .api
                .semantic_search(semantic_query, query.restrict_to_dandisets.as_deref())
                .await?;
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                // Identifiers unknown to the snapshot are dropped from
                // the ranked result.
                if let Some(record) = self.store.get_dandiset(&id)? {
                    records.push(record);
                }
            }
            return Ok(records);
        }

        Err(RunnerError::InvalidQuery(
            "either `search` or `semantic_search` must be provided".to_string(),
        ))
    }

    async fn keyword_search(&self, search: &str) -> RunnerResult<Vec<DandisetRecord>> {
        let args = vec![json!(search)];
        if let Some(hit) =
            self.cache
                .get("find_dandisets", CACHE_VERSION, &args, Some(SEARCH_CACHE_TTL_MINUTES))
        {
            if let Ok(records) = serde_json::from_value::<Vec<DandisetRecord>>(hit) {
                debug!("keyword search cache hit for {:?}", search);
                return Ok(records);
            }
        }
        let records = self.api.search_dandisets(search).await?;
        if let Ok(value) = serde_json::to_value(&records) {
            self.cache.set("find_dandisets", CACHE_VERSION, &args, value);
        }
        Ok(records)
    }

    pub async fn nwb_files(
        &self,
        dandiset_id: &str,
        version: &str,
    ) -> RunnerResult<Vec<NwbFileRecord>> {
        self.store.nwb_files(dandiset_id, version)
    }

    /// Remote NWB asset listing, cached aggressively for published
    /// versions (immutable) and briefly for drafts.
    pub async fn remote_nwb_files(
        &self,
        dandiset_id: &str,
        version: &str,
    ) -> RunnerResult<Vec<NwbFileRecord>> {
        let args = vec![json!(dandiset_id), json!(version)];
        let ttl = if version == "draft" {
            DRAFT_LISTING_TTL_MINUTES
        } else {
            PUBLISHED_LISTING_TTL_MINUTES
        };
        if let Some(hit) = self.cache.get("find_nwb_files", CACHE_VERSION, &args, Some(ttl)) {
            if let Ok(records) = serde_json::from_value::<Vec<NwbFileRecord>>(hit) {
                return Ok(records);
            }
        }
        let records = self.api.list_nwb_files(dandiset_id, version).await?;
        if let Ok(value) = serde_json::to_value(&records) {
            self.cache.set("find_nwb_files", CACHE_VERSION, &args, value);
        }
        Ok(records)
    }

    pub async fn metadata(&self, dandiset_id: &str) -> RunnerResult<serde_json::Value> {
        self.store.metadata(dandiset_id)
    }

    pub async fn asset_detail(
        &self,
        dandiset_id: &str,
        asset_id: &str,
    ) -> RunnerResult<Option<AssetDetail>> {
        self.store.asset_detail(dandiset_id, asset_id)
    }
}
