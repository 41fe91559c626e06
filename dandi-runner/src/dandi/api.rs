// Remote DANDI services: keyword search, per-dandiset asset listing, and
// the semantic search endpoint.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ApiConfig;
use crate::error::{RunnerError, RunnerResult};

use super::types::{DandisetRecord, NwbFileRecord};

const SEMANTIC_SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
struct DandisetListResponse {
    results: Vec<ApiDandisetResult>,
}

#[derive(Debug, Deserialize)]
struct ApiDandisetResult {
    identifier: String,
    most_recent_published_version: Option<ApiVersionInfo>,
    draft_version: Option<ApiVersionInfo>,
    #[serde(default)]
    contact_person: String,
    #[serde(default)]
    embargo_status: String,
    #[serde(default)]
    star_count: i64,
}

#[derive(Debug, Deserialize)]
struct ApiVersionInfo {
    name: String,
    version: String,
    created: String,
    modified: String,
    asset_count: i64,
    size: i64,
}

#[derive(Debug, Deserialize)]
struct AssetListResponse {
    results: Vec<NwbFileRecord>,
}

#[derive(Debug, Clone)]
pub struct DandiApiClient {
    client: Client,
    base_url: String,
    semantic_search_url: String,
}

impl DandiApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        DandiApiClient {
            client: Client::new(),
            base_url: config.dandi_api_base.trim_end_matches('/').to_string(),
            semantic_search_url: config.semantic_search_url.clone(),
        }
    }

    /// Keyword search over the archive. Draft-only dandisets are
    /// included, empty and embargoed ones excluded; both published and
    /// draft versions are flattened into one record shape, preferring the
    /// published one.
    pub async fn search_dandisets(&self, search: &str) -> RunnerResult<Vec<DandisetRecord>> {
        let url = format!(
            "{}/dandisets/?page=1&page_size=5000&ordering=-modified&draft=true&empty=false&embargoed=false",
            self.base_url
        );
        let mut request = self.client.get(&url);
        if !search.is_empty() {
            request = request.query(&[("search", search)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RunnerError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RunnerError::Api(format!("status {}", response.status())));
        }
        let body: DandisetListResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Api(e.to_string()))?;

        let mut records = Vec::with_capacity(body.results.len());
        for result in body.results {
            let version = result
                .most_recent_published_version
                .or(result.draft_version)
                .ok_or_else(|| {
                    RunnerError::Api(format!(
                        "no version information for dandiset {}",
                        result.identifier
                    ))
                })?;
            records.push(DandisetRecord {
                dandiset_id: result.identifier,
                version: version.version,
                name: version.name,
                created: version.created,
                modified: version.modified,
                asset_count: version.asset_count,
                size: version.size,
                contact_person: result.contact_person,
                embargo_status: result.embargo_status,
                star_count: result.star_count,
            });
        }
        Ok(records)
    }

    /// First page of the per-dandiset NWB asset listing.
    pub async fn list_nwb_files(
        &self,
        dandiset_id: &str,
        version: &str,
    ) -> RunnerResult<Vec<NwbFileRecord>> {
        let url = format!(
            "{}/dandisets/{}/versions/{}/assets/?page_size=100&glob=*.nwb",
            self.base_url, dandiset_id, version
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RunnerError::Api(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RunnerError::Api(format!(
                "dandiset {} version {} not found",
                dandiset_id, version
            )));
        }
        if !response.status().is_success() {
            return Err(RunnerError::Api(format!("status {}", response.status())));
        }
        let body: AssetListResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Api(e.to_string()))?;
        Ok(body.results)
    }

    /// Semantic search: returns a ranked dandiset identifier list, best
    /// match first, optionally restricted to an explicit identifier set.
    pub async fn semantic_search(
        &self,
        query: &str,
        restrict_to: Option<&[String]>,
    ) -> RunnerResult<Vec<String>> {
        let mut body = json!({
            "query": query,
            "limit": SEMANTIC_SEARCH_LIMIT,
        });
        if let Some(ids) = restrict_to {
            if !ids.is_empty() {
                body["dandisets"] = json!(ids);
            }
        }

        let response = self
            .client
            .post(&self.semantic_search_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::Api(format!("semantic search failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(RunnerError::Api(format!(
                "semantic search failed: status {}",
                response.status()
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| RunnerError::Api(format!("semantic search failed: {}", e)))?;

        let results = data
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RunnerError::Api("semantic search returned invalid data format".to_string())
            })?;
        Ok(results
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
