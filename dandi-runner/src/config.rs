// Runner configuration. All constants are read once at startup; there is
// no runtime reconfiguration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub bus: BusConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub data: DataConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bind address for the inbound webhook listener.
    pub bind_addr: String,
    /// Relay endpoint outbound messages are POSTed to. Publishing fails
    /// when unset.
    pub relay_url: Option<String>,
    /// Shared secret expected in the inbound webhook header.
    pub shared_secret: String,
    pub job_channel: String,
    pub response_channel: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            bind_addr: "127.0.0.1:8787".to_string(),
            relay_url: None,
            shared_secret: String::new(),
            job_channel: "dandi-script-jobs".to_string(),
            response_channel: "dandi-script-job-responses".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_jobs: usize,
    /// Output beyond this many characters is truncated with a marker.
    pub max_output_chars: usize,
    /// How long a caller waits for `accepted` before treating the runner
    /// as offline.
    pub admission_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_concurrent_jobs: 3,
            max_output_chars: 10_000,
            admission_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root of the local dataset snapshot tree (`dandi.json` lives here).
    pub snapshot_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            snapshot_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from(".cache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub dandi_api_base: String,
    pub semantic_search_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            dandi_api_base: "https://api.dandiarchive.org/api".to_string(),
            semantic_search_url:
                "https://neurosift-chat-agent-tools.vercel.app/api/dandi_semantic_search"
                    .to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn from_file(path: &Path) -> RunnerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| RunnerError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }
}
