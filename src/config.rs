//! Engine configuration: tiering thresholds, worker/concurrency counts,
//! and circuit-breaker knobs. Persisted as TOML at `.walgit/config`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalgitError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content at or below this size is stored inline in its object record.
    pub inline_max: u64,
    /// Content at or above this size is handed to the remote blob service
    /// rather than chunked locally.
    pub external_min: u64,
    /// Chunk size used for content strictly between `inline_max` and
    /// `external_min`.
    pub chunk_size: u64,
    /// Size of the rayon pool used for scan-time hashing. 0 means "let
    /// rayon pick a default based on available parallelism".
    pub hash_workers: usize,
    /// Max concurrent in-flight remote blob transfers.
    pub remote_concurrency: usize,
    /// A repository lease (`.walgit/LOCK`) older than this is assumed
    /// abandoned and force-broken on the next `acquire`.
    pub lock_stale_secs: i64,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker trips to `Open`.
    pub threshold: u32,
    /// Time the breaker stays `Open` before allowing a `HalfOpen` probe.
    pub cool_down_ms: u64,
    /// Retries attempted (with backoff) before a call is reported as
    /// failed to the breaker.
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inline_max: 2 * 1024 * 1024,
            external_min: 64 * 1024 * 1024,
            chunk_size: 1024 * 1024,
            hash_workers: 0,
            remote_concurrency: 8,
            lock_stale_secs: 600,
            breaker: BreakerConfig::default(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { threshold: 5, cool_down_ms: 30_000, max_retries: 3 }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| WalgitError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config if present, falling back to defaults when the file
    /// doesn't exist (a freshly `init`ed repo has no config yet).
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = toml::to_string_pretty(self)
            .map_err(|e| WalgitError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.inline_max > self.external_min {
            return Err(WalgitError::Config(
                "inline_max must not exceed external_min".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(WalgitError::Config("chunk_size must be greater than zero".into()));
        }
        if self.remote_concurrency == 0 {
            return Err(WalgitError::Config("remote_concurrency must be greater than zero".into()));
        }
        if self.breaker.threshold == 0 {
            return Err(WalgitError::Config("breaker.threshold must be greater than zero".into()));
        }
        if self.lock_stale_secs < 0 {
            return Err(WalgitError::Config("lock_stale_secs must not be negative".into()));
        }
        Ok(())
    }
}
