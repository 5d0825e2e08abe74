//! Layered runtime configuration. Precedence, lowest to highest:
//! compiled-in defaults → TOML file → `APP_`-prefixed environment
//! variables. Never persisted as an event-log row; held as an
//! `Arc<RuntimeConfig>` and threaded through every component, the way a
//! request-scoped value threads through `Effect::execute`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub database_url: String,
    pub http_bind: String,
    pub claim_ttl_ms: i64,
    pub sweep_interval_ms: i64,
    pub defer_threshold: usize,
    pub emergency_threshold: usize,
    pub load_shed_extension_ms: i64,
    pub bot_shared_secret: String,
    pub blob_provider: BlobProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "provider")]
pub enum BlobProviderConfig {
    #[serde(rename = "convex-files")]
    ConvexFiles { bucket: Option<String> },
    S3 { bucket: Option<String> },
    R2 { bucket: Option<String> },
    Memory,
}

impl Default for BlobProviderConfig {
    fn default() -> Self {
        BlobProviderConfig::Memory
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/decision_ledger".to_string(),
            http_bind: "0.0.0.0:8080".to_string(),
            claim_ttl_ms: 5 * 60 * 1000,
            sweep_interval_ms: 2 * 60 * 1000,
            defer_threshold: 2,
            emergency_threshold: 5,
            load_shed_extension_ms: 24 * 60 * 60 * 1000,
            bot_shared_secret: String::new(),
            blob_provider: BlobProviderConfig::Memory,
        }
    }
}

impl RuntimeConfig {
    /// Loads defaults, then overlays an optional TOML file, then overlays
    /// `APP_`-prefixed environment variables recognized below. Unlike a
    /// generic `config`-crate merge, this is deliberately small and
    /// explicit: the set of knobs is closed.
    pub fn load(toml_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut cfg = RuntimeConfig::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                cfg = toml::from_str(&text)?;
            }
        }

        if let Ok(v) = std::env::var("APP_DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Ok(v) = std::env::var("APP_HTTP_BIND") {
            cfg.http_bind = v;
        }
        if let Ok(v) = std::env::var("APP_CLAIM_TTL_MS") {
            cfg.claim_ttl_ms = v.parse()?;
        }
        if let Ok(v) = std::env::var("APP_SWEEP_INTERVAL_MS") {
            cfg.sweep_interval_ms = v.parse()?;
        }
        if let Ok(v) = std::env::var("APP_DEFER_THRESHOLD") {
            cfg.defer_threshold = v.parse()?;
        }
        if let Ok(v) = std::env::var("APP_EMERGENCY_THRESHOLD") {
            cfg.emergency_threshold = v.parse()?;
        }
        if let Ok(v) = std::env::var("APP_BOT_SHARED_SECRET") {
            cfg.bot_shared_secret = v;
        }

        Ok(cfg)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.claim_ttl_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms.max(0) as u64)
    }

    pub fn load_shed_extension(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.load_shed_extension_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.claim_ttl_ms, 5 * 60 * 1000);
        assert_eq!(cfg.sweep_interval_ms, 2 * 60 * 1000);
        assert_eq!(cfg.defer_threshold, 2);
        assert_eq!(cfg.emergency_threshold, 5);
        assert_eq!(cfg.load_shed_extension_ms, 24 * 60 * 60 * 1000);
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("APP_DEFER_THRESHOLD", "7");
        let cfg = RuntimeConfig::load(None).unwrap();
        assert_eq!(cfg.defer_threshold, 7);
        std::env::remove_var("APP_DEFER_THRESHOLD");
    }
}
