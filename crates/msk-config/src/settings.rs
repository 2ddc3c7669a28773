//! Typed engine settings read from the merged config.

use anyhow::{anyhow, bail, Context, Result};
use msk_engine::{ServiceOptions, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_RETRY_ATTEMPTS};
use msk_ledger::{OverdrawPolicy, Qty};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL_ENV: &str = "MSK_DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub overdraw_policy: OverdrawPolicy,
    pub low_stock_threshold: Qty,
    pub lock_timeout_ms: u64,
    pub max_retry_attempts: u32,
    /// Name of the env var holding the Postgres URL (never the URL itself).
    pub database_url_env: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            overdraw_policy: OverdrawPolicy::Clamp,
            low_stock_threshold: Qty::ZERO,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
        }
    }
}

impl EngineSettings {
    /// Read every known pointer; absent keys keep their defaults, present
    /// keys of the wrong shape are an error.
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let mut s = Self::default();

        if let Some(v) = present(config, "/stock/overdraw_policy") {
            let raw = v
                .as_str()
                .ok_or_else(|| anyhow!("/stock/overdraw_policy must be a string"))?;
            s.overdraw_policy = raw.parse().map_err(|e: String| anyhow!(e))?;
        }

        if let Some(v) = present(config, "/stock/low_stock_threshold") {
            let raw = match v {
                Value::String(t) => t.clone(),
                Value::Number(n) => n.to_string(),
                _ => bail!("/stock/low_stock_threshold must be a quantity in tonnes"),
            };
            let q: Qty = raw
                .parse()
                .with_context(|| format!("/stock/low_stock_threshold: {raw}"))?;
            if q.is_negative() {
                bail!("/stock/low_stock_threshold must not be negative");
            }
            s.low_stock_threshold = q;
        }

        if let Some(v) = present(config, "/engine/lock_timeout_ms") {
            s.lock_timeout_ms = v
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| anyhow!("/engine/lock_timeout_ms must be a positive integer"))?;
        }

        if let Some(v) = present(config, "/reconcile/max_retry_attempts") {
            s.max_retry_attempts = v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow!("/reconcile/max_retry_attempts must be a positive integer"))?;
        }

        if let Some(v) = present(config, "/database/url_env") {
            let name = v
                .as_str()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| anyhow!("/database/url_env must name an environment variable"))?;
            s.database_url_env = name.to_string();
        }

        Ok(s)
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            overdraw_policy: self.overdraw_policy,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            max_retry_attempts: self.max_retry_attempts,
        }
    }
}

fn present<'a>(config: &'a Value, ptr: &str) -> Option<&'a Value> {
    config.pointer(ptr).filter(|v| !v.is_null())
}
