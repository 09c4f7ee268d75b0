//! Application configuration loaded from environment variables.

use reservation::TotalSource;

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Server and engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `TOTAL_SOURCE` — `"self"` or `"external"` (default: `"self"`)
/// - `PG_DSN` — system-of-record connection string (optional)
/// - `HOLD_TTL_SECONDS_DEFAULT` — default hold TTL (default: `600`)
/// - `REAPER_INTERVAL_SECS` — sweep cadence (default: `1`)
/// - `REAPER_BATCH_LIMIT` — max holds per sweep (default: `200`)
/// - `ENABLE_EVENT_LOG` — expose the event feed (default: `true`)
/// - `FALLBACK_SEED` — canned seed, e.g. `"sku-123=10,sku-456=5"`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub total_source: TotalSource,
    pub pg_dsn: Option<String>,
    pub default_hold_ttl_seconds: i64,
    pub reaper_interval_secs: u64,
    pub reaper_batch_limit: usize,
    pub events_enabled: bool,
    pub fallback_seed: Vec<(String, i64)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let total_source = match env_str("TOTAL_SOURCE", "self").as_str() {
            "external" | "sor" => TotalSource::ExternallyFed,
            _ => TotalSource::SelfManaged,
        };
        Self {
            host: env_str("HOST", "0.0.0.0"),
            port: env_i64("PORT", 3000) as u16,
            log_level: env_str("RUST_LOG", "info"),
            total_source,
            pg_dsn: std::env::var("PG_DSN").ok(),
            default_hold_ttl_seconds: env_i64("HOLD_TTL_SECONDS_DEFAULT", 600),
            reaper_interval_secs: env_i64("REAPER_INTERVAL_SECS", 1) as u64,
            reaper_batch_limit: env_i64("REAPER_BATCH_LIMIT", 200) as usize,
            events_enabled: env_bool("ENABLE_EVENT_LOG", true),
            fallback_seed: parse_fallback_seed(&env_str(
                "FALLBACK_SEED",
                "sku-123=10,sku-456=5",
            )),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            total_source: TotalSource::SelfManaged,
            pg_dsn: None,
            default_hold_ttl_seconds: 600,
            reaper_interval_secs: 1,
            reaper_batch_limit: 200,
            events_enabled: true,
            fallback_seed: vec![("sku-123".to_string(), 10), ("sku-456".to_string(), 5)],
        }
    }
}

/// Parses `"sku-123=10,sku-456=5"` into seed pairs; malformed entries are
/// skipped.
fn parse_fallback_seed(raw: &str) -> Vec<(String, i64)> {
    raw.split(',')
        .filter_map(|entry| {
            let (sku, qty) = entry.trim().split_once('=')?;
            Some((sku.trim().to_string(), qty.trim().parse().ok()?))
        })
        .collect()
}
