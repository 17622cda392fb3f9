use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Where customer and offer rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// PostgreSQL through sqlx; the production backend.
    Postgres,
    /// Process-local maps; for local development and tests.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!(
                "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Postgres => write!(f, "postgres"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub lead_dedup_ttl_secs: u64,
    pub history_retention_months: u32,
    /// Requests per second per client IP; 0 disables rate limiting.
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub job_trigger_token: Option<String>,
}

impl Default for Config {
    /// In-memory defaults, as used by tests and local runs without a database.
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            database_url: None,
            port: 3000,
            db_max_connections: 10,
            lead_dedup_ttl_secs: 300,
            history_retention_months: 6,
            rate_limit_per_second: 0,
            rate_limit_burst: 20,
            job_trigger_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, validating every value.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_backend = match non_empty("STORAGE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StorageBackend::Postgres,
        };

        let database_url = non_empty("DB_URL").or_else(|| non_empty("DATABASE_URL"));
        if let Some(ref url) = database_url {
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
            }
        }
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DB_URL or DATABASE_URL environment variable required for postgres storage");
        }

        let port = parse_or(&non_empty, "PORT", 3000u16)
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let db_max_connections = parse_or(&non_empty, "DB_MAX_CONNECTIONS", 10u32)?;
        if db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        let lead_dedup_ttl_secs = parse_or(&non_empty, "LEAD_DEDUP_TTL_SECS", 300u64)?;

        let history_retention_months = parse_or(&non_empty, "HISTORY_RETENTION_MONTHS", 6u32)?;
        if !(3..=6).contains(&history_retention_months) {
            anyhow::bail!(
                "HISTORY_RETENTION_MONTHS must be between 3 and 6, got {}",
                history_retention_months
            );
        }

        let rate_limit_per_second = parse_or(&non_empty, "RATE_LIMIT_PER_SECOND", 10u64)?;
        let rate_limit_burst = parse_or(&non_empty, "RATE_LIMIT_BURST", 20u32)?;

        let config = Self {
            storage_backend,
            database_url,
            port,
            db_max_connections,
            lead_dedup_ttl_secs,
            history_retention_months,
            rate_limit_per_second,
            rate_limit_burst,
            job_trigger_token: non_empty("JOB_TRIGGER_TOKEN"),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Storage backend: {}", config.storage_backend);
        if let Some(ref url) = config.database_url {
            let prefix: String = url.chars().take(20).collect();
            tracing::debug!("Database URL: {}...", prefix);
        }
        tracing::debug!("Server Port: {}", config.port);
        if config.job_trigger_token.is_none() {
            tracing::warn!("JOB_TRIGGER_TOKEN not set; job endpoint is unauthenticated");
        }

        Ok(config)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DB_URL"));
    }

    #[test]
    fn test_memory_backend_needs_no_database() {
        let config = Config::from_lookup(lookup(&[("STORAGE_BACKEND", "memory")])).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.port, 3000);
        assert_eq!(config.history_retention_months, 6);
        assert_eq!(config.rate_limit_per_second, 10);
    }

    #[test]
    fn test_database_url_scheme_validated() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "mysql://localhost/cdp")]))
            .unwrap_err();
        assert!(err.to_string().contains("postgres"));

        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/cdp")])).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Postgres);
    }

    #[test]
    fn test_retention_window_bounds() {
        for bad in ["2", "7", "abc"] {
            let result = Config::from_lookup(lookup(&[
                ("STORAGE_BACKEND", "memory"),
                ("HISTORY_RETENTION_MONTHS", bad),
            ]));
            assert!(result.is_err(), "retention {} should be rejected", bad);
        }
        let config = Config::from_lookup(lookup(&[
            ("STORAGE_BACKEND", "memory"),
            ("HISTORY_RETENTION_MONTHS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.history_retention_months, 3);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("STORAGE_BACKEND", "memory"),
            ("PORT", "99999"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!("sqlite".parse::<StorageBackend>().is_err());
        assert_eq!(
            "Memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
    }
}
