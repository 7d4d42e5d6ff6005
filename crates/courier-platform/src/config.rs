use std::time::Duration;

use anyhow::{Context, Result, bail};

pub const MIN_PASSCODE_ITERATIONS: u32 = 100_000;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub http_addr: String,
    pub settle_coalesce: Duration,
    pub passcode_iterations: u32,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());

        let settle_coalesce = match lookup("SETTLE_COALESCE_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .with_context(|| format!("SETTLE_COALESCE_MS must be milliseconds, got {raw:?}"))?,
            ),
            None => Duration::from_millis(25),
        };

        let passcode_iterations = match lookup("PASSCODE_ITERATIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("PASSCODE_ITERATIONS must be an integer, got {raw:?}"))?,
            None => 120_000,
        };
        if passcode_iterations < MIN_PASSCODE_ITERATIONS {
            bail!("PASSCODE_ITERATIONS must be at least {MIN_PASSCODE_ITERATIONS}");
        }

        Ok(Self {
            database_url,
            http_addr,
            settle_coalesce,
            passcode_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ServiceConfig::from_lookup("127.0.0.1:8080", |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "sqlite://courier.db")]).unwrap();
        assert_eq!(config.database_url, "sqlite://courier.db");
        assert_eq!(config.http_addr, "127.0.0.1:8080");
        assert_eq!(config.settle_coalesce, Duration::from_millis(25));
        assert_eq!(config.passcode_iterations, 120_000);
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL is required");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("HTTP_ADDR", "0.0.0.0:9000"),
            ("SETTLE_COALESCE_MS", "0"),
            ("PASSCODE_ITERATIONS", "200000"),
        ])
        .unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:9000");
        assert_eq!(config.settle_coalesce, Duration::ZERO);
        assert_eq!(config.passcode_iterations, 200_000);
    }

    #[test]
    fn weak_or_malformed_values_fail() {
        assert!(load(&[("DATABASE_URL", "x"), ("PASSCODE_ITERATIONS", "99999")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("PASSCODE_ITERATIONS", "lots")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("SETTLE_COALESCE_MS", "-5")]).is_err());
    }
}
