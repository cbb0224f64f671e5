use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use punchclock_realtime::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hosted backend base URL. `None` runs on local storage only.
    pub backend_url: Option<String>,
    pub api_key: String,
    pub db_path: PathBuf,
    /// Overrides the stored signed-in user.
    pub user_id: Option<String>,
    pub reconnect: ReconnectConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = get("PUNCHCLOCK_BACKEND_URL");
        let api_key = get("PUNCHCLOCK_API_KEY").unwrap_or_default();
        if backend_url.is_some() && api_key.is_empty() {
            bail!("PUNCHCLOCK_API_KEY is required when PUNCHCLOCK_BACKEND_URL is set");
        }

        let defaults = ReconnectConfig::default();
        let base_ms: u64 = match get("PUNCHCLOCK_RECONNECT_BASE_MS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PUNCHCLOCK_RECONNECT_BASE_MS is not a number: {}", raw))?,
            None => defaults.base_delay.as_millis() as u64,
        };
        let max_attempts: u32 = match get("PUNCHCLOCK_RECONNECT_MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PUNCHCLOCK_RECONNECT_MAX_ATTEMPTS is not a number: {}", raw))?,
            None => defaults.max_attempts,
        };

        Ok(Self {
            backend_url,
            api_key,
            db_path: PathBuf::from(get("PUNCHCLOCK_DB_PATH").unwrap_or_else(|| "punchclock.db".into())),
            user_id: get("PUNCHCLOCK_USER_ID"),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_attempts,
            },
        })
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
    fn defaults_run_locally() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend_url, None);
        assert_eq!(config.db_path, PathBuf::from("punchclock.db"));
        assert_eq!(config.user_id, None);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn hosted_settings_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("PUNCHCLOCK_BACKEND_URL", "https://acme.example.co"),
            ("PUNCHCLOCK_API_KEY", "anon"),
            ("PUNCHCLOCK_USER_ID", "7"),
            ("PUNCHCLOCK_RECONNECT_BASE_MS", "250"),
            ("PUNCHCLOCK_RECONNECT_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.backend_url.as_deref(), Some("https://acme.example.co"));
        assert_eq!(config.user_id.as_deref(), Some("7"));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn backend_without_key_is_refused() {
        assert!(Config::from_lookup(lookup(&[("PUNCHCLOCK_BACKEND_URL", "https://x.example")])).is_err());
    }

    #[test]
    fn bad_numbers_are_refused() {
        assert!(Config::from_lookup(lookup(&[("PUNCHCLOCK_RECONNECT_BASE_MS", "soon")])).is_err());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[("PUNCHCLOCK_BACKEND_URL", "  "), ("PUNCHCLOCK_USER_ID", "")])).unwrap();
        assert_eq!(config.backend_url, None);
        assert_eq!(config.user_id, None);
    }
}
