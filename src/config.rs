//! Configuration loader and validator for the pin scheduler.
//!
//! Settings come from an optional YAML file, then environment overrides.
//! The environment is read once, at startup, through a lookup function.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Secret(<unset>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub scheduler: Scheduler,
    pub publishing: Publishing,
    pub store: Store,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Server {
    pub bind_addr: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
        }
    }
}

/// Trigger authentication and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Scheduler {
    pub secret: Secret,
    /// Seconds to wait between two publish calls.
    pub default_delay: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            secret: Secret::default(),
            default_delay: 1.0,
        }
    }
}

/// Pinterest API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Publishing {
    pub token: Secret,
    pub api_base: String,
}

impl Default for Publishing {
    fn default() -> Self {
        Self {
            token: Secret::default(),
            api_base: crate::publisher::PINTEREST_API_BASE.into(),
        }
    }
}

/// GitHub repository acting as the batch queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Store {
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub token: Secret,
    pub api_base: String,
    /// Directory holding pending batches; empty means the repository root.
    pub pending_dir: String,
    pub processed_dir: String,
    pub batch_prefix: String,
    pub batch_suffix: String,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            owner: String::new(),
            name: String::new(),
            branch: "main".into(),
            token: Secret::default(),
            api_base: crate::store::GITHUB_API_BASE.into(),
            pending_dir: String::new(),
            processed_dir: "processed".into(),
            batch_prefix: "pins_bulk_".into(),
            batch_suffix: ".csv".into(),
        }
    }
}

impl Config {
    /// Apply environment-style overrides. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        if let Some(v) = get(&["CRON_SECRET", "SCHEDULER_SECRET"]) {
            self.scheduler.secret = Secret::new(v);
        }
        if let Some(v) = get(&["DEFAULT_DELAY"]) {
            self.scheduler.default_delay = v
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DEFAULT_DELAY is not a number: {v}")))?;
        }
        if let Some(v) = get(&["PUBLISHING_TOKEN", "PINTEREST_TOKEN"]) {
            self.publishing.token = Secret::new(v);
        }
        if let Some(v) = get(&["PUBLISHING_API_BASE"]) {
            self.publishing.api_base = v;
        }
        if let Some(v) = get(&["REPO_OWNER"]) {
            self.store.owner = v;
        }
        if let Some(v) = get(&["REPO_NAME"]) {
            self.store.name = v;
        }
        if let Some(v) = get(&["REPO_BRANCH"]) {
            self.store.branch = v;
        }
        if let Some(v) = get(&["GITHUB_TOKEN", "STORE_TOKEN"]) {
            self.store.token = Secret::new(v);
        }
        if let Some(v) = get(&["STORE_API_BASE"]) {
            self.store.api_base = v;
        }
        if let Some(v) = get(&["PENDING_DIR"]) {
            self.store.pending_dir = v;
        }
        if let Some(v) = get(&["PROCESSED_DIR"]) {
            self.store.processed_dir = v;
        }
        if let Some(v) = get(&["BATCH_PREFIX"]) {
            self.store.batch_prefix = v;
        }
        if let Some(v) = get(&["BATCH_SUFFIX"]) {
            self.store.batch_suffix = v;
        }
        if let Some(v) = get(&["BIND_ADDR"]) {
            self.server.bind_addr = v;
        }
        Ok(())
    }

    /// Structural checks that hold regardless of what a run needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind_addr must be non-empty".into()));
        }
        delay_from_secs(self.scheduler.default_delay)?;
        if self.store.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("store.branch must be non-empty".into()));
        }
        if self.store.processed_dir.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("store.processed_dir must be non-empty".into()));
        }
        if self.store.processed_dir.trim_matches('/') == self.store.pending_dir.trim_matches('/') {
            return Err(ConfigError::Invalid(
                "store.processed_dir must differ from store.pending_dir".into(),
            ));
        }
        if self.store.batch_prefix.is_empty() && self.store.batch_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "store.batch_prefix or store.batch_suffix must be set".into(),
            ));
        }
        Ok(())
    }

    pub fn trigger_secret(&self) -> Result<&str, ConfigError> {
        if self.scheduler.secret.is_empty() {
            return Err(ConfigError::Missing("CRON_SECRET"));
        }
        Ok(self.scheduler.secret.expose())
    }

    /// Settings every run needs before the first remote call.
    pub fn require_run_settings(&self) -> Result<(), ConfigError> {
        self.trigger_secret()?;
        if self.publishing.token.is_empty() {
            return Err(ConfigError::Missing("PUBLISHING_TOKEN"));
        }
        if self.store.owner.trim().is_empty() {
            return Err(ConfigError::Missing("REPO_OWNER"));
        }
        if self.store.name.trim().is_empty() {
            return Err(ConfigError::Missing("REPO_NAME"));
        }
        if self.store.token.is_empty() {
            return Err(ConfigError::Missing("GITHUB_TOKEN"));
        }
        Ok(())
    }

    pub fn default_delay(&self) -> Result<Duration, ConfigError> {
        delay_from_secs(self.scheduler.default_delay)
    }
}

/// Convert a pacing delay in (fractional) seconds.
pub fn delay_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::Invalid(format!(
            "delay must be a non-negative number of seconds in range, got {secs}"
        ))
    })
}

/// Load configuration from the process environment, on top of an optional
/// YAML file.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with(path, |key| std::env::var(key).ok())
}

pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Config::default(),
    };
    cfg.apply_env(lookup)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Example YAML accepted by [`load`].
pub fn example() -> &'static str {
    r#"server:
  bind_addr: "0.0.0.0:8080"

scheduler:
  secret: "YOUR_CRON_SECRET"
  default_delay: 1.0

publishing:
  token: "YOUR_PINTEREST_TOKEN"
  api_base: "https://api.pinterest.com/"

store:
  owner: "acme"
  name: "pin-queue"
  branch: "main"
  token: "YOUR_GITHUB_TOKEN"
  api_base: "https://api.github.com/"
  pending_dir: ""
  processed_dir: "processed"
  batch_prefix: "pins_bulk_"
  batch_suffix: ".csv"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.validate().unwrap();
        cfg.require_run_settings().unwrap();
        assert_eq!(cfg.store.owner, "acme");
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = load_with(None, env(&[])).unwrap();
        assert_eq!(cfg.store.branch, "main");
        assert_eq!(cfg.store.processed_dir, "processed");
        assert_eq!(cfg.default_delay().unwrap(), Duration::from_secs(1));
        assert!(matches!(
            cfg.require_run_settings(),
            Err(ConfigError::Missing("CRON_SECRET"))
        ));
    }

    #[test]
    fn env_overrides_and_fallback_keys() {
        let cfg = load_with(
            None,
            env(&[
                ("SCHEDULER_SECRET", "s3cret"),
                ("PINTEREST_TOKEN", "pin"),
                ("REPO_OWNER", "acme"),
                ("REPO_NAME", "queue"),
                ("REPO_BRANCH", "batches"),
                ("STORE_TOKEN", "gh"),
                ("DEFAULT_DELAY", "0.25"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.trigger_secret().unwrap(), "s3cret");
        assert_eq!(cfg.publishing.token.expose(), "pin");
        assert_eq!(cfg.store.branch, "batches");
        assert_eq!(cfg.default_delay().unwrap(), Duration::from_millis(250));
        cfg.require_run_settings().unwrap();
    }

    #[test]
    fn primary_key_wins_over_fallback() {
        let cfg = load_with(
            None,
            env(&[("CRON_SECRET", "primary"), ("SCHEDULER_SECRET", "fallback")]),
        )
        .unwrap();
        assert_eq!(cfg.trigger_secret().unwrap(), "primary");
    }

    #[test]
    fn blank_env_value_counts_as_unset() {
        let cfg = load_with(None, env(&[("REPO_BRANCH", "  ")])).unwrap();
        assert_eq!(cfg.store.branch, "main");
    }

    #[test]
    fn missing_run_settings_are_named() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.publishing.token = Secret::default();
        assert!(matches!(
            cfg.require_run_settings(),
            Err(ConfigError::Missing("PUBLISHING_TOKEN"))
        ));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.store.token = Secret::default();
        assert!(matches!(
            cfg.require_run_settings(),
            Err(ConfigError::Missing("GITHUB_TOKEN"))
        ));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.store.owner = "".into();
        assert!(matches!(
            cfg.require_run_settings(),
            Err(ConfigError::Missing("REPO_OWNER"))
        ));
    }

    #[test]
    fn invalid_delay_rejected() {
        let err = load_with(None, env(&[("DEFAULT_DELAY", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = load_with(None, env(&[("DEFAULT_DELAY", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("non-negative")));

        let err = load_with(None, env(&[("DEFAULT_DELAY", "1e300")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn processed_dir_must_differ_from_pending() {
        let err = load_with(
            None,
            env(&[("PENDING_DIR", "queue"), ("PROCESSED_DIR", "queue/")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("processed_dir")));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("YOUR_GITHUB_TOKEN"));
        assert!(!dbg.contains("YOUR_CRON_SECRET"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn load_from_file_then_env() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load_with(Some(&p), env(&[("REPO_NAME", "other")])).unwrap();
        assert_eq!(cfg.store.owner, "acme");
        assert_eq!(cfg.store.name, "other");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let p = td.path().join("absent.yaml");
        assert!(matches!(load_with(Some(&p), env(&[])), Err(ConfigError::Io(_))));
    }
}
