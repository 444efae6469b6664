//! Application configuration loading for CLI defaults and credentials.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use blupen_core::{
    BaseUrls, CredentialBundle, Credentials, HttpSettings, RetrySettings, RunnerSettings, Service,
    Window,
};
use chrono::NaiveDate;
use serde::Deserialize;

/// Content directory used when neither the config file nor the CLI names one.
pub const DEFAULT_CONTENT_DIR: &str = "content";

/// Log levels accepted by `log_level`.
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory for snapshots and media.
    pub content_dir: Option<PathBuf>,
    /// Default log level when neither `RUST_LOG` nor a CLI flag sets one.
    pub log_level: Option<String>,
    /// Download media after acquisition.
    pub download_media: Option<bool>,
    /// Item cap across all terms of a query.
    pub max_length: Option<usize>,
    /// Retry tuning.
    #[serde(default)]
    pub retry: RetrySection,
    /// HTTP client timeouts.
    #[serde(default)]
    pub http: HttpSection,
    /// Date window.
    #[serde(default)]
    pub window: WindowSection,
    /// Credential bundles per service.
    #[serde(default)]
    pub credentials: CredentialsSection,
    /// API base URL overrides.
    #[serde(default)]
    pub base_urls: BaseUrls,
}

/// `[retry]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
}

/// `[http]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

/// `[window]` table. Dates are quoted `YYYY-MM-DD` strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSection {
    pub start_date: Option<NaiveDate>,
    pub stop_date: Option<NaiveDate>,
}

/// `[credentials]` table: one array of bundles per service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    #[serde(default)]
    pub twitter: Vec<CredentialBundle>,
    #[serde(default)]
    pub flickr: Vec<CredentialBundle>,
    #[serde(default)]
    pub tumblr: Vec<CredentialBundle>,
    #[serde(default)]
    pub instagram: Vec<CredentialBundle>,
}

impl CredentialsSection {
    fn by_service(&self) -> [(Service, &[CredentialBundle]); 4] {
        [
            (Service::Twitter, self.twitter.as_slice()),
            (Service::Flickr, self.flickr.as_slice()),
            (Service::Tumblr, self.tumblr.as_slice()),
            (Service::Instagram, self.instagram.as_slice()),
        ]
    }
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = &self.log_level
            && !LOG_LEVELS.contains(&level.as_str())
        {
            bail!(
                "Invalid config value for `log_level`: {level}. Expected one of: {}",
                LOG_LEVELS.join(", ")
            );
        }

        if let Some(max_length) = self.max_length
            && max_length == 0
        {
            bail!("Invalid config value for `max_length`: 0. Expected at least 1");
        }

        if let Some(attempts) = self.retry.max_attempts
            && !(1..=10).contains(&attempts)
        {
            bail!("Invalid config value for `retry.max_attempts`: {attempts}. Expected range: 1..=10");
        }
        validate_delay_secs("retry.base_delay_secs", self.retry.base_delay_secs)?;
        validate_delay_secs("retry.max_delay_secs", self.retry.max_delay_secs)?;
        let retry = self.retry_settings();
        if retry.max_delay_secs < retry.base_delay_secs {
            bail!(
                "Invalid retry config: `max_delay_secs` ({}) is below `base_delay_secs` ({})",
                retry.max_delay_secs,
                retry.base_delay_secs
            );
        }

        validate_timeout_secs("http.connect_timeout_secs", self.http.connect_timeout_secs)?;
        validate_timeout_secs("http.read_timeout_secs", self.http.read_timeout_secs)?;

        if let (Some(start), Some(stop)) = (self.window.start_date, self.window.stop_date)
            && start > stop
        {
            bail!("Invalid window: `start_date` {start} is after `stop_date` {stop}");
        }

        for (service, bundles) in self.credentials.by_service() {
            validate_bundles(service, bundles)?;
        }

        Ok(())
    }

    /// Retry tuning with defaults filled in.
    #[must_use]
    pub fn retry_settings(&self) -> RetrySettings {
        let defaults = RetrySettings::default();
        RetrySettings {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_secs: self.retry.base_delay_secs.unwrap_or(defaults.base_delay_secs),
            max_delay_secs: self.retry.max_delay_secs.unwrap_or(defaults.max_delay_secs),
        }
    }

    /// HTTP timeouts with defaults filled in.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        let defaults = HttpSettings::default();
        HttpSettings {
            connect_timeout_secs: self
                .http
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            read_timeout_secs: self
                .http
                .read_timeout_secs
                .unwrap_or(defaults.read_timeout_secs),
        }
    }

    /// Credential pools for every configured service.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::default();
        for (service, bundles) in self.credentials.by_service() {
            if !bundles.is_empty() {
                credentials.insert(service, bundles.to_vec());
            }
        }
        credentials
    }

    /// Runner settings from this file alone, before CLI overrides.
    #[must_use]
    pub fn runner_settings(&self) -> RunnerSettings {
        let content_dir = self
            .content_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR));
        RunnerSettings {
            content_dir,
            retry: self.retry_settings(),
            http: self.http_settings(),
            window: Window::new(self.window.start_date, self.window.stop_date),
            max_length: self.max_length,
            download_media: self.download_media.unwrap_or(true),
            base_urls: self.base_urls.clone(),
        }
    }
}

fn validate_delay_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if value > 3600 {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 0..=3600");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

fn validate_bundles(service: Service, bundles: &[CredentialBundle]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for bundle in bundles {
        let name = bundle.worker_name.trim();
        if name.is_empty() {
            bail!("Invalid `credentials.{service}` entry: `worker_name` must not be empty");
        }
        if !seen.insert(name) {
            bail!("Invalid `credentials.{service}` entry: duplicate worker_name '{name}'");
        }
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config, or defaults when no file was read.
    pub config: FileConfig,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/blupen/config.toml`
/// 2. `$HOME/.config/blupen/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("blupen").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("blupen")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` when given, otherwise from the default path
/// if a file exists there.
///
/// An explicit path that does not exist is an error; a missing default file
/// is not.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let cfg: FileConfig = toml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
content_dir = "/srv/blupen"
log_level = "debug"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.content_dir, Some(PathBuf::from("/srv/blupen")));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert!(cfg.max_length.is_none());
        assert_eq!(cfg.retry_settings(), RetrySettings::default());
    }

    #[test]
    fn test_parse_config_full_document() {
        let cfg = parse_config_str(
            r#"
content_dir = "content"
download_media = false
max_length = 500

[retry]
max_attempts = 4
base_delay_secs = 2
max_delay_secs = 30

[http]
connect_timeout_secs = 5
read_timeout_secs = 60

[window]
start_date = "2013-01-01"
stop_date = "2013-12-31"

[[credentials.twitter]]
worker_name = "alpha"
token = "bearer-a"

[[credentials.twitter]]
worker_name = "beta"
token = "bearer-b"

[[credentials.flickr]]
worker_name = "gamma"
key = "flickr-key"

[base_urls]
twitter = "http://127.0.0.1:9000"
"#,
        )
        .expect("full config should parse");

        let settings = cfg.runner_settings();
        assert!(!settings.download_media);
        assert_eq!(settings.max_length, Some(500));
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.http.read_timeout_secs, 60);
        assert_eq!(
            settings.window.start,
            NaiveDate::from_ymd_opt(2013, 1, 1)
        );
        assert_eq!(
            settings.base_urls.twitter.as_deref(),
            Some("http://127.0.0.1:9000")
        );

        let credentials = cfg.credentials();
        assert_eq!(
            credentials.pool(Service::Twitter).worker_names(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert_eq!(credentials.pool(Service::Flickr).len(), 1);
        assert!(credentials.pool(Service::Tumblr).is_empty());
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_log_level() {
        let err = parse_config_str(r#"log_level = "loud""#).expect_err("invalid level expected");
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_retry_attempts() {
        let err = parse_config_str("[retry]\nmax_attempts = 0").expect_err("0 is below range");
        assert!(err.to_string().contains("retry.max_attempts"));
    }

    #[test]
    fn test_parse_config_rejects_max_delay_below_base() {
        let err = parse_config_str("[retry]\nbase_delay_secs = 10\nmax_delay_secs = 5")
            .expect_err("max below base expected");
        assert!(err.to_string().contains("max_delay_secs"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str("[http]\nconnect_timeout_secs = 0")
            .expect_err("invalid timeout expected");
        assert!(err.to_string().contains("http.connect_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_inverted_window() {
        let err = parse_config_str("[window]\nstart_date = \"2014-01-01\"\nstop_date = \"2013-01-01\"")
            .expect_err("inverted window expected");
        assert!(err.to_string().contains("start_date"));
    }

    #[test]
    fn test_parse_config_rejects_duplicate_worker_names() {
        let err = parse_config_str(
            r#"
[[credentials.tumblr]]
worker_name = "alpha"
key = "a"

[[credentials.tumblr]]
worker_name = "alpha"
key = "b"
"#,
        )
        .expect_err("duplicate worker expected");
        assert!(err.to_string().contains("duplicate worker_name"));
    }

    #[test]
    fn test_parse_config_rejects_zero_max_length() {
        let err = parse_config_str("max_length = 0").expect_err("zero cap expected");
        assert!(err.to_string().contains("max_length"));
    }

    #[test]
    fn test_load_config_explicit_missing_path_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        let err = load_config(Some(&missing)).expect_err("missing explicit file");
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_load_config_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_length = 10\n").unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.config.max_length, Some(10));
    }

    #[test]
    fn test_load_config_default_path_missing_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let prev = std::env::var_os("XDG_CONFIG_HOME");
        // SAFETY: test isolates env change and restores on drop.
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", temp.path());
        }
        let _restore = RestoreEnv::new("XDG_CONFIG_HOME", prev);

        let loaded = load_config(None).unwrap();
        assert!(!loaded.loaded_from_file);
        assert_eq!(
            loaded.path,
            Some(temp.path().join("blupen").join("config.toml"))
        );
        assert_eq!(
            loaded.config.runner_settings().content_dir,
            PathBuf::from(DEFAULT_CONTENT_DIR)
        );
    }

    /// Restores an env var to its previous value (or removes it) when dropped.
    struct RestoreEnv {
        key: &'static str,
        value: Option<std::ffi::OsString>,
    }
    impl RestoreEnv {
        fn new(key: &'static str, value: Option<std::ffi::OsString>) -> Self {
            Self { key, value }
        }
    }
    impl Drop for RestoreEnv {
        fn drop(&mut self) {
            // SAFETY: test restores env to prior state.
            match &self.value {
                Some(v) => unsafe { std::env::set_var(self.key, v) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }
}
