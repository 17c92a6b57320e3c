use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use allocation_client::{
    DEFAULT_BASE_RETRY_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PERSISTENT_RETRIES,
    DEFAULT_MAX_TRANSIENT_RETRIES,
};
use config::{Config, Environment, File};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::warn;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

const ENV_PREFIX: &str = "ALLOCATION";

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("Failed to load configuration from {}: {}", path.display(), source))]
    Load {
        path: PathBuf,
        source: config::ConfigError,
    },

    #[snafu(display("Missing essential configuration keys: {}", keys.join(", ")))]
    MissingKeys { keys: Vec<&'static str> },

    #[snafu(display("Invalid api_url {}: {}", value, source))]
    InvalidApiUrl {
        value: String,
        source: url::ParseError,
    },
}

pub type Result<T, E = SettingsError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub addresses: PathBuf,
    pub proxies: PathBuf,
    pub query: PathBuf,
    pub output_json: PathBuf,
}

/// Resolved run configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: Url,
    pub paths: Paths,
    pub batch_size: usize,
    pub initial_retry_delay: Duration,
    pub max_persistent_retries: u32,
    pub request_timeout: Duration,
    pub max_transient_retries: u32,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    api_url: Option<String>,
    #[serde(default)]
    paths: RawPaths,
    #[serde(default)]
    settings: RawTuning,
}

#[derive(Debug, Default, Deserialize)]
struct RawPaths {
    addresses: Option<String>,
    proxies: Option<String>,
    query: Option<String>,
    output_json: Option<String>,
}

// Kept as untyped values so a bad number degrades to its default instead of
// failing deserialization.
#[derive(Debug, Default, Deserialize)]
struct RawTuning {
    batch_size: Option<config::Value>,
    initial_retry_delay: Option<config::Value>,
    max_persistent_retries_per_address: Option<config::Value>,
    request_timeout: Option<config::Value>,
    max_transient_retries: Option<config::Value>,
}

impl Settings {
    /// Loads the settings file (YAML or TOML by extension), then applies
    /// `ALLOCATION__*` environment overrides, e.g.
    /// `ALLOCATION__SETTINGS__BATCH_SIZE=25`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawSettings = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .context(LoadSnafu { path })?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let RawSettings {
            api_url,
            paths,
            settings,
        } = raw;

        let mut missing = Vec::new();
        let mut require = |name: &'static str, value: Option<String>| match value {
            Some(value) if !value.trim().is_empty() => Some(value),
            _ => {
                missing.push(name);
                None
            }
        };
        let api_url = require("api_url", api_url);
        let addresses = require("paths.addresses", paths.addresses);
        let proxies = require("paths.proxies", paths.proxies);
        let query = require("paths.query", paths.query);
        let output_json = require("paths.output_json", paths.output_json);

        let (Some(api_url), Some(addresses), Some(proxies), Some(query), Some(output_json)) =
            (api_url, addresses, proxies, query, output_json)
        else {
            return MissingKeysSnafu { keys: missing }.fail();
        };

        let api_url = Url::parse(api_url.trim()).context(InvalidApiUrlSnafu { value: api_url })?;

        Ok(Settings {
            api_url,
            paths: Paths {
                addresses: PathBuf::from(addresses),
                proxies: PathBuf::from(proxies),
                query: PathBuf::from(query),
                output_json: PathBuf::from(output_json),
            },
            batch_size: count_or_default(
                "batch_size",
                settings.batch_size,
                DEFAULT_BATCH_SIZE as u64,
                false,
            ) as usize,
            initial_retry_delay: seconds_or_default(
                "initial_retry_delay",
                settings.initial_retry_delay,
                DEFAULT_BASE_RETRY_DELAY,
            ),
            max_persistent_retries: count_or_default(
                "max_persistent_retries_per_address",
                settings.max_persistent_retries_per_address,
                u64::from(DEFAULT_MAX_PERSISTENT_RETRIES),
                true,
            ) as u32,
            request_timeout: seconds_or_default(
                "request_timeout",
                settings.request_timeout,
                DEFAULT_REQUEST_TIMEOUT,
            ),
            max_transient_retries: count_or_default(
                "max_transient_retries",
                settings.max_transient_retries,
                u64::from(DEFAULT_MAX_TRANSIENT_RETRIES),
                true,
            ) as u32,
        })
    }
}

fn as_number(name: &str, value: config::Value) -> Option<f64> {
    match value.clone().into_float() {
        Ok(number) => Some(number),
        Err(err) => {
            warn!(setting = name, value = %value, error = %err, "setting is not a number");
            None
        }
    }
}

/// Whole number that fits in `u32`; zero only where `allow_zero`.
fn count_or_default(name: &str, value: Option<config::Value>, default: u64, allow_zero: bool) -> u64 {
    let Some(value) = value else {
        return default;
    };
    match as_number(name, value) {
        Some(n)
            if n.is_finite()
                && n.fract() == 0.0
                && n <= f64::from(u32::MAX)
                && (n > 0.0 || (allow_zero && n == 0.0)) =>
        {
            n as u64
        }
        other => {
            warn!(setting = name, value = ?other, default, "invalid setting, using default");
            default
        }
    }
}

fn seconds_or_default(name: &str, value: Option<config::Value>, default: Duration) -> Duration {
    let Some(value) = value else {
        return default;
    };
    match as_number(name, value)
        .filter(|n| *n > 0.0)
        .and_then(|n| Duration::try_from_secs_f64(n).ok())
    {
        Some(duration) => duration,
        None => {
            warn!(setting = name, default_secs = default.as_secs_f64(), "invalid setting, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const COMPLETE_YAML: &str = r#"
api_url: "https://api.example.com/universal/graphql"
paths:
  addresses: "addresses.txt"
  proxies: "proxies.txt"
  query: "query.graphql"
  output_json: "results.json"
"#;

    fn load_yaml(content: &str) -> Result<Settings> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, content).unwrap();
        Settings::load(&path)
    }

    #[test]
    fn defaults_apply_when_tuning_is_absent() {
        let settings = load_yaml(COMPLETE_YAML).unwrap();

        assert_eq!(settings.api_url.as_str(), "https://api.example.com/universal/graphql");
        assert_eq!(settings.paths.addresses, PathBuf::from("addresses.txt"));
        assert_eq!(settings.paths.output_json, PathBuf::from("results.json"));
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.initial_retry_delay, DEFAULT_BASE_RETRY_DELAY);
        assert_eq!(settings.max_persistent_retries, DEFAULT_MAX_PERSISTENT_RETRIES);
        assert_eq!(settings.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(settings.max_transient_retries, DEFAULT_MAX_TRANSIENT_RETRIES);
    }

    #[test]
    fn explicit_tuning_is_used() {
        let yaml = format!(
            "{COMPLETE_YAML}settings:\n  batch_size: 25\n  initial_retry_delay: 2.5\n  max_persistent_retries_per_address: 0\n  request_timeout: 10\n  max_transient_retries: 1\n"
        );
        let settings = load_yaml(&yaml).unwrap();

        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.initial_retry_delay, Duration::from_millis(2500));
        assert_eq!(settings.max_persistent_retries, 0);
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.max_transient_retries, 1);
    }

    #[test]
    fn invalid_tuning_falls_back_to_defaults() {
        let yaml = format!(
            "{COMPLETE_YAML}settings:\n  batch_size: 0\n  initial_retry_delay: -3\n  max_persistent_retries_per_address: 2.5\n  request_timeout: \"soon\"\n"
        );
        let settings = load_yaml(&yaml).unwrap();

        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.initial_retry_delay, DEFAULT_BASE_RETRY_DELAY);
        assert_eq!(settings.max_persistent_retries, DEFAULT_MAX_PERSISTENT_RETRIES);
        assert_eq!(settings.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn missing_keys_are_reported_together() {
        let err = load_yaml("api_url: \"https://x.test\"\npaths:\n  query: \"q.graphql\"\n").unwrap_err();
        match err {
            SettingsError::MissingKeys { keys } => assert_eq!(
                keys,
                vec!["paths.addresses", "paths.proxies", "paths.output_json"]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_api_url_is_fatal() {
        let yaml = COMPLETE_YAML.replace("https://api.example.com/universal/graphql", "not a url");
        assert!(matches!(
            load_yaml(&yaml),
            Err(SettingsError::InvalidApiUrl { .. })
        ));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Settings::load(&dir.path().join("absent.yaml")),
            Err(SettingsError::Load { .. })
        ));
    }

    #[test]
    fn toml_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
api_url = "http://127.0.0.1:4000/graphql"

[paths]
addresses = "a.txt"
proxies = "p.txt"
query = "q.graphql"
output_json = "out.json"

[settings]
batch_size = 3
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.batch_size, 3);
        assert_eq!(settings.paths.proxies, PathBuf::from("p.txt"));
    }
}
