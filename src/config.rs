//! Application-level configuration loading: quiz rules, polling cadence and chain parameters.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::services::identity_service::ChainParams;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZCHAIN_BACK_CONFIG_PATH";

const DEFAULT_MIN_DURATION_SECS: u64 = 60;
const DEFAULT_MAX_DURATION_SECS: u64 = 3_600;
const DEFAULT_DURATION_SECS: u64 = 300;
const DEFAULT_MIN_OPTIONS: usize = 2;
const DEFAULT_MAX_OPTIONS: usize = 6;
const DEFAULT_SYNC_INTERVAL_MS: u64 = 1_000;
const DEFAULT_VOTE_ATTEMPTS: usize = 5;

/// Bounds a new quiz has to satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizRules {
    pub min_duration: Duration,
    pub max_duration: Duration,
    /// Window used when a create request does not name one.
    pub default_duration: Duration,
    pub min_options: usize,
    pub max_options: usize,
}

impl Default for QuizRules {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(DEFAULT_MIN_DURATION_SECS),
            max_duration: Duration::from_secs(DEFAULT_MAX_DURATION_SECS),
            default_duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            min_options: DEFAULT_MIN_OPTIONS,
            max_options: DEFAULT_MAX_OPTIONS,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub rules: QuizRules,
    /// Period of the polling sync loop and of the expiry reaper.
    pub sync_interval: Duration,
    /// Conditional-write attempts a vote makes before giving up.
    pub vote_attempts: usize,
    /// Network the identity session asks the wallet to switch to.
    pub chain: ChainParams,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        chain_id = %app_config.chain.chain_id,
                        sync_interval_ms = app_config.sync_interval.as_millis() as u64,
                        "loaded quiz configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document; absent keys keep their default.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    min_duration_secs: u64,
    max_duration_secs: u64,
    default_duration_secs: u64,
    min_options: usize,
    max_options: usize,
    sync_interval_ms: u64,
    vote_attempts: usize,
    chain: ChainParams,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            default_duration_secs: DEFAULT_DURATION_SECS,
            min_options: DEFAULT_MIN_OPTIONS,
            max_options: DEFAULT_MAX_OPTIONS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            vote_attempts: DEFAULT_VOTE_ATTEMPTS,
            chain: ChainParams::default(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let min_duration = Duration::from_secs(value.min_duration_secs);
        let max_duration = Duration::from_secs(value.max_duration_secs.max(value.min_duration_secs));
        let default_duration =
            Duration::from_secs(value.default_duration_secs).clamp(min_duration, max_duration);
        let min_options = value.min_options.max(DEFAULT_MIN_OPTIONS);

        Self {
            rules: QuizRules {
                min_duration,
                max_duration,
                default_duration,
                min_options,
                max_options: value.max_options.max(min_options),
            },
            sync_interval: Duration::from_millis(value.sync_interval_ms.max(1)),
            vote_attempts: value.vote_attempts.max(1),
            chain: value.chain,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
