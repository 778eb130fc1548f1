//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default window for coalescing persistence calls.
const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Verbosity of a controller's logger. `Error` events are always emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Which presets may have their steps passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStepScope {
    /// Only presets currently in `activePresets`.
    Active,
    /// Active presets plus anything in `availablePresets`.
    #[default]
    Available,
}

/// Onboarding controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OnboardingConfig {
    pub log_level: LogLevel,
    /// Window for coalescing `save_state`/`save_progress` calls.
    #[serde(with = "duration_ms")]
    pub save_debounce: Duration,
    pub pass_step_scope: PassStepScope,
    /// Close the open hint when the wizard becomes `hidden`.
    pub close_hint_on_wizard_hide: bool,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            pass_step_scope: PassStepScope::default(),
            close_hint_on_wizard_hide: true,
        }
    }
}

impl OnboardingConfig {
    /// Defaults overridden by `TOURGUIDE_LOG_LEVEL` / `TOURGUIDE_SAVE_DEBOUNCE_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env_log_level() {
            config.log_level = level;
        }
        if let Some(debounce) = env_save_debounce() {
            config.save_debounce = debounce;
        }
        config
    }
}

/// Promo manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromoManagerConfig {
    pub log_level: LogLevel,
    /// Window for coalescing `save_progress` calls.
    #[serde(with = "duration_ms")]
    pub save_debounce: Duration,
    /// Window for coalescing subscriber notifications. Zero still merges
    /// the mutations made before the runtime next yields.
    #[serde(with = "duration_ms")]
    pub notify_debounce: Duration,
}

impl Default for PromoManagerConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            notify_debounce: Duration::ZERO,
        }
    }
}

impl PromoManagerConfig {
    /// Defaults overridden by `TOURGUIDE_LOG_LEVEL` / `TOURGUIDE_SAVE_DEBOUNCE_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env_log_level() {
            config.log_level = level;
        }
        if let Some(debounce) = env_save_debounce() {
            config.save_debounce = debounce;
        }
        config
    }
}

fn env_log_level() -> Option<LogLevel> {
    let raw = std::env::var("TOURGUIDE_LOG_LEVEL").ok()?;
    match raw.parse() {
        Ok(level) => Some(level),
        Err(e) => {
            tracing::warn!("Ignoring TOURGUIDE_LOG_LEVEL: {}", e);
            None
        }
    }
}

fn env_save_debounce() -> Option<Duration> {
    std::env::var("TOURGUIDE_SAVE_DEBOUNCE_MS")
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_millis)
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
