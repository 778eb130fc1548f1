//! Error types for tourguide.

/// Top-level error type for the controllers.
///
/// Every variant carries plain strings so a single outcome can be cloned
/// out to all callers waiting on one coalesced (debounced) execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Unknown promo: {0}")]
    UnknownPromo(String),

    #[error("Listener for {event} failed: {reason}")]
    Listener { event: String, reason: String },

    #[error("Condition helper {helper} rejected its arguments: {reason}")]
    ConditionArgs { helper: String, reason: String },

    #[error("Coalesced task was dropped before it ran")]
    Cancelled,
}

/// Catalog validation errors, raised once when presets/promos are loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Duplicate preset slug: {0}")]
    DuplicatePreset(String),

    #[error("Preset {preset} declares step {step} more than once")]
    DuplicateStep { preset: String, step: String },

    #[error("Combined preset {0} has no internal presets")]
    EmptyCombined(String),

    #[error("Combined preset {combined} references unknown preset {target}")]
    UnknownTarget { combined: String, target: String },

    #[error("Combined preset {combined} targets {target}, which is not an internal preset")]
    TargetNotInternal { combined: String, target: String },

    #[error("Combined preset {combined} default target {target} is not one of its internal presets")]
    InvalidDefaultTarget { combined: String, target: String },

    #[error("Duplicate promo group slug: {0}")]
    DuplicateGroup(String),

    #[error("Duplicate promo slug: {0}")]
    DuplicatePromo(String),

    #[error("Failed to parse catalog: {0}")]
    Parse(String),
}

/// Errors surfaced by host persistence callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to fetch progress: {0}")]
    Fetch(String),

    #[error("Failed to save {what}: {reason}")]
    Save { what: String, reason: String },

    #[error("Storage quota exceeded while writing {key}")]
    QuotaExceeded { key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for tourguide.
pub type Result<T> = std::result::Result<T, Error>;
