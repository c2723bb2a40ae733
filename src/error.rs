//! Error types with fix suggestions
//!
//! Error codes are grouped by area:
//! - STRAT-00x: configuration (fatal before any provisioning)
//! - STRAT-02x: deferred value graph misuse (programming errors)
//! - STRAT-03x: engine selection
//! - STRAT-04x: export settlement at run end

use thiserror::Error;

use crate::output::Fault;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum StratusError {
    #[error("STRAT-001: Required config key '{key}' is not set")]
    MissingConfig { key: String },

    #[error("STRAT-002: Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("STRAT-003: Invalid config override '{entry}' (expected key=value)")]
    BadConfigEntry { entry: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STRAT-020: Deferred value '{label}' was already settled")]
    AlreadySettled { label: String },

    #[error("STRAT-030: Unknown engine '{name}'. Available: sim")]
    UnknownEngine { name: String },

    #[error("STRAT-040: Export '{key}' failed: {fault}")]
    ExportFailed { key: String, fault: Fault },

    #[error(
        "STRAT-041: Export '{key}' ('{label}') was still pending after {waited_secs}s; \
         a provisioning call never completed"
    )]
    ExportPending {
        key: String,
        label: String,
        waited_secs: u64,
    },
}

impl FixSuggestion for StratusError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StratusError::MissingConfig { .. } => {
                Some("Add the key to the config file or pass --set key=value")
            }
            StratusError::ConfigParse(_) => {
                Some("Config must be a flat YAML map of string keys to string values")
            }
            StratusError::BadConfigEntry { .. } => Some("Use --set key=value"),
            StratusError::Io(_) => Some("Check file path and permissions"),
            StratusError::AlreadySettled { .. } => {
                Some("A deferred value is settled exactly once; check the engine adapter")
            }
            StratusError::UnknownEngine { .. } => Some("Use --engine sim"),
            StratusError::ExportFailed { .. } => {
                Some("Inspect the dependency chain in the error; the first resource named is the origin")
            }
            StratusError::ExportPending { .. } => {
                Some("Raise --timeout or check the engine for a stuck operation")
            }
        }
    }
}
