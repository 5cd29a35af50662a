//! Error types for the dialogue simulator.

use std::path::PathBuf;

use crate::model::profile::{EntityKind, Selector};

/// Failure talking to the generative text service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("No API credential configured for {provider}")]
    MissingCredential { provider: &'static str },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to {provider} failed: {reason}")]
    Transport {
        provider: &'static str,
        reason: String,
    },

    #[error("Request to {provider} timed out after {secs}s")]
    Timeout { provider: &'static str, secs: u64 },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response envelope from {provider}: {reason}")]
    Envelope {
        provider: &'static str,
        reason: String,
    },
}

/// Reasons a simulation aborts. Malformed evaluation output is never one of them.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Parent utterance is empty")]
    EmptyUtterance,

    #[error("No {kind} matches {selector}")]
    NotFound { kind: EntityKind, selector: Selector },

    #[error("Could not generate the child's response: {0}")]
    GenerationFailed(#[source] ServiceError),
}

impl SimulationError {
    /// Caller-correctable problems (bad input or selector).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SimulationError::EmptyUtterance | SimulationError::NotFound { .. }
        )
    }

    /// HTTP-equivalent status for a request-handling front end.
    pub fn http_status(&self) -> u16 {
        match self {
            SimulationError::EmptyUtterance => 400,
            SimulationError::NotFound { .. } => 404,
            SimulationError::GenerationFailed(_) => 502,
        }
    }
}

/// Failure loading personality / challenge collections.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Catalog {path} contains no personalities or no challenges")]
    Empty { path: PathBuf },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
