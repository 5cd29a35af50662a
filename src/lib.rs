//! Personality-conditioned parent/child dialogue simulation.
//!
//! A [`DialogueSimulator`] answers a parent's utterance in the voice of a
//! simulated child, then grades the parent's communication. Both steps go
//! through a [`GenerativeService`]; evaluation output that cannot be decoded
//! is replaced by a deterministic fallback, so callers only ever see
//! selection errors or generation failures.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;

pub use config::Settings;
pub use engine::catalog::{Catalog, CatalogSource, FallbackCatalog, FileCatalog};
pub use engine::llm_client::{GenerativeService, LlmClient, Purpose, SamplingParams};
pub use engine::simulator::DialogueSimulator;
pub use error::{CatalogError, ConfigError, ServiceError, SimulationError};
pub use model::evaluation::{EvaluationResult, ParentInputAnalysis, SimulationResult};
pub use model::profile::{ChallengeContext, PersonalityProfile, Selector};
