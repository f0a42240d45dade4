//! Asynchronous job tracking for an external content generator.
//!
//! A submission returns a job id immediately; the generator runs detached and
//! its output is later discovered on disk, claimed and attributed to exactly
//! one job.

pub mod artifact;
pub mod claims;
pub mod clock;
pub mod content;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod generator;
pub mod history;
pub mod locator;
mod probe;
pub mod resolver;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use claims::ClaimRegistry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineState, JobEngine};
pub use error::{EngineResult, JobError};
pub use generator::{
    GenerationRequest, GeneratorBackend, GeneratorConfig, GeneratorError, ProcessGenerator,
};
pub use history::HistoryLocator;
pub use locator::{ExtensionFilter, FileLocator};
pub use resolver::JobResolver;
pub use store::JobStore;
pub use types::*;
