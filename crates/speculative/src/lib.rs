//! Speculative response generation.
//!
//! Starts generating a reply from a partial transcript before the turn is
//! confirmed, then either keeps the work (saving latency) or throws it away
//! once the transcript has moved on.

mod divergence;
mod executor;
mod generator;
pub mod testing;

pub use divergence::divergence;
pub use executor::{
    ConfirmedSpeculation, SpeculationConfig, SpeculationOutcome, SpeculationPhase,
    SpeculationState, SpeculationStats, SpeculativeExecutor,
};
pub use generator::{
    spawn_generation, GenerationHandle, GenerationRequest, GenerationStatus, ResponseGenerator,
    TokenStream,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generator backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;
