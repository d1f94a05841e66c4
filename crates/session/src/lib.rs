//! Per-session orchestration.
//!
//! A session owns three tasks. The inbound task decodes transport messages,
//! the actor owns all turn, speculation and duplex state, and the outbound
//! task sequences, batches and encodes everything sent back. Response
//! generation and synthesis run in a fourth, cancellable task per response.

mod actor;
mod config;
mod response;
mod session;
pub mod stubs;
mod synth;

pub use config::{default_config_path, load_config, load_default_config, ConfigError, EngineConfig};
pub use session::{Session, SessionDeps, SessionHandle, TranscriptEvent};
pub use synth::{AudioStream, SpeechSynthesizer, SynthesisError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;
