//! Stream framing for duplex voice sessions.
//!
//! One persistent bidirectional stream per session carries binary audio
//! frames and JSON control messages. Each direction numbers audio and control
//! independently. Inbound control messages are reassembled in order; outbound
//! high-frequency messages can be batched.

pub mod batch;
pub mod codec;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod reorder;
pub mod sequence;
mod stats;

pub use batch::{BatchConfig, Batcher};
pub use codec::{InboundDecoder, Inbound, OutboundEncoder, WireMessage};
pub use frame::{AudioFrame, Direction, FrameError};
pub use handshake::{negotiate, FeatureSet};
pub use message::{ControlMessage, Envelope};
pub use reorder::{ReorderBuffer, DEFAULT_REORDER_CAPACITY};
pub use sequence::{InputSequenceTracker, SequenceCheck, SequenceCounter};
pub use stats::{WireStats, WireStatsSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid control message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected} message, got {found}")]
    UnexpectedType {
        expected: &'static str,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, WireError>;
