//! Control-message contracts shared by the wire layer and the session.
//!
//! Every structured message on the stream carries an event name and a JSON
//! payload. The payload types live here so producers and consumers agree on
//! field names; the envelope (`type`/`seq`/`data`) belongs to `parley-wire`.

use parley_duplex::DuplexMode;
use parley_truncation::{TruncationResult, TruncationType};
use parley_turn::TurnVerdict;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Event names as constants to prevent typos.
pub mod event_names {
    // Client -> server
    pub const SESSION_START: &str = "session.start";
    pub const SPEECH_DETECTED: &str = "speech.detected";
    pub const PLAYBACK_PROGRESS: &str = "playback.progress";
    pub const PLAYBACK_COMPLETE: &str = "playback.complete";
    /// Input audio as base64 when binary frames were not negotiated.
    pub const AUDIO_INPUT: &str = "audio.input";

    // Server -> client
    pub const SESSION_READY: &str = "session.ready";
    pub const TURN_VERDICT: &str = "turn.verdict";
    pub const RESPONSE_DELTA: &str = "response.delta";
    pub const RESPONSE_COMPLETE: &str = "response.complete";
    pub const RESPONSE_TRUNCATED: &str = "response.truncated";
    /// Output audio as base64 when binary frames were not negotiated.
    pub const AUDIO_OUTPUT: &str = "audio.output";
    pub const AUDIO_OUTPUT_META: &str = "audio.output.meta";
    pub const TRANSCRIPT_DELTA: &str = "transcript.delta";
    pub const STATE_CHANGE: &str = "state.change";
    pub const ERROR: &str = "error";

    /// Envelope wrapping several control messages.
    pub const BATCH: &str = "batch";
}

/// Feature names declared in the session handshake.
pub mod features {
    pub const BINARY_AUDIO: &str = "binary_audio";
    pub const BATCHING: &str = "batching";
}

/// A typed control-message payload with a fixed event name.
pub trait ControlEvent: Serialize + DeserializeOwned {
    const NAME: &'static str;

    fn to_data(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn from_data(data: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(data)
    }
}

macro_rules! control_event {
    ($ty:ty => $name:expr) => {
        impl ControlEvent for $ty {
            const NAME: &'static str = $name;
        }
    };
}

/// Wall-clock timestamp in milliseconds since epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Opening handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartEvent {
    #[serde(default)]
    pub features: Vec<String>,
}

/// Client-side VAD reported user speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechDetectedEvent {
    pub confidence: f32,
    pub duration_ms: u64,
}

/// Precise count of response characters already played to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgressEvent {
    pub spoken_chars: usize,
}

/// The client finished playing the current response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCompleteEvent {
    #[serde(default)]
    pub response_id: Option<String>,
}

/// Input audio chunk in the JSON fallback encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInputEvent {
    /// Audio sequence number, shared with binary input frames.
    pub seq: u32,
    /// Base64 PCM16 little-endian, 16 kHz mono.
    pub audio: String,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReadyEvent {
    pub session_id: String,
    /// Features both sides support.
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnVerdictEvent {
    #[serde(flatten)]
    pub verdict: TurnVerdict,
    pub is_partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDeltaEvent {
    pub response_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCompleteEvent {
    pub response_id: String,
    pub text: String,
    /// Whether the response was produced by a confirmed speculation.
    #[serde(default)]
    pub speculative: bool,
    #[serde(default)]
    pub latency_saved_ms: u64,
}

/// Sent when barge-in cut a response short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTruncatedEvent {
    pub response_id: String,
    pub truncation_type: TruncationType,
    pub spoken_text: String,
    pub unspoken_text: String,
    #[serde(default)]
    pub continuation_context: Option<String>,
    /// How long the client should fade out the audio still playing.
    #[serde(default)]
    pub fade_out_ms: u64,
    pub ts_ms: i64,
}

impl ResponseTruncatedEvent {
    pub fn from_result(response_id: impl Into<String>, result: &TruncationResult) -> Self {
        Self {
            response_id: response_id.into(),
            truncation_type: result.truncation_type,
            spoken_text: result.spoken_text.clone(),
            unspoken_text: result.unspoken_text.clone(),
            continuation_context: result.continuation_context.clone(),
            fade_out_ms: 0,
            ts_ms: now_ms(),
        }
    }
}

/// Output audio chunk in the JSON fallback encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputEvent {
    pub response_id: String,
    pub seq: u32,
    /// Base64 PCM16 little-endian, 24 kHz mono.
    pub audio: String,
}

/// Metadata accompanying an output audio frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputMetaEvent {
    pub response_id: String,
    /// Sequence number of the audio frame this describes.
    pub seq: u32,
    pub sample_rate: u32,
    pub duration_ms: u64,
    /// Text covered by this chunk, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Echo of the transcript the engine is reasoning about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDeltaEvent {
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub from: DuplexMode,
    pub to: DuplexMode,
    /// VAD threshold the client should apply in the new mode.
    pub vad_threshold: f32,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

control_event!(SessionStartEvent => event_names::SESSION_START);
control_event!(SpeechDetectedEvent => event_names::SPEECH_DETECTED);
control_event!(PlaybackProgressEvent => event_names::PLAYBACK_PROGRESS);
control_event!(PlaybackCompleteEvent => event_names::PLAYBACK_COMPLETE);
control_event!(AudioInputEvent => event_names::AUDIO_INPUT);
control_event!(SessionReadyEvent => event_names::SESSION_READY);
control_event!(TurnVerdictEvent => event_names::TURN_VERDICT);
control_event!(ResponseDeltaEvent => event_names::RESPONSE_DELTA);
control_event!(ResponseCompleteEvent => event_names::RESPONSE_COMPLETE);
control_event!(ResponseTruncatedEvent => event_names::RESPONSE_TRUNCATED);
control_event!(AudioOutputEvent => event_names::AUDIO_OUTPUT);
control_event!(AudioOutputMetaEvent => event_names::AUDIO_OUTPUT_META);
control_event!(TranscriptDeltaEvent => event_names::TRANSCRIPT_DELTA);
control_event!(StateChangeEvent => event_names::STATE_CHANGE);
control_event!(ErrorEvent => event_names::ERROR);

#[cfg(test)]
mod tests {
    use super::*;
    use parley_turn::{analyze, TurnContext, TurnSignal};

    #[test]
    fn test_session_start_deserialize_minimal() {
        let event = SessionStartEvent::from_data(serde_json::json!({})).unwrap();
        assert!(event.features.is_empty());
    }

    #[test]
    fn test_speech_detected_deserialize() {
        let json = r#"{"confidence": 0.8, "duration_ms": 200}"#;
        let event: SpeechDetectedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.duration_ms, 200);
        assert!((event.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_turn_verdict_is_flattened() {
        let verdict = analyze(
            &TurnSignal::new("What's the weather like today?", 1500, false),
            &TurnContext::default(),
        );
        let event = TurnVerdictEvent {
            verdict,
            is_partial: false,
        };
        let data = event.to_data().unwrap();
        assert_eq!(data["action"], "respond");
        assert_eq!(data["is_partial"], false);
        assert!(data.get("verdict").is_none());
    }

    #[test]
    fn test_truncated_uses_snake_case_type() {
        let result = parley_truncation::find_truncation_point("Hello world. More text.", 13);
        let event = ResponseTruncatedEvent::from_result("r1", &result);
        let data = event.to_data().unwrap();
        assert_eq!(data["truncation_type"], "sentence");
        assert_eq!(data["spoken_text"], "Hello world.");
    }

    #[test]
    fn test_state_change_modes() {
        let event = StateChangeEvent {
            from: DuplexMode::Listening,
            to: DuplexMode::Duplex,
            vad_threshold: 0.7,
            ts_ms: now_ms(),
        };
        let data = event.to_data().unwrap();
        assert_eq!(data["from"], "listening");
        assert_eq!(data["to"], "duplex");
    }

    #[test]
    fn test_names_are_unique() {
        let names = [
            SessionStartEvent::NAME,
            SpeechDetectedEvent::NAME,
            PlaybackProgressEvent::NAME,
            PlaybackCompleteEvent::NAME,
            AudioInputEvent::NAME,
            SessionReadyEvent::NAME,
            TurnVerdictEvent::NAME,
            ResponseDeltaEvent::NAME,
            ResponseCompleteEvent::NAME,
            ResponseTruncatedEvent::NAME,
            AudioOutputEvent::NAME,
            AudioOutputMetaEvent::NAME,
            TranscriptDeltaEvent::NAME,
            StateChangeEvent::NAME,
            ErrorEvent::NAME,
        ];
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
