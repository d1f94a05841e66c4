//! JSON control messages and batch envelopes.

use parley_events::{event_names, ControlEvent};
use serde::{Deserialize, Serialize};

use crate::{Result, WireError};

/// One structured message: `{"type": ..., "seq": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub seq: u32,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ControlMessage {
    pub fn new(kind: impl Into<String>, seq: u32, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            seq,
            data,
        }
    }

    pub fn from_event<E: ControlEvent>(seq: u32, event: &E) -> Result<Self> {
        Ok(Self::new(E::NAME, seq, event.to_data()?))
    }

    pub fn is<E: ControlEvent>(&self) -> bool {
        self.kind == E::NAME
    }

    /// Decode the payload as `E`, checking the event name first.
    pub fn parse<E: ControlEvent>(&self) -> Result<E> {
        if !self.is::<E>() {
            return Err(WireError::UnexpectedType {
                expected: E::NAME,
                found: self.kind.clone(),
            });
        }
        Ok(E::from_data(self.data.clone())?)
    }
}

#[derive(Serialize, Deserialize)]
struct BatchEnvelope<M> {
    #[serde(rename = "type")]
    kind: String,
    messages: M,
}

/// A text frame on the wire: one message or a batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(ControlMessage),
    Batch(Vec<ControlMessage>),
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let is_batch = value.get("type").and_then(|t| t.as_str()) == Some(event_names::BATCH);
        if is_batch {
            let batch: BatchEnvelope<Vec<ControlMessage>> = serde_json::from_value(value)?;
            Ok(Self::Batch(batch.messages))
        } else {
            Ok(Self::Single(serde_json::from_value(value)?))
        }
    }

    pub fn encode(&self) -> Result<String> {
        let text = match self {
            Self::Single(message) => serde_json::to_string(message)?,
            Self::Batch(messages) => serde_json::to_string(&BatchEnvelope {
                kind: event_names::BATCH.to_string(),
                messages,
            })?,
        };
        Ok(text)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(messages) => messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages in their original order.
    pub fn into_messages(self) -> Vec<ControlMessage> {
        match self {
            Self::Single(message) => vec![message],
            Self::Batch(messages) => messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_events::{ErrorEvent, SpeechDetectedEvent};
    use serde_json::json;

    #[test]
    fn test_single_wire_shape() {
        let message = ControlMessage::from_event(3, &ErrorEvent::new("bad_frame", "too short")).unwrap();
        let text = Envelope::Single(message).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["data"]["code"], "bad_frame");
    }

    #[test]
    fn test_decode_single() {
        let text = r#"{"type":"speech.detected","seq":9,"data":{"confidence":0.9,"duration_ms":300}}"#;
        let Envelope::Single(message) = Envelope::decode(text).unwrap() else {
            panic!("expected single message");
        };
        let event: SpeechDetectedEvent = message.parse().unwrap();
        assert_eq!(event.duration_ms, 300);
    }

    #[test]
    fn test_decode_batch_preserves_order() {
        let text = json!({
            "type": "batch",
            "messages": [
                {"type": "response.delta", "seq": 4, "data": {"text": "a"}},
                {"type": "response.delta", "seq": 5, "data": {"text": "b"}},
                {"type": "response.delta", "seq": 6, "data": {"text": "c"}},
            ]
        })
        .to_string();
        let seqs: Vec<u32> = Envelope::decode(&text)
            .unwrap()
            .into_messages()
            .iter()
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let envelope = Envelope::decode(r#"{"type":"playback.complete","seq":1}"#).unwrap();
        assert_eq!(envelope.into_messages()[0].data, serde_json::Value::Null);
    }

    #[test]
    fn test_parse_wrong_type() {
        let message = ControlMessage::new("error", 0, json!({}));
        assert!(matches!(
            message.parse::<SpeechDetectedEvent>(),
            Err(WireError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"type":"x"}"#).is_err());
    }
}
