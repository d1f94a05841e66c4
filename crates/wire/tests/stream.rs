//! Inbound and outbound stream behaviour across the public API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_events::{ResponseCompleteEvent, ResponseDeltaEvent, StateChangeEvent};
use parley_wire::{
    BatchConfig, ControlMessage, Envelope, FeatureSet, Inbound, InboundDecoder, OutboundEncoder,
    WireMessage, WireStats,
};
use serde_json::json;

fn control(kind: &str, seq: u32) -> WireMessage {
    WireMessage::Text(
        Envelope::Single(ControlMessage::new(kind, seq, json!({})))
            .encode()
            .unwrap(),
    )
}

fn delivered_seqs(items: &[Inbound]) -> Vec<u32> {
    items
        .iter()
        .filter_map(|item| match item {
            Inbound::Control(message) => Some(message.seq),
            Inbound::Audio { .. } => None,
        })
        .collect()
}

fn delta(text: &str) -> ResponseDeltaEvent {
    ResponseDeltaEvent {
        response_id: "r1".to_string(),
        text: text.to_string(),
    }
}

// ============================================================================
// Inbound reordering
// ============================================================================

mod inbound {
    use super::*;

    #[test]
    fn test_arrival_order_2_0_1_delivers_0_1_2() {
        let mut decoder = InboundDecoder::new(50, Arc::new(WireStats::new()));
        let mut delivered = Vec::new();
        for seq in [2, 0, 1] {
            delivered.extend(decoder.decode(control("playback.progress", seq)));
        }
        assert_eq!(delivered_seqs(&delivered), vec![0, 1, 2]);
    }

    #[test]
    fn test_batch_unwraps_in_order() {
        let mut decoder = InboundDecoder::new(50, Arc::new(WireStats::new()));
        let batch = Envelope::Batch(
            (0..5)
                .map(|seq| ControlMessage::new("speech.detected", seq, json!({})))
                .collect(),
        );
        let out = decoder.decode(WireMessage::Text(batch.encode().unwrap()));
        assert_eq!(delivered_seqs(&out), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_keeps_session_alive() {
        let stats = Arc::new(WireStats::new());
        let mut decoder = InboundDecoder::new(4, Arc::clone(&stats));
        // seq 0 is lost
        let mut delivered = Vec::new();
        for seq in 1..=10 {
            delivered.extend(decoder.decode(control("playback.progress", seq)));
        }
        let seqs = delivered_seqs(&delivered);
        assert!(!seqs.is_empty());
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stats.snapshot().reorder_overflows, 1);

        // Delivery continues in order afterwards.
        let next = decoder.decode(control("playback.progress", 11));
        assert_eq!(delivered_seqs(&next), vec![11]);
    }

    #[test]
    fn test_garbage_text_is_counted() {
        let stats = Arc::new(WireStats::new());
        let mut decoder = InboundDecoder::new(50, Arc::clone(&stats));
        assert!(decoder.decode(WireMessage::Text("{oops".into())).is_empty());
        assert_eq!(stats.snapshot().malformed_control, 1);
    }
}

// ============================================================================
// Outbound batching round trip
// ============================================================================

mod outbound {
    use super::*;

    #[test]
    fn test_batched_output_decodes_in_order() {
        let mut encoder = OutboundEncoder::new(BatchConfig::default(), Arc::new(WireStats::new()));
        encoder.set_features(FeatureSet::all());
        let now = Instant::now();

        let mut wire = Vec::new();
        for text in ["Hel", "lo", " there"] {
            wire.extend(encoder.encode_event(&delta(text), now).unwrap());
        }
        wire.extend(
            encoder
                .encode_event(
                    &ResponseCompleteEvent {
                        response_id: "r1".to_string(),
                        text: "Hello there".to_string(),
                        speculative: false,
                        latency_saved_ms: 0,
                    },
                    now,
                )
                .unwrap(),
        );

        assert_eq!(wire.len(), 1, "complete flushes everything as one batch");
        let WireMessage::Text(text) = &wire[0] else {
            panic!("expected text");
        };
        let messages = Envelope::decode(text).unwrap().into_messages();
        let kinds: Vec<&str> = messages.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["response.delta", "response.delta", "response.delta", "response.complete"]
        );
        let seqs: Vec<u32> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        let texts: Vec<String> = messages[..3]
            .iter()
            .map(|m| m.parse::<ResponseDeltaEvent>().unwrap().text)
            .collect();
        assert_eq!(texts.concat(), "Hello there");
    }

    #[test]
    fn test_window_expiry() {
        let mut encoder = OutboundEncoder::new(BatchConfig::default(), Arc::new(WireStats::new()));
        encoder.set_features(FeatureSet::all());
        let now = Instant::now();

        encoder.encode_event(&delta("a"), now).unwrap();
        let deadline = encoder.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(50));
        assert!(encoder.poll(now + Duration::from_millis(20)).unwrap().is_empty());
        assert_eq!(encoder.poll(deadline).unwrap().len(), 1);
        assert!(encoder.next_deadline().is_none());
    }

    #[test]
    fn test_state_change_sent_immediately() {
        let mut encoder = OutboundEncoder::new(BatchConfig::default(), Arc::new(WireStats::new()));
        encoder.set_features(FeatureSet::all());
        let event = StateChangeEvent {
            from: parley_duplex::DuplexMode::Listening,
            to: parley_duplex::DuplexMode::Duplex,
            vad_threshold: 0.7,
            ts_ms: 0,
        };
        assert_eq!(encoder.encode_event(&event, Instant::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_drain_flushes_pending_on_teardown() {
        let mut encoder = OutboundEncoder::new(BatchConfig::default(), Arc::new(WireStats::new()));
        encoder.set_features(FeatureSet::all());
        let now = Instant::now();
        encoder.encode_event(&delta("a"), now).unwrap();
        encoder.encode_event(&delta("b"), now).unwrap();
        assert_eq!(encoder.drain().unwrap().len(), 1);
        assert!(encoder.drain().unwrap().is_empty());
    }
}
