//! Session-level inbound decoding and outbound encoding.

use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parley_events::{AudioInputEvent, AudioOutputEvent, AudioOutputMetaEvent, ControlEvent};

use crate::batch::{BatchConfig, Batcher};
use crate::frame::{pcm_duration_ms, AudioFrame, Direction, OUTPUT_SAMPLE_RATE};
use crate::handshake::FeatureSet;
use crate::message::{ControlMessage, Envelope};
use crate::reorder::{Admission, ReorderBuffer};
use crate::sequence::{InputSequenceTracker, SequenceCheck, SequenceCounter};
use crate::stats::WireStats;
use crate::Result;

/// One transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
}

/// Decoded inbound item, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Input audio that passed sequence checks; `gap` frames were lost before it.
    Audio { frame: AudioFrame, gap: u32 },
    Control(ControlMessage),
}

/// Owns inbound sequencing state for one session.
#[derive(Debug)]
pub struct InboundDecoder {
    audio: InputSequenceTracker,
    reorder: ReorderBuffer,
    stats: Arc<WireStats>,
}

impl InboundDecoder {
    pub fn new(reorder_capacity: usize, stats: Arc<WireStats>) -> Self {
        Self {
            audio: InputSequenceTracker::new(),
            reorder: ReorderBuffer::new(reorder_capacity),
            stats,
        }
    }

    /// Decode one transport message. Malformed input is counted and dropped.
    pub fn decode(&mut self, message: WireMessage) -> Vec<Inbound> {
        match message {
            WireMessage::Binary(bytes) => self.decode_binary(&bytes).into_iter().collect(),
            WireMessage::Text(text) => self.decode_text(&text),
        }
    }

    fn decode_binary(&mut self, bytes: &[u8]) -> Option<Inbound> {
        let frame = match AudioFrame::decode(bytes) {
            Ok(frame) if frame.direction == Direction::Input => frame,
            Ok(frame) => {
                self.malformed_frame(&format!("unexpected {:?} frame", frame.direction));
                return None;
            }
            Err(e) => {
                self.malformed_frame(&e.to_string());
                return None;
            }
        };
        self.accept_audio(frame)
    }

    fn accept_audio(&mut self, frame: AudioFrame) -> Option<Inbound> {
        self.stats.record_frame_received();
        match self.audio.check(frame.sequence) {
            SequenceCheck::Accept { gap } => {
                if gap > 0 {
                    self.stats.record_audio_gap(gap);
                }
                Some(Inbound::Audio { frame, gap })
            }
            SequenceCheck::Duplicate => {
                self.stats.record_duplicate_frame();
                None
            }
        }
    }

    fn decode_text(&mut self, text: &str) -> Vec<Inbound> {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let count = self.stats.record_malformed_control();
                if count % 10 == 1 {
                    tracing::warn!(count, error = %e, "Dropping malformed control message");
                }
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for message in envelope.into_messages() {
            self.stats.record_control_received();
            let pushed = self.reorder.push(message);
            match pushed.admission {
                Admission::Stale => self.stats.record_stale_control(),
                Admission::Overflow { .. } => self.stats.record_reorder_overflow(),
                Admission::InOrder | Admission::Buffered => {}
            }
            for ready in pushed.ready {
                if ready.is::<AudioInputEvent>() {
                    out.extend(self.decode_fallback_audio(&ready));
                } else {
                    out.push(Inbound::Control(ready));
                }
            }
        }
        out
    }

    /// Base64 input audio, used when binary frames were not negotiated.
    fn decode_fallback_audio(&mut self, message: &ControlMessage) -> Option<Inbound> {
        let decoded = message
            .parse::<AudioInputEvent>()
            .ok()
            .and_then(|event| BASE64.decode(&event.audio).ok().map(|pcm| (event.seq, pcm)));
        match decoded {
            Some((seq, pcm)) => self.accept_audio(AudioFrame::new(Direction::Input, seq, pcm)),
            None => {
                self.malformed_frame("invalid audio.input payload");
                None
            }
        }
    }

    fn malformed_frame(&self, reason: &str) {
        let count = self.stats.record_malformed_frame();
        // Rate-limit logging: only log every 10th drop
        if count % 10 == 1 {
            tracing::warn!(count, reason, "Dropping malformed audio frame");
        }
    }
}

/// Owns outbound sequencing and batching for one session.
#[derive(Debug)]
pub struct OutboundEncoder {
    features: FeatureSet,
    batch_config: BatchConfig,
    audio_seq: SequenceCounter,
    control_seq: SequenceCounter,
    batcher: Batcher,
    stats: Arc<WireStats>,
}

impl OutboundEncoder {
    /// Starts with every optional feature off until the handshake says otherwise.
    pub fn new(batch_config: BatchConfig, stats: Arc<WireStats>) -> Self {
        let mut batcher = Batcher::new(batch_config.clone());
        batcher.set_enabled(false);
        Self {
            features: FeatureSet::default(),
            batch_config,
            audio_seq: SequenceCounter::new(),
            control_seq: SequenceCounter::new(),
            batcher,
            stats,
        }
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn set_features(&mut self, features: FeatureSet) {
        self.features = features;
        self.batcher
            .set_enabled(self.batch_config.enabled && features.batching);
    }

    pub fn encode_event<E: ControlEvent>(
        &mut self,
        event: &E,
        now: Instant,
    ) -> Result<Vec<WireMessage>> {
        self.encode_control(E::NAME, event.to_data()?, now)
    }

    /// Encode an already-serialized payload under `kind`.
    pub fn encode_control(
        &mut self,
        kind: &str,
        data: serde_json::Value,
        now: Instant,
    ) -> Result<Vec<WireMessage>> {
        let message = ControlMessage::new(kind, self.control_seq.next(), data);
        let envelopes = self.batcher.push(message, now);
        self.render(envelopes)
    }

    /// Encode one chunk of output PCM16 plus its metadata message.
    ///
    /// Binary frames when negotiated, otherwise base64 in `audio.output`.
    pub fn encode_audio(
        &mut self,
        response_id: &str,
        pcm: &[u8],
        text: Option<String>,
        now: Instant,
    ) -> Result<Vec<WireMessage>> {
        let seq = self.audio_seq.next();
        let mut out = Vec::new();

        if self.features.binary_audio {
            let frame = AudioFrame::new(Direction::Output, seq, pcm);
            // Anything already batched goes first to keep ordering.
            if let Some(pending) = self.batcher.drain() {
                out.extend(self.render(vec![pending])?);
            }
            out.push(WireMessage::Binary(frame.encode()));
            self.stats.record_frame_sent();
        } else {
            let fallback = AudioOutputEvent {
                response_id: response_id.to_string(),
                seq,
                audio: BASE64.encode(pcm),
            };
            out.extend(self.encode_event(&fallback, now)?);
        }

        let meta = AudioOutputMetaEvent {
            response_id: response_id.to_string(),
            seq,
            sample_rate: OUTPUT_SAMPLE_RATE,
            duration_ms: pcm_duration_ms(pcm.len(), OUTPUT_SAMPLE_RATE),
            text,
        };
        out.extend(self.encode_event(&meta, now)?);
        Ok(out)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.batcher.deadline()
    }

    /// Flush the batch window if it has elapsed.
    pub fn poll(&mut self, now: Instant) -> Result<Vec<WireMessage>> {
        let envelopes = self.batcher.poll(now).into_iter().collect();
        self.render(envelopes)
    }

    /// Flush everything still pending.
    pub fn drain(&mut self) -> Result<Vec<WireMessage>> {
        let envelopes = self.batcher.drain().into_iter().collect();
        self.render(envelopes)
    }

    fn render(&self, envelopes: Vec<Envelope>) -> Result<Vec<WireMessage>> {
        envelopes
            .into_iter()
            .map(|envelope| {
                let batched = matches!(envelope, Envelope::Batch(_));
                let text = envelope.encode()?;
                self.stats.record_envelope_sent(envelope.len(), batched);
                Ok(WireMessage::Text(text))
            })
            .collect()
    }
}
