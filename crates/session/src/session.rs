use std::sync::Arc;
use std::time::Instant;

use parley_events::{
    event_names, PlaybackProgressEvent, SessionStartEvent, SpeechDetectedEvent,
};
use parley_speculative::ResponseGenerator;
use parley_wire::{
    AudioFrame, ControlMessage, Inbound, InboundDecoder, OutboundEncoder, WireMessage, WireStats,
    WireStatsSnapshot,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actor::{Command, Outgoing, SessionActor};
use crate::config::EngineConfig;
use crate::synth::SpeechSynthesizer;
use crate::{Result, SessionError};

/// Transcript update from the speech-to-text collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub timestamp_ms: u64,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp_ms,
        }
    }

    pub fn final_text(text: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            timestamp_ms,
        }
    }
}

/// External collaborators for one session.
pub struct SessionDeps {
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Accepted input audio goes here (typically the STT feed). Frames are
    /// dropped when it is full.
    pub audio_sink: Option<mpsc::Sender<AudioFrame>>,
}

pub struct Session;

impl Session {
    /// Start a session on the current tokio runtime.
    ///
    /// Returns the handle used to feed it and the receiver of everything it
    /// sends to the client. Keep reading the receiver (or drop it) or the
    /// session stalls on back-pressure.
    pub fn spawn(
        config: EngineConfig,
        deps: SessionDeps,
    ) -> (SessionHandle, mpsc::Receiver<WireMessage>) {
        let id = uuid::Uuid::new_v4().to_string();
        let capacity = config.channel_capacity.max(1);
        let stats = Arc::new(WireStats::new());
        let cancel = CancellationToken::new();

        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(capacity);
        let (transport_tx, transport_rx) = mpsc::channel(capacity);

        let decoder = InboundDecoder::new(config.reorder_capacity, Arc::clone(&stats));
        let encoder = OutboundEncoder::new(config.batch.clone(), Arc::clone(&stats));
        let actor = SessionActor::new(
            id.clone(),
            config,
            deps.generator,
            deps.synthesizer,
            outgoing_tx,
            command_tx.clone(),
        );

        let tasks = vec![
            tokio::spawn(run_inbound(
                id.clone(),
                inbound_rx,
                decoder,
                command_tx.clone(),
                deps.audio_sink,
                cancel.child_token(),
            )),
            tokio::spawn(actor.run(command_rx, cancel.child_token())),
            tokio::spawn(run_outbound(id.clone(), outgoing_rx, encoder, transport_tx)),
        ];

        tracing::info!(session_id = %id, "Session started");

        let handle = SessionHandle {
            id,
            inbound_tx,
            command_tx,
            cancel,
            stats,
            tasks,
        };
        (handle, transport_rx)
    }
}

/// Owner handle for a running session. Dropping it cancels the session.
pub struct SessionHandle {
    id: String,
    inbound_tx: mpsc::Sender<WireMessage>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    stats: Arc<WireStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Feed one message received from the client transport.
    pub async fn receive(&self, message: WireMessage) -> Result<()> {
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Feed one transcript update from speech-to-text.
    pub async fn push_transcript(&self, event: TranscriptEvent) -> Result<()> {
        self.command_tx
            .send(Command::Transcript(event))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub fn stats(&self) -> WireStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel in-flight work, flush pending output and wait for the tasks.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(session_id = %self.id, error = %e, "Session task failed");
            }
        }
        tracing::info!(session_id = %self.id, "Session stopped");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(session_id = %session_id))]
async fn run_inbound(
    session_id: String,
    mut rx: mpsc::Receiver<WireMessage>,
    mut decoder: InboundDecoder,
    commands: mpsc::Sender<Command>,
    audio_sink: Option<mpsc::Sender<AudioFrame>>,
    cancel: CancellationToken,
) {
    let mut dropped_audio = 0u64;

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            tracing::debug!("Transport closed");
            break;
        };

        for item in decoder.decode(message) {
            match item {
                Inbound::Audio { frame, .. } => {
                    let Some(sink) = &audio_sink else { continue };
                    if let Err(mpsc::error::TrySendError::Full(_)) = sink.try_send(frame) {
                        dropped_audio += 1;
                        // Rate-limit logging: only log every 10th drop
                        if dropped_audio % 10 == 1 {
                            tracing::warn!(dropped_audio, "Audio sink full, dropping frames");
                        }
                    }
                }
                Inbound::Control(message) => {
                    let Some(command) = control_command(message) else { continue };
                    if commands.send(command).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    tracing::debug!("Inbound task stopped");
}

fn control_command(message: ControlMessage) -> Option<Command> {
    let parsed = match message.kind.as_str() {
        event_names::SESSION_START => message.parse::<SessionStartEvent>().map(Command::Handshake),
        event_names::SPEECH_DETECTED => {
            message.parse::<SpeechDetectedEvent>().map(Command::SpeechDetected)
        }
        event_names::PLAYBACK_PROGRESS => message
            .parse::<PlaybackProgressEvent>()
            .map(Command::PlaybackProgress),
        event_names::PLAYBACK_COMPLETE => Ok(Command::PlaybackComplete),
        other => {
            tracing::debug!(kind = other, "Ignoring unsupported control message");
            return None;
        }
    };
    Some(parsed.unwrap_or_else(|e| Command::ProtocolError {
        kind: message.kind.clone(),
        message: e.to_string(),
    }))
}

#[tracing::instrument(level = "debug", skip_all, fields(session_id = %session_id))]
async fn run_outbound(
    session_id: String,
    mut rx: mpsc::Receiver<Outgoing>,
    mut encoder: OutboundEncoder,
    transport: mpsc::Sender<WireMessage>,
) {
    loop {
        let deadline = encoder.next_deadline();
        let item = tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = sleep_until(deadline) => {
                let flushed = encoder.poll(Instant::now());
                if !send_all(&transport, flushed).await {
                    return;
                }
                continue;
            }
        };
        let Some(item) = item else { break };

        let now = Instant::now();
        let encoded = match item {
            Outgoing::Features(features) => {
                encoder.set_features(features);
                continue;
            }
            Outgoing::Control { kind, data } => encoder.encode_control(kind, data, now),
            Outgoing::Audio {
                response_id,
                pcm,
                text,
            } => encoder.encode_audio(&response_id, &pcm, text, now),
        };
        if !send_all(&transport, encoded).await {
            return;
        }
    }

    // Teardown: whatever is still batched goes out before the stream ends.
    let drained = encoder.drain();
    send_all(&transport, drained).await;
    tracing::debug!("Outbound task stopped");
}

/// Returns false once the transport is gone.
async fn send_all(
    transport: &mpsc::Sender<WireMessage>,
    encoded: parley_wire::Result<Vec<WireMessage>>,
) -> bool {
    let messages = match encoded {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode outbound message");
            return true;
        }
    };
    for message in messages {
        if transport.send(message).await.is_err() {
            tracing::debug!("Transport receiver dropped");
            return false;
        }
    }
    true
}

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
