mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_session::stubs::{ScriptedGenerator, SilenceSynthesizer};
use parley_session::{load_config, load_default_config, Session, SessionDeps, TranscriptEvent};
use parley_wire::{AudioFrame, ControlMessage, Envelope, SequenceCounter, WireMessage};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use crate::script::{Action, Script};

#[derive(Debug, Parser)]
#[command(name = "parley-replay", version, about = "Replay a scripted voice session")]
struct Args {
    /// Script file (JSON).
    script: PathBuf,

    /// Engine config file. Defaults to the user config, if any.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the session open this long after the last step.
    #[arg(long, default_value_t = 3000)]
    linger_ms: u64,

    /// Emit synthesized audio at playback speed.
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,parley=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };
    let script = Script::load(&args.script)?;
    tracing::info!(steps = script.steps.len(), "Starting replay");

    let generator = script.replies.iter().fold(
        ScriptedGenerator::new(script.fallback.as_str()),
        |generator, (keyword, reply)| generator.with_reply(keyword, reply.as_str()),
    );
    let mut synthesizer = SilenceSynthesizer::new(config.duplex.chars_per_second);
    if args.realtime {
        synthesizer = synthesizer.realtime();
    }

    let (handle, outbound) = Session::spawn(
        config,
        SessionDeps {
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
            audio_sink: None,
        },
    );
    let printer = tokio::spawn(print_outbound(outbound));

    let mut control_seq = SequenceCounter::new();
    if let Some(features) = &script.features {
        handle
            .receive(control("session.start", control_seq.next(), json!({ "features": features })))
            .await
            .context("session closed during handshake")?;
    }

    let started = Instant::now();
    for step in &script.steps {
        tokio::time::sleep_until(started + Duration::from_millis(step.at_ms)).await;
        tracing::debug!(at_ms = step.at_ms, action = ?step.action, "Step");

        let sent = match &step.action {
            Action::Transcript { text, is_final } => {
                let event = if *is_final {
                    TranscriptEvent::final_text(text.as_str(), step.at_ms)
                } else {
                    TranscriptEvent::partial(text.as_str(), step.at_ms)
                };
                handle.push_transcript(event).await
            }
            Action::Speech {
                confidence,
                duration_ms,
            } => {
                let data = json!({ "confidence": confidence, "duration_ms": duration_ms });
                handle
                    .receive(control("speech.detected", control_seq.next(), data))
                    .await
            }
            Action::PlaybackProgress { spoken_chars } => {
                let data = json!({ "spoken_chars": spoken_chars });
                handle
                    .receive(control("playback.progress", control_seq.next(), data))
                    .await
            }
            Action::PlaybackComplete => {
                handle
                    .receive(control("playback.complete", control_seq.next(), json!({})))
                    .await
            }
        };
        sent.with_context(|| format!("session closed at step {}ms", step.at_ms))?;
    }

    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;
    let stats = handle.stats();
    handle.shutdown().await;
    printer.await.context("printer task failed")?;

    tracing::info!(
        frames_sent = stats.frames_sent,
        control_sent = stats.control_sent,
        batches_sent = stats.batches_sent,
        malformed_control = stats.malformed_control,
        "Replay finished"
    );
    Ok(())
}

fn control(kind: &str, seq: u32, data: serde_json::Value) -> WireMessage {
    let envelope = Envelope::Single(ControlMessage::new(kind, seq, data));
    // Encoding a freshly built message only fails on non-string map keys.
    WireMessage::Text(envelope.encode().unwrap_or_default())
}

/// One line per message on stdout.
async fn print_outbound(mut outbound: mpsc::Receiver<WireMessage>) {
    while let Some(message) = outbound.recv().await {
        match message {
            WireMessage::Binary(bytes) => match AudioFrame::decode(&bytes) {
                Ok(frame) => println!(
                    "<audio seq={} bytes={} duration_ms={}>",
                    frame.sequence,
                    frame.payload.len(),
                    frame.duration_ms()
                ),
                Err(e) => println!("<bad frame: {e}>"),
            },
            WireMessage::Text(text) => match Envelope::decode(&text) {
                Ok(Envelope::Single(message)) => println!("{}", render(&message)),
                Ok(Envelope::Batch(messages)) => {
                    println!("[batch of {}]", messages.len());
                    for message in &messages {
                        println!("  {}", render(message));
                    }
                }
                Err(e) => println!("<bad text: {e}>"),
            },
        }
    }
}

fn render(message: &ControlMessage) -> String {
    let mut data = message.data.clone();
    // Base64 audio makes lines unreadable.
    if let Some(audio) = data.get_mut("audio") {
        let len = audio.as_str().map(str::len).unwrap_or_default();
        *audio = json!(format!("<{len} base64 chars>"));
    }
    format!("#{:<4} {:<20} {}", message.seq, message.kind, data)
}
