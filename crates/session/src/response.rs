//! One response: token streaming, sentence-wise synthesis, cancellation.

use std::sync::Arc;

use futures::StreamExt;
use parley_speculative::{
    spawn_generation, GenerationHandle, GenerationRequest, GenerationStatus, ResponseGenerator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actor::Command;
use crate::synth::SpeechSynthesizer;

/// Where the tokens come from.
pub(crate) enum ResponseSource {
    /// A confirmed speculation, already running (and token-capped).
    Speculative(GenerationHandle),
    Fresh,
}

#[derive(Debug)]
pub(crate) enum ResponseUpdate {
    Delta(String),
    Audio { pcm: Vec<u8>, text: Option<String> },
    SynthesisFailed(String),
    Finished(GenerationStatus),
}

pub(crate) struct ResponseTask {
    pub id: String,
    pub source: ResponseSource,
    pub request: GenerationRequest,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Lead-in after an interruption, spoken before the generated text.
    pub prefix: &'static str,
    pub updates: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
}

/// Sends updates for one response to the actor.
struct Reporter {
    id: String,
    updates: mpsc::Sender<Command>,
}

impl Reporter {
    /// `None` once the session is gone.
    async fn send(&self, update: ResponseUpdate) -> Option<()> {
        self.updates
            .send(Command::Response {
                id: self.id.clone(),
                update,
            })
            .await
            .ok()
    }
}

impl ResponseTask {
    /// Run until finished or cancelled. Cancelling drops the generation
    /// handle and the synthesis stream, which stops both.
    #[tracing::instrument(level = "debug", skip_all, fields(response_id = %self.id))]
    pub(crate) async fn run(self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => tracing::debug!("Response cancelled"),
            _ = self.stream() => {}
        }
    }

    async fn stream(self) -> Option<()> {
        let ResponseTask {
            id,
            source,
            request,
            generator,
            synthesizer,
            prefix,
            updates,
            ..
        } = self;
        let reporter = Reporter { id, updates };

        let (mut handle, mut may_continue) = match source {
            ResponseSource::Speculative(handle) => (handle, true),
            ResponseSource::Fresh => (
                spawn_generation(Arc::clone(&generator), request.clone(), None),
                false,
            ),
        };

        let mut generated = String::new();
        let mut sentence = String::new();
        if !prefix.is_empty() {
            reporter.send(ResponseUpdate::Delta(prefix.to_string())).await?;
            sentence.push_str(prefix);
        }

        let status = loop {
            while let Some(token) = handle.next_token().await {
                generated.push_str(&token);
                sentence.push_str(&token);
                reporter.send(ResponseUpdate::Delta(token)).await?;
                if ends_sentence(&sentence) {
                    speak(&reporter, synthesizer.as_ref(), std::mem::take(&mut sentence)).await?;
                }
            }

            let status = handle.stopped().await;
            // A speculation is token-capped; pick up where it stopped.
            if status == GenerationStatus::Capped && may_continue {
                tracing::debug!(tokens = generated.len(), "Continuing capped speculation");
                let follow_up = request
                    .clone()
                    .with_continuation(Some(continuation_prompt(&request, &generated)));
                handle = spawn_generation(Arc::clone(&generator), follow_up, None);
                may_continue = false;
                continue;
            }
            break status;
        };

        if !sentence.trim().is_empty() {
            speak(&reporter, synthesizer.as_ref(), sentence).await?;
        }
        reporter.send(ResponseUpdate::Finished(status)).await
    }
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(['.', '!', '?'])
}

fn continuation_prompt(request: &GenerationRequest, generated: &str) -> String {
    match &request.continuation_context {
        Some(context) => format!("{context} Continue the reply that begins: \"{generated}\""),
        None => format!("Continue the reply that begins: \"{generated}\""),
    }
}

async fn speak(reporter: &Reporter, synthesizer: &dyn SpeechSynthesizer, text: String) -> Option<()> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Some(());
    }

    let mut stream = match synthesizer.synthesize(&text).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, synthesizer = synthesizer.name(), "Synthesis failed to start");
            return reporter.send(ResponseUpdate::SynthesisFailed(e.to_string())).await;
        }
    };

    let mut label = Some(text);
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(pcm) => {
                reporter
                    .send(ResponseUpdate::Audio {
                        pcm,
                        text: label.take(),
                    })
                    .await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis stream failed");
                return reporter.send(ResponseUpdate::SynthesisFailed(e.to_string())).await;
            }
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ends_sentence() {
        assert!(ends_sentence("Hello there. "));
        assert!(ends_sentence("Really?"));
        assert!(!ends_sentence("Hello, there"));
    }

    #[test]
    fn test_continuation_prompt_keeps_context() {
        let request = GenerationRequest::new("q").with_continuation(Some("Earlier.".into()));
        let prompt = continuation_prompt(&request, "Paris is");
        assert!(prompt.starts_with("Earlier."));
        assert!(prompt.ends_with("\"Paris is\""));
    }
}
