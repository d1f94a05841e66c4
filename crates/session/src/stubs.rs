//! Stand-in collaborators for tests and the replay tool.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parley_speculative::{GenerationRequest, ResponseGenerator, Result, TokenStream};
use parley_wire::frame::{BYTES_PER_SAMPLE, OUTPUT_SAMPLE_RATE};

use crate::synth::{AudioStream, SpeechSynthesizer, SynthesisError};

/// Replies from a prompt-keyed script, one word per token.
#[derive(Debug, Clone)]
pub struct ScriptedGenerator {
    replies: HashMap<String, String>,
    fallback: String,
    token_delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: HashMap::new(),
            fallback: fallback.into(),
            token_delay: Duration::ZERO,
        }
    }

    /// Reply used when the prompt contains `keyword` (case-insensitive).
    pub fn with_reply(mut self, keyword: &str, reply: impl Into<String>) -> Self {
        self.replies.insert(keyword.to_lowercase(), reply.into());
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    fn reply_for(&self, prompt: &str) -> &str {
        let prompt = prompt.to_lowercase();
        let mut keys: Vec<&String> = self.replies.keys().collect();
        keys.sort();
        keys.into_iter()
            .find(|keyword| prompt.contains(keyword.as_str()))
            .and_then(|keyword| self.replies.get(keyword))
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }
}

/// Split into tokens that concatenate back to `text`.
fn word_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() && !current.trim().is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream> {
        let tokens = word_tokens(self.reply_for(&request.prompt));
        let delay = self.token_delay;
        let stream = futures::stream::iter(tokens).then(move |token| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(token)
        });
        Ok(stream.boxed())
    }
}

/// Produces silent PCM lasting as long as the text would take to say.
#[derive(Debug, Clone)]
pub struct SilenceSynthesizer {
    chars_per_second: f32,
    chunk_ms: u64,
    /// Emit chunks at playback speed.
    realtime: bool,
}

impl Default for SilenceSynthesizer {
    fn default() -> Self {
        Self {
            chars_per_second: 15.0,
            chunk_ms: 100,
            realtime: false,
        }
    }
}

impl SilenceSynthesizer {
    pub fn new(chars_per_second: f32) -> Self {
        Self {
            chars_per_second,
            ..Self::default()
        }
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    fn duration_ms(&self, text: &str) -> u64 {
        if self.chars_per_second <= 0.0 {
            return 0;
        }
        let chars = text.chars().count() as f32;
        (chars / self.chars_per_second * 1000.0).ceil() as u64
    }
}

#[async_trait]
impl SpeechSynthesizer for SilenceSynthesizer {
    fn name(&self) -> &str {
        "silence"
    }

    async fn synthesize(&self, text: &str) -> std::result::Result<AudioStream, SynthesisError> {
        let total_ms = self.duration_ms(text);
        let chunk_ms = self.chunk_ms.max(1);
        let chunks = total_ms.div_ceil(chunk_ms);
        let bytes_per_ms = OUTPUT_SAMPLE_RATE as u64 * BYTES_PER_SAMPLE as u64 / 1000;
        let realtime = self.realtime;

        let stream = futures::stream::iter(0..chunks).then(move |i| async move {
            let this_ms = chunk_ms.min(total_ms - i * chunk_ms);
            if realtime {
                tokio::time::sleep(Duration::from_millis(this_ms)).await;
            }
            Ok(vec![0u8; (this_ms * bytes_per_ms) as usize])
        });
        Ok(stream.boxed())
    }
}
