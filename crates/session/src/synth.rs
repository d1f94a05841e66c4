use async_trait::async_trait;
use futures::stream::BoxStream;

/// Chunks of output audio: PCM16 little-endian, 24 kHz mono.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, SynthesisError>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesizer backend error: {0}")]
    Backend(String),
}

/// External text-to-speech backend.
///
/// Dropping the returned stream must stop synthesis.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<AudioStream, SynthesisError>;
}
