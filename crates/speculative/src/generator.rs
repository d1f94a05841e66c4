//! Response-generator contract and the cancellable generation handle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Stream of text tokens from a response generator.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Input to the response generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Summary of a previously interrupted response, if any.
    pub continuation_context: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            continuation_context: None,
        }
    }

    pub fn with_continuation(mut self, context: Option<String>) -> Self {
        self.continuation_context = context;
        self
    }
}

/// External LLM response generator.
///
/// Dropping the returned stream must release any underlying connection.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<TokenStream>;
}

/// Terminal state of a generation task (or `Running`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Running,
    /// The generator's stream ended.
    Finished,
    /// Stopped after reaching the token cap.
    Capped,
    Cancelled,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// Owner handle for one spawned generation task.
///
/// Tokens arrive in order through [`Self::next_token`]. Cancelling (or
/// dropping the handle) stops the task at its next await point and drops the
/// generator stream; the terminal status is always published.
pub struct GenerationHandle {
    cancel: CancellationToken,
    tokens: mpsc::UnboundedReceiver<String>,
    emitted: Arc<Mutex<Vec<String>>>,
    status: watch::Receiver<GenerationStatus>,
}

impl std::fmt::Debug for GenerationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationHandle")
            .field("status", &*self.status.borrow())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Spawn a generation task on the current tokio runtime.
pub fn spawn_generation(
    generator: Arc<dyn ResponseGenerator>,
    request: GenerationRequest,
    max_tokens: Option<usize>,
) -> GenerationHandle {
    let cancel = CancellationToken::new();
    let (token_tx, token_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(GenerationStatus::Running);
    let emitted = Arc::new(Mutex::new(Vec::new()));

    let task_cancel = cancel.clone();
    let task_emitted = Arc::clone(&emitted);
    tokio::spawn(async move {
        let status = run_generation(
            generator,
            request,
            max_tokens,
            task_cancel,
            token_tx,
            task_emitted,
        )
        .await;
        status_tx.send_replace(status);
    });

    GenerationHandle {
        cancel,
        tokens: token_rx,
        emitted,
        status: status_rx,
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(generator = generator.name(), max_tokens = ?max_tokens))]
async fn run_generation(
    generator: Arc<dyn ResponseGenerator>,
    request: GenerationRequest,
    max_tokens: Option<usize>,
    cancel: CancellationToken,
    token_tx: mpsc::UnboundedSender<String>,
    emitted: Arc<Mutex<Vec<String>>>,
) -> GenerationStatus {
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return GenerationStatus::Cancelled,
        stream = generator.generate(request) => stream,
    };

    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Response generator failed to start");
            return GenerationStatus::Failed;
        }
    };

    let mut count = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(count, "Generation cancelled");
                return GenerationStatus::Cancelled;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(token)) => {
                if let Ok(mut buffer) = emitted.lock() {
                    buffer.push(token.clone());
                }
                // Receiver gone means nobody wants the output anymore.
                if token_tx.send(token).is_err() {
                    return GenerationStatus::Cancelled;
                }
                count += 1;
                if max_tokens.is_some_and(|max| count >= max) {
                    tracing::debug!(count, "Generation reached token cap");
                    return GenerationStatus::Capped;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, count, "Response generator stream failed");
                return GenerationStatus::Failed;
            }
            None => return GenerationStatus::Finished,
        }
    }
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> GenerationStatus {
        *self.status.borrow()
    }

    /// Snapshot of every token produced so far, including ones not yet read.
    pub fn emitted_tokens(&self) -> Vec<String> {
        self.emitted
            .lock()
            .map(|tokens| tokens.clone())
            .unwrap_or_default()
    }

    /// Next token in order, or `None` once the task is done or cancelled.
    pub async fn next_token(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            token = self.tokens.recv() => token,
        }
    }

    /// Wait for the task to publish its terminal status.
    pub async fn stopped(&mut self) -> GenerationStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                // Task ended without publishing (panicked).
                return GenerationStatus::Failed;
            }
        }
    }

    /// Read every remaining token and wait for the task to end.
    pub async fn collect(mut self) -> (Vec<String>, GenerationStatus) {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token().await {
            tokens.push(token);
        }
        let status = self.stopped().await;
        (tokens, status)
    }
}

impl Drop for GenerationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
