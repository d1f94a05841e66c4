//! In-process generators for tests and demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{GenerationError, GenerationRequest, ResponseGenerator, Result, TokenStream};

/// Yields a fixed token list regardless of the prompt.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    tokens: Vec<String>,
}

impl StaticGenerator {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ResponseGenerator for StaticGenerator {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<TokenStream> {
        let tokens: Vec<Result<String>> = self.tokens.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(tokens).boxed())
    }
}

/// Endless generator emitting one token per `delay`; counts live streams.
#[derive(Debug, Clone)]
pub struct SlowGenerator {
    delay: Duration,
    open: Arc<AtomicUsize>,
}

struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SlowGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseGenerator for SlowGenerator {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<TokenStream> {
        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard(Arc::clone(&self.open));
        let delay = self.delay;
        let stream = futures::stream::unfold((0usize, guard), move |(i, guard)| async move {
            tokio::time::sleep(delay).await;
            Some((Ok(format!("tok{i} ")), (i + 1, guard)))
        });
        Ok(stream.boxed())
    }
}

/// Always fails to start.
#[derive(Debug, Clone, Copy)]
pub struct FailingGenerator;

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<TokenStream> {
        Err(GenerationError::Backend("generator offline".to_string()))
    }
}
