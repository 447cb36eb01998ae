//! Shared fixtures for batch-engine tests.

use crate::provider::{ChatProvider, ChatRequest, ChatResponse, ProviderError};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// In-memory async sink that can be inspected after the writer is done.
#[derive(Clone, Default)]
pub(crate) struct SharedSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    /// Everything written so far, split into lines.
    pub(crate) fn lines(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used)]
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        #[allow(clippy::unwrap_used)]
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Scripted provider: a closure decides each attempt's outcome, keyed by the
/// user-message text and a per-prompt attempt counter (1-based).
pub(crate) struct ScriptedProvider<F>
where
    F: Fn(&str, u32) -> Result<ChatResponse, ProviderError> + Send + Sync,
{
    script: F,
    attempts: Mutex<HashMap<String, u32>>,
}

impl<F> ScriptedProvider<F>
where
    F: Fn(&str, u32) -> Result<ChatResponse, ProviderError> + Send + Sync,
{
    pub(crate) fn new(script: F) -> Self {
        Self {
            script,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl<F> ChatProvider for ScriptedProvider<F>
where
    F: Fn(&str, u32) -> Result<ChatResponse, ProviderError> + Send + Sync,
{
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let attempt = {
            #[allow(clippy::unwrap_used)]
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(prompt.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        (self.script)(&prompt, attempt)
    }
}

/// Convenience: a provider that echoes every prompt back as `echo:<prompt>`.
pub(crate) fn echo_provider()
-> ScriptedProvider<impl Fn(&str, u32) -> Result<ChatResponse, ProviderError> + Send + Sync> {
    ScriptedProvider::new(|prompt, _| {
        Ok(ChatResponse {
            content: format!("echo:{prompt}"),
            reasoning: None,
        })
    })
}
