//! Streaming Aggregator.
//!
//! Turns provider output into an ordered [`ChunkStream`] with exactly one
//! terminal chunk (`done = true`), whether the stream completes, fails or is
//! cancelled. Two modes feed it:
//!
//! - **native**: a provider event channel, relayed as it arrives
//!   ([`ChunkOrigin::Native`])
//! - **simulated**: a complete reply split into fixed-size word groups
//!   ([`ChunkOrigin::Simulated`]); this is presentation only, the provider
//!   did not stream

use crate::errors::{ErrorKind, GenerateError, ProviderError};
use crate::providers::{ProviderEvent, ProviderReply};
use crate::types::TokenUsage;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_CHUNK_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOrigin {
    Native,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub kind: ErrorKind,
    /// Most specific class; differs from `kind` for exhausted fallbacks
    pub classification: ErrorKind,
    pub message: String,
}

impl From<&GenerateError> for StreamError {
    fn from(error: &GenerateError) -> Self {
        Self {
            kind: error.kind(),
            classification: error.classification(),
            message: error.to_string(),
        }
    }
}

impl From<&ProviderError> for StreamError {
    fn from(error: &ProviderError) -> Self {
        let kind = ErrorKind::from(error.kind);
        Self {
            kind,
            classification: kind,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub model_id: String,
    pub done: bool,
    pub finish_reason: Option<String>,
    pub origin: ChunkOrigin,
    pub error: Option<StreamError>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl StreamChunk {
    fn content(text: String, model_id: &str, origin: ChunkOrigin) -> Self {
        Self {
            text,
            model_id: model_id.to_string(),
            done: false,
            finish_reason: None,
            origin,
            error: None,
            metadata: HashMap::new(),
        }
    }

    fn terminal(model_id: &str, origin: ChunkOrigin, finish_reason: Option<String>) -> Self {
        Self {
            text: String::new(),
            model_id: model_id.to_string(),
            done: true,
            finish_reason,
            origin,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// What happened over the life of one stream; handed to the completion hook.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub model_id: String,
    pub provider: String,
    pub origin: ChunkOrigin,
    pub text: String,
    pub usage: TokenUsage,
    pub content_chunks: usize,
    pub finish_reason: Option<String>,
    pub error: Option<ProviderError>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl StreamSummary {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

pub type CompletionHook = Box<dyn FnOnce(StreamSummary) + Send + 'static>;

/// Identity of the stream being produced.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub model_id: String,
    pub provider: String,
    /// Used for usage estimates when the provider reports none
    pub input_chars: usize,
    pub started: Instant,
    /// Copied onto the terminal chunk
    pub metadata: HashMap<String, Value>,
}

impl StreamContext {
    pub fn new(model_id: &str, provider: &str, input_chars: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider: provider.to_string(),
            input_chars,
            started: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Consumer side of a normalized stream.
///
/// Dropping it or calling [`ChunkStream::cancel`] stops the producer; after
/// `cancel` the terminal chunk is still delivered.
pub struct ChunkStream {
    inner: ReceiverStream<StreamChunk>,
    cancel: CancellationToken,
}

impl ChunkStream {
    fn new(rx: mpsc::Receiver<StreamChunk>, cancel: CancellationToken) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            cancel,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Split `text` into groups of `words_per_group` words.
///
/// Each group keeps the whitespace that follows its words and the first
/// group also keeps any leading whitespace, so concatenating the groups
/// gives back `text` exactly.
pub fn split_word_groups(text: &str, words_per_group: usize) -> Vec<String> {
    let per_group = words_per_group.max(1);
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut words_in_current = 0;
    let mut in_word = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            if words_in_current == per_group {
                groups.push(std::mem::take(&mut current));
                words_in_current = 0;
            }
            words_in_current += 1;
            in_word = true;
        }
        current.push(ch);
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[derive(Debug, Clone)]
pub struct StreamAggregator {
    chunk_words: usize,
    channel_capacity: usize,
    /// Longest wait between native events before the stream fails
    idle_timeout: Option<Duration>,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_WORDS)
    }
}

impl StreamAggregator {
    pub fn new(chunk_words: usize) -> Self {
        Self {
            chunk_words: chunk_words.max(1),
            channel_capacity: 32,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = Some(idle);
        self
    }

    pub fn chunk_words(&self) -> usize {
        self.chunk_words
    }

    /// Stream a complete reply as word groups.
    pub fn simulate(
        &self,
        reply: ProviderReply,
        context: StreamContext,
        on_complete: Option<CompletionHook>,
    ) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let groups = split_word_groups(&reply.text, self.chunk_words);

        tokio::spawn(async move {
            let mut pump = Pump::new(tx, token, context, ChunkOrigin::Simulated);
            for group in groups {
                if !pump.emit(group).await {
                    break;
                }
            }
            pump.usage = reply.usage;
            pump.finish_reason = reply.finish_reason;
            pump.finish(on_complete).await;
        });

        ChunkStream::new(rx, cancel)
    }

    /// Relay a provider's native event channel.
    pub fn relay(
        &self,
        mut events: mpsc::Receiver<ProviderEvent>,
        context: StreamContext,
        on_complete: Option<CompletionHook>,
    ) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let idle = self.idle_timeout;

        tokio::spawn(async move {
            let mut pump = Pump::new(tx, token.clone(), context, ChunkOrigin::Native);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        pump.cancelled = true;
                        break;
                    }
                    event = next_event(&mut events, idle) => event,
                };

                match event {
                    Some(ProviderEvent::Delta(text)) => {
                        if text.is_empty() {
                            continue;
                        }
                        if !pump.emit(text).await {
                            break;
                        }
                    }
                    Some(ProviderEvent::Done {
                        finish_reason,
                        usage,
                    }) => {
                        pump.finish_reason = finish_reason.or_else(|| Some("stop".to_string()));
                        pump.usage = usage;
                        break;
                    }
                    Some(ProviderEvent::Error(error)) => {
                        pump.error = Some(error);
                        break;
                    }
                    None => {
                        pump.error = Some(ProviderError::unavailable(
                            "provider stream closed before completion",
                        ));
                        break;
                    }
                }
            }
            // Releasing the receiver tells the adapter to stop.
            drop(events);
            pump.finish(on_complete).await;
        });

        ChunkStream::new(rx, cancel)
    }

    /// A stream holding only a terminal error chunk.
    pub fn failed(model_id: &str, error: &GenerateError) -> ChunkStream {
        let (tx, rx) = mpsc::channel(1);
        let mut chunk = StreamChunk::terminal(model_id, ChunkOrigin::Simulated, Some("error".into()));
        chunk.error = Some(StreamError::from(error));
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = tx.try_send(chunk);
        ChunkStream::new(rx, CancellationToken::new())
    }

    /// A complete reply served without any provider call (cache hits).
    pub fn replay(&self, text: &str, context: StreamContext, usage: TokenUsage) -> ChunkStream {
        let reply = ProviderReply {
            text: text.to_string(),
            usage: Some(usage),
            finish_reason: Some("stop".to_string()),
        };
        self.simulate(reply, context, None)
    }
}

/// A stalled provider surfaces as a timeout error event.
async fn next_event(
    events: &mut mpsc::Receiver<ProviderEvent>,
    idle: Option<Duration>,
) -> Option<ProviderEvent> {
    let Some(limit) = idle else {
        return events.recv().await;
    };
    match tokio::time::timeout(limit, events.recv()).await {
        Ok(event) => event,
        Err(_) => Some(ProviderEvent::Error(ProviderError::timeout(format!(
            "no stream event within {}ms",
            limit.as_millis()
        )))),
    }
}

struct Pump {
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    context: StreamContext,
    origin: ChunkOrigin,
    text: String,
    content_chunks: usize,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
    error: Option<ProviderError>,
    cancelled: bool,
}

impl Pump {
    fn new(
        tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
        context: StreamContext,
        origin: ChunkOrigin,
    ) -> Self {
        Self {
            tx,
            cancel,
            context,
            origin,
            text: String::new(),
            content_chunks: 0,
            usage: None,
            finish_reason: None,
            error: None,
            cancelled: false,
        }
    }

    /// Returns false once the consumer has cancelled or gone away.
    async fn emit(&mut self, text: String) -> bool {
        if self.cancel.is_cancelled() {
            self.cancelled = true;
            return false;
        }

        let chunk = StreamChunk::content(text.clone(), &self.context.model_id, self.origin);
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.tx.send(chunk) => result.is_ok(),
        };

        if sent {
            self.text.push_str(&text);
            self.content_chunks += 1;
        } else {
            self.cancelled = true;
        }
        sent
    }

    async fn finish(self, on_complete: Option<CompletionHook>) {
        let usage = self
            .usage
            .unwrap_or_else(|| TokenUsage::estimated(self.context.input_chars, self.text.chars().count()));
        let elapsed_ms = self.context.started.elapsed().as_millis() as u64;

        let finish_reason = if self.cancelled {
            Some("cancelled".to_string())
        } else if self.error.is_some() {
            Some("error".to_string())
        } else {
            self.finish_reason.clone()
        };

        let mut terminal = StreamChunk::terminal(&self.context.model_id, self.origin, finish_reason.clone());
        terminal.error = self.error.as_ref().map(StreamError::from);
        terminal.metadata = self.context.metadata.clone();
        terminal
            .metadata
            .insert("provider".to_string(), Value::from(self.context.provider.clone()));
        terminal
            .metadata
            .insert("content_chunks".to_string(), Value::from(self.content_chunks));
        terminal
            .metadata
            .insert("elapsed_ms".to_string(), Value::from(elapsed_ms));
        terminal
            .metadata
            .insert("cancelled".to_string(), Value::from(self.cancelled));
        if let Ok(value) = serde_json::to_value(usage) {
            terminal.metadata.insert("usage".to_string(), value);
        }

        // The consumer may already be gone; the terminal chunk is best effort
        // in that case but the hook still runs.
        let _ = self.tx.send(terminal).await;

        debug!(
            model = %self.context.model_id,
            provider = %self.context.provider,
            chunks = self.content_chunks,
            cancelled = self.cancelled,
            "Stream finished"
        );

        if let Some(hook) = on_complete {
            hook(StreamSummary {
                model_id: self.context.model_id,
                provider: self.context.provider,
                origin: self.origin,
                text: self.text,
                usage,
                content_chunks: self.content_chunks,
                finish_reason,
                error: self.error,
                cancelled: self.cancelled,
                elapsed_ms,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_split_counts_groups() {
        let text = (1..=45).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let groups = split_word_groups(&text, 20);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.concat(), text);
        assert_eq!(groups[0].split_whitespace().count(), 20);
        assert_eq!(groups[2].split_whitespace().count(), 5);
    }

    #[test]
    fn test_split_keeps_whitespace() {
        let text = "  hello   world\n\tagain ";
        let groups = split_word_groups(text, 2);
        assert_eq!(groups, vec!["  hello   world\n\t", "again "]);
    }

    #[test]
    fn test_split_empty_and_blank() {
        assert!(split_word_groups("", 20).is_empty());
        assert_eq!(split_word_groups("   ", 20), vec!["   "]);
    }

    #[tokio::test]
    async fn test_simulated_stream_shape() {
        let aggregator = StreamAggregator::new(2);
        let stream = aggregator.simulate(
            ProviderReply::text("one two three four five"),
            StreamContext::new("fast-text", "openai", 10),
            None,
        );
        let chunks: Vec<StreamChunk> = stream.collect().await;

        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| !c.done && c.origin == ChunkOrigin::Simulated));
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert!(last.error.is_none());
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text, "one two three four five");
    }

    #[tokio::test]
    async fn test_native_relay_and_hook() {
        let (tx, rx) = mpsc::channel(8);
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let sink = summaries.clone();

        let stream = StreamAggregator::default().relay(
            rx,
            StreamContext::new("native-model", "local", 4),
            Some(Box::new(move |summary| sink.lock().unwrap().push(summary))),
        );

        tx.send(ProviderEvent::Delta("Hel".into())).await.unwrap();
        tx.send(ProviderEvent::Delta("lo".into())).await.unwrap();
        tx.send(ProviderEvent::Done {
            finish_reason: Some("length".into()),
            usage: Some(TokenUsage::new(1, 2)),
        })
        .await
        .unwrap();

        let chunks: Vec<StreamChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.origin == ChunkOrigin::Native));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("length"));

        let summaries = summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].text, "Hello");
        assert_eq!(summaries[0].usage, TokenUsage::new(1, 2));
        assert!(summaries[0].success());
    }

    #[tokio::test]
    async fn test_mid_stream_error_becomes_terminal_metadata() {
        let (tx, rx) = mpsc::channel(8);
        let stream = StreamAggregator::default().relay(rx, StreamContext::new("m", "p", 0), None);
        tx.send(ProviderEvent::Delta("partial".into())).await.unwrap();
        tx.send(ProviderEvent::Error(ProviderError::quota("out of credits")))
            .await
            .unwrap();

        let chunks: Vec<StreamChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        let terminal = &chunks[1];
        assert!(terminal.done);
        let error = terminal.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::ProviderQuotaExceeded);
        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_times_out() {
        let (tx, rx) = mpsc::channel(8);
        let stream = StreamAggregator::default()
            .with_idle_timeout(Duration::from_secs(30))
            .relay(rx, StreamContext::new("m", "p", 0), None);
        tx.send(ProviderEvent::Delta("partial".into())).await.unwrap();

        // The sender stays open but never sends again.
        let chunks: Vec<StreamChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        let terminal = &chunks[1];
        assert_eq!(terminal.finish_reason.as_deref(), Some("error"));
        assert_eq!(
            terminal.error.as_ref().unwrap().kind,
            ErrorKind::ProviderUnavailable
        );
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_still_emits_terminal_and_releases_provider() {
        let (tx, rx) = mpsc::channel(8);
        let mut stream = StreamAggregator::default().relay(rx, StreamContext::new("m", "p", 0), None);

        tx.send(ProviderEvent::Delta("first".into())).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.text, "first");

        stream.cancel();
        let terminal = stream.next().await.unwrap();
        assert!(terminal.done);
        assert_eq!(terminal.finish_reason.as_deref(), Some("cancelled"));
        assert!(stream.next().await.is_none());

        // The provider side sees its receiver dropped.
        tx.closed().await;
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_failed_stream_is_single_terminal_chunk() {
        let error = GenerateError::AccessDenied("plan FREE cannot use premium-vision-v2".into());
        let chunks: Vec<StreamChunk> = StreamAggregator::failed("premium-vision-v2", &error)
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].error.as_ref().unwrap().kind, ErrorKind::AccessDenied);
    }
}
