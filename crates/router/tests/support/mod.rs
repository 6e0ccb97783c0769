#![allow(dead_code)]

use async_trait::async_trait;
use llm::{
    AdapterCapabilities, ChatMessage, GenerateRequest, ModelDescriptor, ProviderAdapter,
    ProviderError, ProviderErrorKind, ProviderEvent, ProviderReply, ProviderRequest, TokenUsage,
};
use router::{Router, RouterConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scriptable adapter: fixed reply or failure, optional delay, call counts.
pub struct MockAdapter {
    provider: String,
    reply: String,
    failure: Option<ProviderErrorKind>,
    delay: Option<Duration>,
    native: bool,
    stream_failure: Option<ProviderErrorKind>,
    endless_stream: bool,
    mid_stream_error: bool,
    stalls: bool,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_max_tokens: AtomicU32,
    released: Arc<AtomicBool>,
    seen_models: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            reply: format!("reply from {provider}"),
            failure: None,
            delay: None,
            native: false,
            stream_failure: None,
            endless_stream: false,
            mid_stream_error: false,
            stalls: false,
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            last_max_tokens: AtomicU32::new(0),
            released: Arc::new(AtomicBool::new(false)),
            seen_models: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(provider: &str, kind: ProviderErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::new(provider)
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    pub fn failing_to_stream(mut self, kind: ProviderErrorKind) -> Self {
        self.native = true;
        self.stream_failure = Some(kind);
        self
    }

    pub fn endless(mut self) -> Self {
        self.native = true;
        self.endless_stream = true;
        self
    }

    pub fn erroring_mid_stream(mut self) -> Self {
        self.native = true;
        self.mid_stream_error = true;
        self
    }

    /// Sends one delta, then holds the stream open without sending.
    pub fn stalling(mut self) -> Self {
        self.native = true;
        self.stalls = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_max_tokens(&self) -> u32 {
        self.last_max_tokens.load(Ordering::SeqCst)
    }

    /// True once the consumer side of a native stream has gone away.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn seen_models(&self) -> Vec<String> {
        self.seen_models.lock().unwrap().clone()
    }

    fn note(&self, request: &ProviderRequest) {
        self.last_max_tokens.store(request.max_tokens, Ordering::SeqCst);
        self.seen_models
            .lock()
            .unwrap()
            .push(request.model_id.clone());
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn capabilities(&self, _model_id: &str) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_streaming: self.native,
            supports_vision: true,
            max_context: 128_000,
        }
    }

    async fn execute(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.note(&request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(kind) => Err(ProviderError::new(kind, format!("{} failed", self.provider))),
            None => Ok(ProviderReply::text(self.reply.clone()).with_usage(TokenUsage::new(10, 20))),
        }
    }

    async fn execute_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.note(&request);

        if let Some(kind) = self.stream_failure {
            return Err(ProviderError::new(kind, format!("{} cannot stream", self.provider)));
        }

        let (tx, rx) = mpsc::channel(4);
        let words: Vec<String> = self.reply.split_inclusive(' ').map(str::to_string).collect();
        let endless = self.endless_stream;
        let mid_stream_error = self.mid_stream_error;
        let stalls = self.stalls;
        let released = self.released.clone();

        tokio::spawn(async move {
            let mut i = 0usize;
            loop {
                let delta = if endless {
                    format!("tok{i} ")
                } else if let Some(word) = words.get(i) {
                    word.clone()
                } else {
                    break;
                };
                if tx.send(ProviderEvent::Delta(delta)).await.is_err() {
                    released.store(true, Ordering::SeqCst);
                    return;
                }
                i += 1;
                if stalls {
                    tx.closed().await;
                    released.store(true, Ordering::SeqCst);
                    return;
                }
                if mid_stream_error {
                    let _ = tx
                        .send(ProviderEvent::Error(ProviderError::unavailable("connection reset")))
                        .await;
                    return;
                }
                if endless {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
            let _ = tx
                .send(ProviderEvent::Done {
                    finish_reason: Some("stop".to_string()),
                    usage: Some(TokenUsage::new(3, 5)),
                })
                .await;
        });

        Ok(rx)
    }
}

pub fn user_request(caller: &str, text: &str) -> GenerateRequest {
    GenerateRequest::new(caller, vec![ChatMessage::user(text)])
}

pub fn chain_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("model-a", "provider-a").with_cost(0.001, 0.002),
        ModelDescriptor::new("model-b", "provider-b").with_cost(0.002, 0.004),
        ModelDescriptor::new("model-c", "provider-c").with_cost(0.003, 0.006),
    ]
}

pub fn router_with(
    models: Vec<ModelDescriptor>,
    adapters: Vec<Arc<MockAdapter>>,
    config: RouterConfig,
) -> Router {
    let mut builder = Router::builder().with_config(config).with_models(models);
    for adapter in adapters {
        builder = builder.with_adapter(adapter);
    }
    builder.build().unwrap()
}
