use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use stately_agent_core::{
    ChatCompletion, ChatRequest, Choice, ChunkStream, CompletionChunk, CompletionTransport,
    FinishReason, TokenUsage, TransportError, TransportFeature,
};

/// Scripted element of a mock stream.
#[derive(Debug, Clone)]
pub enum MockChunk {
    Chunk(CompletionChunk),
    Error(String),
}

/// Mock completion transport for testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<RwLock<MockTransportInner>>,
    aborts: Arc<AtomicUsize>,
}

struct MockTransportInner {
    name: String,
    completions: Vec<ChatCompletion>,
    texts: Vec<String>,
    response_index: usize,
    cycle_responses: bool,
    streams: Vec<Vec<MockChunk>>,
    stream_index: usize,
    hold_streams_open: bool,
    call_history: Vec<MockCall>,
    should_error: bool,
    error_message: String,
    latency_ms: u64,
    features: Vec<TransportFeature>,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub request: ChatRequest,
    pub streaming: bool,
    pub timestamp: std::time::Instant,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockTransportInner {
                name: name.into(),
                completions: Vec::new(),
                texts: Vec::new(),
                response_index: 0,
                cycle_responses: false,
                streams: Vec::new(),
                stream_index: 0,
                hold_streams_open: false,
                call_history: Vec::new(),
                should_error: false,
                error_message: "Mock error".to_string(),
                latency_ms: 0,
                features: vec![
                    TransportFeature::Streaming,
                    TransportFeature::FunctionCalling,
                    TransportFeature::MultipleChoices,
                    TransportFeature::SystemMessages,
                ],
            })),
            aborts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a completion returned verbatim.
    pub fn add_completion(&mut self, completion: ChatCompletion) {
        self.inner.write().completions.push(completion);
    }

    /// Queues a completion built from the given choices.
    pub fn add_choices(&mut self, choices: Vec<Choice>) {
        let id = format!("mock-{}", uuid::Uuid::new_v4());
        self.add_completion(ChatCompletion::new(id, "mock-model", choices));
    }

    pub fn set_response(&mut self, response: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.texts = vec![response.into()];
        inner.completions.clear();
        inner.response_index = 0;
    }

    pub fn set_responses(&mut self, responses: Vec<String>, cycle: bool) {
        let mut inner = self.inner.write();
        inner.texts = responses;
        inner.completions.clear();
        inner.response_index = 0;
        inner.cycle_responses = cycle;
    }

    /// Queues an explicit chunk script for the next stream.
    pub fn add_stream(&mut self, script: Vec<MockChunk>) {
        self.inner.write().streams.push(script);
    }

    /// Keeps streams open after their scripted chunks instead of ending them.
    pub fn hold_streams_open(&mut self, hold: bool) {
        self.inner.write().hold_streams_open = hold;
    }

    pub fn set_feature_support(&mut self, feature: TransportFeature, supported: bool) {
        let mut inner = self.inner.write();
        if supported {
            if !inner.features.contains(&feature) {
                inner.features.push(feature);
            }
        } else {
            inner.features.retain(|f| f != &feature);
        }
    }

    pub fn set_error(&mut self, error_message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.should_error = true;
        inner.error_message = error_message.into();
    }

    pub fn clear_error(&mut self) {
        self.inner.write().should_error = false;
    }

    pub fn set_latency(&mut self, latency_ms: u64) {
        self.inner.write().latency_ms = latency_ms;
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().call_history.len()
    }

    pub fn call_history(&self) -> Vec<MockCall> {
        self.inner.read().call_history.clone()
    }

    pub fn last_call(&self) -> Option<MockCall> {
        self.inner.read().call_history.last().cloned()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_call().map(|call| call.request)
    }

    /// Number of requests or streams dropped before they finished.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn clear_history(&mut self) {
        self.inner.write().call_history.clear();
    }

    pub fn reset(&mut self) {
        let mut inner = self.inner.write();
        inner.completions.clear();
        inner.texts.clear();
        inner.response_index = 0;
        inner.cycle_responses = false;
        inner.streams.clear();
        inner.stream_index = 0;
        inner.hold_streams_open = false;
        inner.call_history.clear();
        inner.should_error = false;
        inner.error_message = "Mock error".to_string();
        inner.latency_ms = 0;
        self.aborts.store(0, Ordering::SeqCst);
    }

    fn next_index(index: &mut usize, len: usize, cycle: bool) -> usize {
        let current = *index;
        if cycle {
            *index = (*index + 1) % len;
        } else if *index < len - 1 {
            *index += 1;
        }
        current
    }

    fn get_next_completion(&self, request: &ChatRequest) -> ChatCompletion {
        let mut inner = self.inner.write();
        let cycle = inner.cycle_responses;

        if !inner.completions.is_empty() {
            let len = inner.completions.len();
            let i = Self::next_index(&mut inner.response_index, len, cycle);
            return inner.completions[i].clone();
        }

        let content = if !inner.texts.is_empty() {
            let len = inner.texts.len();
            let i = Self::next_index(&mut inner.response_index, len, cycle);
            inner.texts[i].clone()
        } else {
            "Mock response".to_string()
        };

        let prompt_tokens = Self::estimate_tokens(request);
        let completion_tokens = (content.len() / 4) as u32;
        ChatCompletion::new(
            format!("mock-{}", uuid::Uuid::new_v4()),
            request.model.clone(),
            vec![Choice::text(0, content)],
        )
        .with_usage(TokenUsage::new(prompt_tokens, completion_tokens))
    }

    fn get_next_stream(&self, request: &ChatRequest) -> Vec<MockChunk> {
        {
            let mut inner = self.inner.write();
            if !inner.streams.is_empty() {
                let len = inner.streams.len();
                let i = Self::next_index(&mut inner.stream_index, len, false);
                return inner.streams[i].clone();
            }
        }

        let completion = self.get_next_completion(request);
        let content = completion.content().unwrap_or_default().to_string();
        let words: Vec<&str> = content.split_whitespace().collect();

        words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let delta = if i == 0 {
                    word.to_string()
                } else {
                    format!(" {}", word)
                };
                let chunk = if i == words.len() - 1 {
                    CompletionChunk::final_chunk(delta, FinishReason::Stop, completion.usage)
                } else {
                    CompletionChunk::new(delta, false)
                };
                MockChunk::Chunk(chunk)
            })
            .collect()
    }

    fn record_call(&self, request: &ChatRequest, streaming: bool) {
        self.inner.write().call_history.push(MockCall {
            request: request.clone(),
            streaming,
            timestamp: std::time::Instant::now(),
        });
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        let latency_ms = self.inner.read().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }
    }

    fn check_error(&self) -> Result<(), TransportError> {
        let inner = self.inner.read();
        if inner.should_error {
            return Err(TransportError::Other(inner.error_message.clone()));
        }
        Ok(())
    }

    fn estimate_tokens(request: &ChatRequest) -> u32 {
        let total_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        (total_chars / 4) as u32
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl CompletionTransport for MockTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, TransportError> {
        self.record_call(request, false);

        let guard = AbortGuard::new(self.aborts.clone());
        self.simulate_latency().await;
        guard.disarm();

        self.check_error()?;
        Ok(self.get_next_completion(request))
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        self.record_call(request, true);

        let guard = AbortGuard::new(self.aborts.clone());
        self.simulate_latency().await;
        guard.disarm();

        self.check_error()?;

        let script = self.get_next_stream(request);
        let scripted = stream::iter(script.into_iter().map(|item| match item {
            MockChunk::Chunk(chunk) => Ok(chunk),
            MockChunk::Error(message) => Err(TransportError::Network(message)),
        }));

        let inner: ChunkStream = if self.inner.read().hold_streams_open {
            Box::new(scripted.chain(stream::pending()))
        } else {
            Box::new(scripted)
        };

        Ok(Box::new(TrackedStream {
            inner,
            aborts: self.aborts.clone(),
            finished: false,
        }))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn supports(&self, feature: TransportFeature) -> bool {
        self.inner.read().features.contains(&feature)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.inner.read().name)
            .field("calls", &self.call_count())
            .finish()
    }
}

/// Counts an abort if dropped while still armed.
struct AbortGuard {
    aborts: Option<Arc<AtomicUsize>>,
}

impl AbortGuard {
    fn new(aborts: Arc<AtomicUsize>) -> Self {
        Self {
            aborts: Some(aborts),
        }
    }

    fn disarm(mut self) {
        self.aborts = None;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(aborts) = self.aborts.take() {
            aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Stream wrapper that records an abort when dropped before end-of-stream.
struct TrackedStream {
    inner: ChunkStream,
    aborts: Arc<AtomicUsize>,
    finished: bool,
}

impl Stream for TrackedStream {
    type Item = Result<CompletionChunk, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            self.finished = true;
        }
        poll
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if !self.finished {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }
}
