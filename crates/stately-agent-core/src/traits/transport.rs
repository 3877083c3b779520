//! Completion transport trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::completion::{ChatCompletion, ChatRequest, CompletionChunk};

pub type ChunkStream =
    Box<dyn futures::Stream<Item = Result<CompletionChunk, TransportError>> + Unpin + Send>;

/// Client that issues chat completion requests.
///
/// Dropping the future returned by `complete`, or the stream returned by
/// `complete_stream`, aborts the underlying request.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, TransportError>;

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;

    fn provider_name(&self) -> &str;

    fn supports(&self, feature: TransportFeature) -> bool;
}

#[async_trait]
impl<T: CompletionTransport + ?Sized> CompletionTransport for Arc<T> {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, TransportError> {
        (**self).complete(request).await
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        (**self).complete_stream(request).await
    }

    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }

    fn supports(&self, feature: TransportFeature) -> bool {
        (**self).supports(feature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFeature {
    Streaming,
    FunctionCalling,
    MultipleChoices,
    SystemMessages,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::RateLimit { .. } => true,
            TransportError::Api {
                status: Some(status),
                ..
            } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}
