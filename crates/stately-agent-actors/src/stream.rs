use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, warn};

use stately_agent_core::{ActorScope, AgentError, CompletionChunk, Result, StreamLogic};

use crate::adapter::{InputFn, StatelyAgentAdapter};

/// Lazy sequence of completion chunks produced by a streaming actor.
///
/// Ends after the transport's end-of-stream, after a single `Stream` error,
/// or after a single `Cancelled` error once the scope is cancelled.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// Streaming completion actor.
pub struct ChatStreamActor<I> {
    adapter: StatelyAgentAdapter,
    input_fn: InputFn<I>,
}

impl<I> ChatStreamActor<I> {
    pub(crate) fn new(adapter: StatelyAgentAdapter, input_fn: InputFn<I>) -> Self {
        Self { adapter, input_fn }
    }
}

impl<I: Send + 'static> StreamLogic<I> for ChatStreamActor<I> {
    type Item = CompletionChunk;

    /// Starts one invocation. Nothing is requested until the returned stream
    /// is first polled; each call opens a new stream.
    fn start(&self, input: I, scope: ActorScope) -> ChatStream {
        let request = self.adapter.request((self.input_fn)(input));
        let transport = self.adapter.transport().clone();

        Box::pin(async_stream::stream! {
            let cancel = scope.cancellation_token().clone();
            debug!(actor = %scope.id(), model = %request.model, "Opening completion stream");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = transport.complete_stream(&request) => Some(opened),
            };
            let mut chunks = match opened {
                Some(Ok(chunks)) => chunks,
                Some(Err(err)) => {
                    warn!(actor = %scope.id(), error = %err, "Failed to open completion stream");
                    yield Err(AgentError::Stream(err));
                    return;
                }
                None => {
                    debug!(actor = %scope.id(), "Stream cancelled before opening");
                    yield Err(AgentError::Cancelled);
                    return;
                }
            };

            let mut received = 0usize;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = chunks.next() => Some(next),
                };
                match next {
                    Some(Some(Ok(chunk))) => {
                        received += 1;
                        yield Ok(chunk);
                    }
                    Some(Some(Err(err))) => {
                        drop(chunks);
                        warn!(actor = %scope.id(), received, error = %err, "Completion stream failed");
                        yield Err(AgentError::Stream(err));
                        return;
                    }
                    Some(None) => {
                        debug!(actor = %scope.id(), received, "Completion stream finished");
                        return;
                    }
                    None => {
                        drop(chunks);
                        debug!(actor = %scope.id(), received, "Completion stream cancelled");
                        yield Err(AgentError::Cancelled);
                        return;
                    }
                }
            }
        })
    }
}

impl<I> Clone for ChatStreamActor<I> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            input_fn: self.input_fn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stately_agent_core::TransportError;
    use stately_agent_llm::{MockChunk, MockTransport};
    use std::sync::Arc;
    use std::time::Duration;

    fn chunk(text: &str) -> MockChunk {
        MockChunk::Chunk(CompletionChunk::new(text, false))
    }

    fn actor(mock: &MockTransport) -> ChatStreamActor<String> {
        StatelyAgentAdapter::new("m", Arc::new(mock.clone())).from_chat_stream(|p: String| p)
    }

    #[tokio::test]
    async fn test_emits_chunks_in_order() {
        let mut mock = MockTransport::new("test");
        mock.set_response("one two three");

        let chunks: Vec<_> = actor(&mock)
            .start("Hi".into(), ActorScope::detached())
            .collect()
            .await;

        let deltas: Vec<String> = chunks.into_iter().map(|c| c.unwrap().delta).collect();
        assert_eq!(deltas, vec!["one", " two", " three"]);
        assert_eq!(mock.abort_count(), 0);
    }

    #[tokio::test]
    async fn test_is_lazy() {
        let mock = MockTransport::new("test");
        let stream = actor(&mock).start("Hi".into(), ActorScope::detached());

        assert_eq!(mock.call_count(), 0);
        drop(stream);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_sequence() {
        let mut mock = MockTransport::new("test");
        mock.add_stream(vec![
            chunk("a"),
            MockChunk::Error("reset by peer".into()),
            chunk("never"),
        ]);

        let items: Vec<_> = actor(&mock)
            .start("Hi".into(), ActorScope::detached())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().delta, "a");
        assert!(matches!(
            items[1],
            Err(AgentError::Stream(TransportError::Network(_)))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_is_stream_error() {
        let mut mock = MockTransport::new("test");
        mock.set_error("no stream");

        let items: Vec<_> = actor(&mock)
            .start("Hi".into(), ActorScope::detached())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AgentError::Stream(_))));
    }

    #[tokio::test]
    async fn test_cancel_after_chunks_aborts_once() {
        let mut mock = MockTransport::new("test");
        mock.add_stream(vec![chunk("a"), chunk("b"), chunk("c")]);
        mock.hold_streams_open(true);

        let scope = ActorScope::new("stream");
        let mut stream = actor(&mock).start("Hi".into(), scope.clone());

        assert_eq!(stream.next().await.unwrap().unwrap().delta, "a");
        assert_eq!(stream.next().await.unwrap().unwrap().delta, "b");

        scope.cancel();
        assert!(matches!(stream.next().await, Some(Err(AgentError::Cancelled))));
        assert!(stream.next().await.is_none());

        scope.cancel();
        drop(stream);
        assert_eq!(mock.abort_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk_aborts_once() {
        let mut mock = MockTransport::new("test");
        mock.add_stream(Vec::new());
        mock.hold_streams_open(true);

        let scope = ActorScope::new("stream");
        let mut stream = actor(&mock).start("Hi".into(), scope.clone());

        let waited = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(waited.is_err());
        assert_eq!(mock.call_count(), 1);

        scope.cancel();
        assert!(matches!(stream.next().await, Some(Err(AgentError::Cancelled))));
        assert!(stream.next().await.is_none());
        assert_eq!(mock.abort_count(), 1);
    }

    #[tokio::test]
    async fn test_registered_as_stream_unit() {
        let mut mock = MockTransport::new("test");
        mock.set_response("hello there");

        let units: Vec<Arc<dyn StreamLogic<String, Item = CompletionChunk>>> =
            vec![Arc::new(actor(&mock))];
        let text: String = units[0]
            .start("Hi".into(), ActorScope::detached())
            .map(|chunk| chunk.unwrap().delta)
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn test_new_invocation_opens_new_stream() {
        let mut mock = MockTransport::new("test");
        mock.set_response("hello");
        let actor = actor(&mock);

        for _ in 0..2 {
            let items: Vec<_> = actor
                .start("Hi".into(), ActorScope::detached())
                .collect()
                .await;
            assert_eq!(items.len(), 1);
        }
        assert_eq!(mock.call_count(), 2);
    }
}
