//! Contracts between actors and the state-machine executor that runs them

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::event::MachineEvent;

/// Parent execution context that routes events into the running machine.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: MachineEvent);
}

impl EventSink for UnboundedSender<MachineEvent> {
    fn dispatch(&self, event: MachineEvent) {
        if UnboundedSender::send(self, event).is_err() {
            tracing::debug!("Parent event channel closed, event dropped");
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn dispatch(&self, event: MachineEvent) {
        (**self).dispatch(event)
    }
}

/// Per-invocation context handed to an actor by the executor: identity, the
/// parent to dispatch events to, and the cancellation signal.
#[derive(Clone)]
pub struct ActorScope {
    id: String,
    parent: Option<Arc<dyn EventSink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ActorScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorScope")
            .field("id", &self.id)
            .field("has_parent", &self.parent.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ActorScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A scope with a generated id and no parent.
    pub fn detached() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_parent(mut self, parent: Arc<dyn EventSink>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_parent_sink(self, parent: impl EventSink + 'static) -> Self {
        self.with_parent(Arc::new(parent))
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the actor. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Scope for a nested actor. Cancelling this scope cancels the child; the
    /// child has no parent sink of its own.
    pub fn child(&self, id: impl Into<String>) -> Self {
        Self {
            id: format!("{}/{}", self.id, id.into()),
            parent: None,
            cancel: self.cancel.child_token(),
        }
    }

    /// Hands an event to the parent. Fails once the scope is cancelled; a
    /// scope without a parent drops the event.
    pub fn dispatch(&self, event: MachineEvent) -> Result<()> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        match &self.parent {
            Some(parent) => parent.dispatch(event),
            None => tracing::debug!(
                actor = %self.id,
                event = %event.event_type,
                "No parent to dispatch to"
            ),
        }
        Ok(())
    }

    /// Runs `fut` until it finishes or the scope is cancelled. On cancellation
    /// `fut` is dropped, which aborts any I/O it owns.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            output = fut => Ok(output),
        }
    }
}

/// One-shot unit of actor logic: takes an input, resolves or rejects once.
#[async_trait]
pub trait PromiseLogic<I: Send + 'static>: Send + Sync {
    type Output: Send + 'static;

    async fn invoke(&self, input: I, scope: ActorScope) -> Result<Self::Output>;
}

/// Stream-shaped unit of actor logic: emits a lazy sequence of items, then
/// completes or fails. Nothing runs until the stream is first polled, and
/// dropping the stream aborts the invocation.
pub trait StreamLogic<I: Send + 'static>: Send + Sync {
    type Item: Send + 'static;

    fn start(&self, input: I, scope: ActorScope) -> BoxStream<'static, Result<Self::Item>>;
}

/// Promise logic backed by an async closure.
pub struct FnLogic<F> {
    f: F,
}

pub fn promise_fn<F>(f: F) -> FnLogic<F> {
    FnLogic { f }
}

#[async_trait]
impl<I, O, F, Fut> PromiseLogic<I> for FnLogic<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, ActorScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    type Output = O;

    async fn invoke(&self, input: I, scope: ActorScope) -> Result<O> {
        (self.f)(input, scope).await
    }
}
