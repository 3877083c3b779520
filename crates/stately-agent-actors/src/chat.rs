use async_trait::async_trait;

use stately_agent_core::{ActorScope, ChatCompletion, PromiseLogic, Result};

use crate::adapter::{InputFn, StatelyAgentAdapter};

/// One-shot completion actor.
pub struct ChatActor<I> {
    adapter: StatelyAgentAdapter,
    input_fn: InputFn<I>,
}

impl<I> ChatActor<I> {
    pub(crate) fn new(adapter: StatelyAgentAdapter, input_fn: InputFn<I>) -> Self {
        Self { adapter, input_fn }
    }
}

impl<I> Clone for ChatActor<I> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            input_fn: self.input_fn.clone(),
        }
    }
}

#[async_trait]
impl<I: Send + 'static> PromiseLogic<I> for ChatActor<I> {
    type Output = ChatCompletion;

    async fn invoke(&self, input: I, scope: ActorScope) -> Result<ChatCompletion> {
        let request = self.adapter.request((self.input_fn)(input));
        self.adapter.complete(&request, &scope).await
    }
}
