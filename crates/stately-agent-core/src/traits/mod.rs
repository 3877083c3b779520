//! Core traits: the completion transport consumed by actors, and the
//! executor-facing actor contracts.

pub mod actor;
pub mod transport;

pub use actor::{ActorScope, EventSink, PromiseLogic};
pub use transport::{CompletionTransport, TransportError};
