pub mod openai;
pub mod sse;

pub use openai::{OpenAiTransport, OpenAiTransportBuilder};
