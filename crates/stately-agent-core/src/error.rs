use thiserror::Error;

use crate::traits::transport::TransportError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Completion request failed: {0}")]
    CompletionRequest(#[source] TransportError),

    #[error("Stream failed: {0}")]
    Stream(#[source] TransportError),

    #[error("Choice {index} cannot be mapped to an event: {reason}")]
    EventMapping { index: usize, reason: String },

    #[error("Invalid input for tool '{tool}': {}", .errors.join("; "))]
    InvalidToolInput { tool: String, errors: Vec<String> },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Actor cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    pub fn event_mapping(index: usize, reason: impl Into<String>) -> Self {
        AgentError::EventMapping {
            index,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }

    /// Whether the failure came from a transient transport condition. The
    /// adapter layer never retries; this lets an `onError` route decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::CompletionRequest(err) | AgentError::Stream(err) => err.is_retryable(),
            AgentError::ToolExecution { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::Config(format!("YAML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let network = AgentError::CompletionRequest(TransportError::Network("reset".into()));
        assert!(network.is_retryable());

        let auth = AgentError::CompletionRequest(TransportError::Config("no key".into()));
        assert!(!auth.is_retryable());

        let nested = AgentError::ToolExecution {
            tool: "search".into(),
            source: Box::new(AgentError::Stream(TransportError::RateLimit {
                retry_after: None,
            })),
        };
        assert!(nested.is_retryable());

        assert!(!AgentError::UnknownTool("lookup".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = AgentError::InvalidToolInput {
            tool: "search".into(),
            errors: vec!["missing query".into(), "extra field".into()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid input for tool 'search': missing query; extra field"
        );

        let err = AgentError::event_mapping(2, "no tool call");
        assert_eq!(
            err.to_string(),
            "Choice 2 cannot be mapped to an event: no tool call"
        );
        assert!(AgentError::Cancelled.is_cancelled());
    }
}
