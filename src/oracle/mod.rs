// Decision oracle boundary (chat-completion style models)
pub mod chat;

pub use chat::{ChatCompletionClient, ChatSettings};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle returned no content")]
    EmptyResponse,
    #[error("malformed oracle response: {0}")]
    Decode(String),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

impl OracleError {
    /// Transport-level failures worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Http(_) => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::EmptyResponse | OracleError::Decode(_) | OracleError::Unavailable(_) => {
                false
            }
        }
    }
}

/// Black-box classifier consulted once per cycle
///
/// Implementations return the raw completion text. Interpreting it is the
/// signal generator's job.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}
