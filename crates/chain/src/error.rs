//! RPC error classification.
//!
//! Callers branch on the kind of failure (a benign revert is not an alert, a
//! stale nonce triggers a resync), so transport errors are mapped onto a small
//! closed set instead of being passed around as opaque strings.

use thiserror::Error;

/// Error returned by every [`ChainRpc`](crate::ChainRpc) operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The call did not complete within the configured deadline.
    #[error("rpc call timed out after {0}ms")]
    Timeout(u64),

    /// The node executed the call and it reverted.
    #[error("execution reverted: {reason}")]
    Revert { reason: String },

    /// The submitted transaction used a nonce the chain has already consumed.
    #[error("nonce too low: {0}")]
    NonceTooLow(String),

    /// The response could not be decoded into the expected type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Any other transport or node failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Classify a raw node error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("nonce too low")
            || lower.contains("nonce is too low")
            || lower.contains("nonce has already been used")
        {
            return Self::NonceTooLow(message);
        }

        if let Some(pos) = lower.find("execution reverted") {
            let reason = message
                .get(pos + "execution reverted".len()..)
                .unwrap_or_default()
                .trim_start_matches(|c: char| c == ':' || c.is_whitespace());
            // alloy appends the raw revert payload after the reason
            let reason = reason.split(", data:").next().unwrap_or_default().to_string();
            return Self::Revert { reason };
        }

        Self::Transport(message)
    }

    /// Revert reason, if this is a revert.
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            Self::Revert { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}
