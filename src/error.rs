use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    // Network errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Receipt wait timed out for {0}")]
    ReceiptTimeout(String),

    // Transaction errors
    #[error("Gas estimation failed: {0}")]
    Estimation(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Insufficient balance: have {have} wei, need {need} wei")]
    InsufficientBalance { have: String, need: String },

    // Bridge errors
    #[error("Bridge transfer not observed on destination chain within {0} polls")]
    BridgeTimeout(u32),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    // Storage errors
    #[error("Quota store error: {0}")]
    Storage(String),
}

impl FleetError {
    /// Check if the error is network-classified and worth a reconnect-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::Connection(_) | FleetError::Rpc(_) | FleetError::ReceiptTimeout(_)
        )
    }

    /// Check if the error must abort before any scheduling begins.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::Configuration(_) | FleetError::InvalidKey(_)
        )
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            FleetError::Connection(_) | FleetError::Rpc(_) | FleetError::ReceiptTimeout(_) => {
                "network"
            }
            FleetError::Estimation(_) | FleetError::Submission(_) | FleetError::Reverted(_) => {
                "transaction"
            }
            FleetError::InsufficientBalance { .. } => "balance",
            FleetError::BridgeTimeout(_) => "bridge",
            FleetError::Configuration(_) | FleetError::InvalidKey(_) => "configuration",
            FleetError::Storage(_) => "storage",
        }
    }
}

/// Classify a raw RPC failure message as connection-like or not.
///
/// Mirrors the transport failure modes seen from public testnet endpoints:
/// unreachable hosts, dropped sockets, gateway timeouts and rate limits.
pub fn connection_like(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    ["connection", "network", "timeout", "timed out", "reset", "unreachable", "429", "503"]
        .iter()
        .any(|needle| msg.contains(needle))
}

// Result type alias for convenience
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FleetError::Connection("refused".into()).is_retryable());
        assert!(FleetError::Rpc("eof".into()).is_retryable());
        assert!(!FleetError::InsufficientBalance { have: "1".into(), need: "2".into() }
            .is_retryable());
        assert!(!FleetError::BridgeTimeout(30).is_retryable());
        assert!(!FleetError::Reverted("0xabc".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FleetError::Configuration("no accounts".into()).is_fatal());
        assert!(!FleetError::Connection("refused".into()).is_fatal());
        assert!(!FleetError::BridgeTimeout(30).is_fatal());
    }

    #[test]
    fn test_connection_like_matching() {
        assert!(connection_like("error sending request: Connection refused"));
        assert!(connection_like("request Timed Out after 30s"));
        assert!(connection_like("HTTP 429 Too Many Requests"));
        assert!(!connection_like("execution reverted: insufficient funds"));
    }
}
