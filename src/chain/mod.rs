//! Chain client abstraction: log subscriptions, transaction lookups and
//! program-account snapshots.

use crate::domain::Address;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub mod mock;
pub mod rpc;

pub use mock::MockChainClient;
pub use rpc::SolanaRpcClient;

/// Chain client used by the listener and the asset sync service.
///
/// Every call is an independent, failable network operation.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Subscribe to confirmed transactions whose logs mention `program`.
    async fn subscribe_logs(&self, program: &Address) -> Result<LogSubscription, ChainError>;

    /// Fetch a confirmed transaction; `None` if the node does not know it (yet).
    async fn get_transaction(&self, signature: &str)
        -> Result<Option<TransactionInfo>, ChainError>;

    /// Fetch every account owned by `program`.
    async fn get_program_accounts(
        &self,
        program: &Address,
    ) -> Result<Vec<ProgramAccount>, ChainError>;
}

/// One `logsNotification` delivered by the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub signature: String,
    pub slot: u64,
    pub logs: Vec<String>,
    /// The transaction failed on chain; its logs describe no state change.
    pub failed: bool,
}

/// Transaction details needed to enrich decoded events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub account_keys: Vec<Address>,
    /// Block time in seconds, when the node reports one.
    pub block_time: Option<i64>,
    pub slot: u64,
}

/// Raw account owned by a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAccount {
    pub address: Address,
    pub data: Vec<u8>,
}

/// Live log subscription.
///
/// Dropping it without [`LogSubscription::unsubscribe`] leaves the server-side
/// subscription to time out; callers should unsubscribe on shutdown.
pub struct LogSubscription {
    receiver: mpsc::Receiver<Result<LogNotification, ChainError>>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LogSubscription {
    pub fn new(
        receiver: mpsc::Receiver<Result<LogNotification, ChainError>>,
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    /// Next notification; `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Result<LogNotification, ChainError>> {
        self.receiver.recv().await
    }

    /// Tear down the subscription and wait for the feed task to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Subscription task ended abnormally");
            }
        }
    }
}

impl fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Error type for chain client operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Network error (connection refused, timeout, TLS failure).
    NetworkError(String),
    /// HTTP error (e.g. 5xx from the RPC gateway).
    HttpError { status: u16, message: String },
    /// JSON-RPC error object returned by the node.
    Rpc { code: i64, message: String },
    /// Response did not have the expected shape.
    ParseError(String),
    /// Rate limit exceeded (caller should back off).
    RateLimited,
    /// The subscription stream was closed by the remote end.
    SubscriptionClosed(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ChainError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ChainError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ChainError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ChainError::RateLimited => write!(f, "Rate limited"),
            ChainError::SubscriptionClosed(msg) => write!(f, "Subscription closed: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::NetworkError("connection timeout".to_string());
        assert_eq!(err.to_string(), "Network error: connection timeout");

        let err = ChainError::HttpError {
            status: 503,
            message: "Server error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Server error");

        let err = ChainError::Rpc {
            code: -32009,
            message: "slot skipped".to_string(),
        };
        assert_eq!(err.to_string(), "RPC error -32009: slot skipped");

        assert_eq!(ChainError::RateLimited.to_string(), "Rate limited");
    }

    #[tokio::test]
    async fn test_subscription_unsubscribe_stops_task() {
        let (tx, rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = cancel_rx.await;
            drop(tx);
        });

        let mut sub = LogSubscription::new(rx, cancel_tx, task);
        assert!(format!("{:?}", sub).contains("active: true"));
        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), sub.next()).await;
        assert!(pending.is_err(), "feed should still be open");
        sub.unsubscribe().await;
    }
}
