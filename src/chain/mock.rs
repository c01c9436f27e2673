//! Mock chain client for testing without network calls.

use super::{ChainClient, ChainError, LogNotification, LogSubscription, ProgramAccount, TransactionInfo};
use crate::decoder::{encode_event_log, DecodeError};
use crate::domain::{Address, ProgramEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Mock chain client that replays predefined notifications, transactions and accounts.
///
/// Clones share account state and counters, so a test can keep a handle and
/// change what the next `get_program_accounts` call returns.
#[derive(Debug, Clone, Default)]
pub struct MockChainClient {
    feeds: HashMap<Address, Vec<LogNotification>>,
    transactions: HashMap<String, TransactionInfo>,
    /// Lookups of a signature that still answer `None`.
    transaction_misses: Arc<Mutex<HashMap<String, usize>>>,
    transaction_lookups: Arc<AtomicUsize>,
    accounts: Arc<Mutex<HashMap<Address, Vec<ProgramAccount>>>>,
    fail_program_accounts: Arc<AtomicBool>,
    close_feed_after_delivery: bool,
    subscriptions: Arc<AtomicUsize>,
    unsubscriptions: Arc<AtomicUsize>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification on the log feed of `program`.
    pub fn with_notification(mut self, program: &Address, notification: LogNotification) -> Self {
        self.feeds
            .entry(program.clone())
            .or_default()
            .push(notification);
        self
    }

    /// Queue a successful transaction emitting `events`, wrapped in the usual
    /// invoke/success log lines.
    pub fn with_events(
        self,
        program: &Address,
        signature: &str,
        slot: u64,
        events: &[ProgramEvent],
    ) -> Result<Self, DecodeError> {
        let mut logs = vec![format!("Program {} invoke [1]", program)];
        for event in events {
            logs.push(encode_event_log(event)?);
        }
        logs.push(format!("Program {} success", program));

        Ok(self.with_notification(
            program,
            LogNotification {
                signature: signature.to_string(),
                slot,
                logs,
                failed: false,
            },
        ))
    }

    /// Register the transaction returned for `signature`.
    pub fn with_transaction(mut self, signature: &str, info: TransactionInfo) -> Self {
        self.transactions.insert(signature.to_string(), info);
        self
    }

    /// Answer `None` for the first `misses` lookups of `signature`, as a node
    /// that has not indexed the transaction yet.
    pub fn with_transaction_lag(self, signature: &str, misses: usize) -> Self {
        lock(&self.transaction_misses).insert(signature.to_string(), misses);
        self
    }

    /// Add an account owned by `program`.
    pub fn with_account(self, program: &Address, account: ProgramAccount) -> Self {
        lock(&self.accounts)
            .entry(program.clone())
            .or_default()
            .push(account);
        self
    }

    /// End each log feed once its queued notifications are delivered, as a
    /// dropped websocket would.
    pub fn closing_feeds(mut self) -> Self {
        self.close_feed_after_delivery = true;
        self
    }

    /// Replace the accounts owned by `program`.
    pub fn set_program_accounts(&self, program: &Address, accounts: Vec<ProgramAccount>) {
        lock(&self.accounts).insert(program.clone(), accounts);
    }

    /// Make `get_program_accounts` fail until reset.
    pub fn set_program_accounts_failing(&self, failing: bool) {
        self.fail_program_accounts.store(failing, Ordering::SeqCst);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscriptions.load(Ordering::SeqCst)
    }

    pub fn transaction_lookup_count(&self) -> usize {
        self.transaction_lookups.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn subscribe_logs(&self, program: &Address) -> Result<LogSubscription, ChainError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let feed = self.feeds.get(program).cloned().unwrap_or_default();
        let (tx, rx) = mpsc::channel(feed.len() + 1);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let close_after = self.close_feed_after_delivery;
        let unsubscriptions = Arc::clone(&self.unsubscriptions);

        let task = tokio::spawn(async move {
            for notification in feed {
                if tx.send(Ok(notification)).await.is_err() {
                    return;
                }
            }
            if close_after {
                return;
            }
            if cancel_rx.await.is_ok() {
                unsubscriptions.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(LogSubscription::new(rx, cancel_tx, task))
    }

    async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionInfo>, ChainError> {
        self.transaction_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(misses) = lock(&self.transaction_misses).get_mut(signature) {
            if *misses > 0 {
                *misses -= 1;
                return Ok(None);
            }
        }
        Ok(self.transactions.get(signature).cloned())
    }

    async fn get_program_accounts(
        &self,
        program: &Address,
    ) -> Result<Vec<ProgramAccount>, ChainError> {
        if self.fail_program_accounts.load(Ordering::SeqCst) {
            return Err(ChainError::NetworkError("mock rpc unavailable".to_string()));
        }
        Ok(lock(&self.accounts)
            .get(program)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DividendClosed;

    fn program() -> Address {
        Address::from_bytes([7; 32])
    }

    #[tokio::test]
    async fn test_mock_replays_feed_then_waits_for_unsubscribe() {
        let event = ProgramEvent::DividendClosed(DividendClosed {
            dividend: Address::from_bytes([1; 32]),
            remaining_amount: 0,
        });
        let mock = MockChainClient::new()
            .with_events(&program(), "sig-1", 10, &[event])
            .unwrap();

        let mut sub = mock.subscribe_logs(&program()).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.signature, "sig-1");
        assert_eq!(first.logs.len(), 3);
        assert!(first.logs[1].starts_with("Program data: "));

        sub.unsubscribe().await;
        assert_eq!(mock.subscription_count(), 1);
        assert_eq!(mock.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_closing_feed_ends_stream() {
        let mock = MockChainClient::new().closing_feeds();
        let mut sub = mock.subscribe_logs(&program()).await.unwrap();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_program_accounts_shared_between_clones() {
        let mock = MockChainClient::new();
        let handle = mock.clone();
        handle.set_program_accounts(
            &program(),
            vec![ProgramAccount {
                address: Address::from_bytes([2; 32]),
                data: vec![1],
            }],
        );
        assert_eq!(mock.get_program_accounts(&program()).await.unwrap().len(), 1);

        handle.set_program_accounts_failing(true);
        assert!(mock.get_program_accounts(&program()).await.is_err());
        assert_eq!(mock.get_transaction("missing").await.unwrap(), None);
    }
}
