//! Long-lived log subscription that feeds decoded events to the processor.

use crate::chain::{ChainClient, ChainError, LogNotification, LogSubscription, TransactionInfo};
use crate::db::{NewDeadLetter, Repository};
use crate::decoder::{AccountLayout, EventDecoder};
use crate::domain::{Address, ProgramEvent, TimeMs};
use crate::engine::{EventContext, EventProcessor, ProcessError, ProcessOutcome};
use backoff::backoff::Backoff;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Upper bound on retrying one event before it is dead-lettered.
    pub retry_max_elapsed: Duration,
    pub resubscribe_initial: Duration,
    pub resubscribe_max: Duration,
    /// How long to keep asking for a transaction the node has not indexed yet.
    pub transaction_lookup_max_elapsed: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            retry_max_elapsed: Duration::from_secs(30),
            resubscribe_initial: Duration::from_millis(500),
            resubscribe_max: Duration::from_secs(30),
            transaction_lookup_max_elapsed: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to write dead letter: {0}")]
    DeadLetter(#[from] sqlx::Error),
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What happened to the events of one notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationSummary {
    pub events: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub dead_lettered: usize,
}

pub struct Listener {
    chain: Arc<dyn ChainClient>,
    processor: Arc<EventProcessor>,
    repo: Arc<Repository>,
    decoder: EventDecoder,
    layout: AccountLayout,
    programs: Vec<Address>,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        processor: Arc<EventProcessor>,
        repo: Arc<Repository>,
        layout: AccountLayout,
        programs: Vec<Address>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            chain,
            processor,
            repo,
            decoder: EventDecoder::new(),
            layout,
            programs,
            config,
        }
    }

    /// Follow every configured program until `shutdown` becomes true.
    ///
    /// Each program has its own subscription; all of them are unsubscribed
    /// before this returns.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            programs = self.programs.len(),
            layout = %self.layout.version(),
            "Listener starting"
        );
        join_all(
            self.programs
                .iter()
                .map(|program| self.follow(program, shutdown.clone())),
        )
        .await;
        info!("Listener stopped");
    }

    async fn follow(&self, program: &Address, mut shutdown: watch::Receiver<bool>) {
        let mut reconnect = ExponentialBackoff {
            initial_interval: self.config.resubscribe_initial,
            max_interval: self.config.resubscribe_max,
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.chain.subscribe_logs(program).await {
                Ok(subscription) => {
                    reconnect.reset();
                    if self.drain(program, subscription, &mut shutdown).await {
                        return;
                    }
                }
                Err(e) => warn!(program = %program, error = %e, "Log subscription failed"),
            }

            let delay = reconnect
                .next_backoff()
                .unwrap_or(self.config.resubscribe_max);
            debug!(program = %program, delay_ms = delay.as_millis() as u64, "Resubscribing");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Process notifications until the feed ends or shutdown is requested.
    /// Returns true on shutdown.
    async fn drain(
        &self,
        program: &Address,
        mut subscription: LogSubscription,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        subscription.unsubscribe().await;
                        info!(program = %program, "Unsubscribed from program logs");
                        return true;
                    }
                }
                next = subscription.next() => match next {
                    Some(Ok(notification)) => {
                        if let Err(e) = self.handle_notification(&notification).await {
                            error!(
                                signature = %notification.signature,
                                error = %e,
                                "Failed to handle notification"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        warn!(program = %program, error = %e, "Log subscription dropped");
                        subscription.unsubscribe().await;
                        return false;
                    }
                    None => {
                        warn!(program = %program, "Log subscription closed");
                        subscription.unsubscribe().await;
                        return false;
                    }
                },
            }
        }
    }

    /// Decode one notification and apply its events in log order.
    pub async fn handle_notification(
        &self,
        notification: &LogNotification,
    ) -> Result<NotificationSummary, ListenerError> {
        let mut summary = NotificationSummary::default();
        if notification.failed {
            debug!(signature = %notification.signature, "Skipping failed transaction");
            return Ok(summary);
        }

        let events = self.decoder.decode_logs(&notification.logs);
        if events.is_empty() {
            return Ok(summary);
        }
        summary.events = events.len();

        let (block_time, account_keys) = match self.lookup_transaction(&notification.signature).await {
            Ok(Some(tx)) => (tx.block_time.map(TimeMs::from_unix_seconds), tx.account_keys),
            Ok(None) => {
                warn!(signature = %notification.signature, "Transaction not found, using local time");
                (None, Vec::new())
            }
            Err(e) => {
                warn!(
                    signature = %notification.signature,
                    error = %e,
                    "Transaction fetch failed, using local time"
                );
                (None, Vec::new())
            }
        };

        let mut trade_ordinal = 0;
        for event in &events {
            let ctx = EventContext::new(notification.signature.clone(), notification.slot)
                .with_block_time(block_time)
                .with_roles(self.layout.resolve(event, &account_keys))
                .with_trade_ordinal(trade_ordinal);
            if event.is_trade() {
                trade_ordinal += 1;
            }

            match self.process_with_retry(event, &ctx).await {
                Ok(ProcessOutcome::Applied) => summary.applied += 1,
                Ok(ProcessOutcome::Duplicate) => summary.duplicates += 1,
                Ok(ProcessOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    self.dead_letter(event, &ctx, &e).await?;
                    summary.dead_lettered += 1;
                }
            }
        }

        debug!(
            signature = %notification.signature,
            events = summary.events,
            applied = summary.applied,
            duplicates = summary.duplicates,
            "Notification handled"
        );
        Ok(summary)
    }

    /// Fetch the transaction behind a notification. A node that has not
    /// indexed it yet answers `None`; that is retried until
    /// `transaction_lookup_max_elapsed`, then reported as `Ok(None)`.
    async fn lookup_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionInfo>, ChainError> {
        let policy = ExponentialBackoff {
            current_interval: Duration::from_millis(100),
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(self.config.transaction_lookup_max_elapsed),
            ..Default::default()
        };

        // `None` as the error marks a miss worth retrying.
        let found = retry(policy, || async {
            match self.chain.get_transaction(signature).await {
                Ok(Some(tx)) => Ok(tx),
                Ok(None) => {
                    debug!(signature = %signature, "Transaction not indexed yet, retrying");
                    Err(backoff::Error::transient(None))
                }
                Err(e) => Err(backoff::Error::permanent(Some(e))),
            }
        })
        .await;

        match found {
            Ok(tx) => Ok(Some(tx)),
            Err(None) => Ok(None),
            Err(Some(e)) => Err(e),
        }
    }

    async fn process_with_retry(
        &self,
        event: &ProgramEvent,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.config.retry_max_elapsed),
            ..Default::default()
        };

        retry(policy, || async {
            self.processor.process(event, ctx).await.map_err(|e| {
                if e.is_transient() {
                    warn!(
                        signature = %ctx.signature,
                        event = event.name(),
                        error = %e,
                        "Event processing failed, retrying"
                    );
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn dead_letter(
        &self,
        event: &ProgramEvent,
        ctx: &EventContext,
        cause: &ProcessError,
    ) -> Result<(), ListenerError> {
        error!(
            signature = %ctx.signature,
            slot = ctx.slot,
            event = event.name(),
            error = %cause,
            "Giving up on event, writing dead letter"
        );
        let letter = NewDeadLetter {
            signature: ctx.signature.clone(),
            slot: i64::try_from(ctx.slot).unwrap_or(i64::MAX),
            event_name: event.name().to_string(),
            payload: serde_json::to_string(event)?,
            error: cause.to_string(),
            created_at: TimeMs::now(),
        };
        self.repo.insert_dead_letter(&letter).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainClient, TransactionInfo};
    use crate::db::repo::test_support::setup_test_db;
    use crate::domain::{DividendClaimed, SharesBought};

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 32])
    }

    fn listener(chain: MockChainClient, repo: Arc<Repository>) -> Listener {
        Listener::new(
            Arc::new(chain),
            Arc::new(EventProcessor::new(repo.clone())),
            repo,
            AccountLayout::default(),
            vec![addr(60)],
            ListenerConfig {
                retry_max_elapsed: Duration::from_millis(50),
                resubscribe_initial: Duration::from_millis(10),
                resubscribe_max: Duration::from_millis(50),
                transaction_lookup_max_elapsed: Duration::from_millis(50),
            },
        )
    }

    fn notification(events: &[ProgramEvent], failed: bool) -> LogNotification {
        let logs = events
            .iter()
            .map(|e| crate::decoder::encode_event_log(e).unwrap())
            .collect();
        LogNotification {
            signature: "sig-a".to_string(),
            slot: 42,
            logs,
            failed,
        }
    }

    fn buy(amount: i64) -> ProgramEvent {
        ProgramEvent::SharesBought(SharesBought {
            buyer: addr(1),
            mint: addr(2),
            amount,
            total_paid: amount * 1_000_000,
        })
    }

    #[tokio::test]
    async fn test_failed_transaction_is_ignored() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let listener = listener(MockChainClient::new(), repo.clone());

        let summary = listener
            .handle_notification(&notification(&[buy(1)], true))
            .await
            .unwrap();
        assert_eq!(summary, NotificationSummary::default());
        assert_eq!(repo.reader().stats().await.unwrap().trades, 0);
    }

    #[tokio::test]
    async fn test_multi_trade_transaction_uses_block_time() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let chain = MockChainClient::new().with_transaction(
            "sig-a",
            TransactionInfo {
                account_keys: vec![addr(1)],
                block_time: Some(1_700_000_000),
                slot: 42,
            },
        );
        let listener = listener(chain, repo.clone());

        let n = notification(&[buy(2), buy(3)], false);
        let summary = listener.handle_notification(&n).await.unwrap();
        assert_eq!(summary.applied, 2);

        let again = listener.handle_notification(&n).await.unwrap();
        assert_eq!(again.duplicates, 2);

        let trades = repo
            .reader()
            .trades_for_position(&addr(1), &addr(2))
            .await
            .unwrap();
        let keys: Vec<&str> = trades.iter().map(|t| t.sig.as_str()).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"sig-a") && keys.contains(&"sig-a#1"));
        assert!(trades
            .iter()
            .all(|t| t.created_at == TimeMs::new(1_700_000_000_000)));
    }

    #[tokio::test]
    async fn test_lagging_transaction_lookup_is_retried() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let chain = MockChainClient::new()
            .with_transaction(
                "sig-a",
                TransactionInfo {
                    account_keys: vec![addr(1)],
                    block_time: Some(1_700_000_000),
                    slot: 42,
                },
            )
            .with_transaction_lag("sig-a", 2);
        let mut listener = listener(chain.clone(), repo.clone());
        listener.config.transaction_lookup_max_elapsed = Duration::from_secs(5);

        let summary = listener
            .handle_notification(&notification(&[buy(2)], false))
            .await
            .unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(chain.transaction_lookup_count(), 3);

        let trades = repo
            .reader()
            .trades_for_position(&addr(1), &addr(2))
            .await
            .unwrap();
        assert_eq!(trades[0].created_at, TimeMs::new(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_missing_transaction_falls_back_to_local_time() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let chain = MockChainClient::new();
        let mut listener = listener(chain.clone(), repo.clone());
        listener.config.transaction_lookup_max_elapsed = Duration::from_millis(300);

        let before = TimeMs::now();
        let summary = listener
            .handle_notification(&notification(&[buy(2)], false))
            .await
            .unwrap();
        assert_eq!(summary.applied, 1);
        assert!(chain.transaction_lookup_count() > 1);

        let trades = repo
            .reader()
            .trades_for_position(&addr(1), &addr(2))
            .await
            .unwrap();
        assert!(trades[0].created_at >= before);
    }

    #[tokio::test]
    async fn test_unknown_dividend_claim_counts_as_skipped() {
        let (repo, _temp) = setup_test_db().await;
        let listener = listener(MockChainClient::new(), Arc::new(repo));

        let claim = ProgramEvent::DividendClaimed(DividendClaimed {
            dividend: addr(5),
            holder: addr(1),
            amount: 10,
        });
        let summary = listener
            .handle_notification(&notification(&[claim], false))
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.dead_lettered, 0);
    }
}
