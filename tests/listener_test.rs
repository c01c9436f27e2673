use rwa_indexer::chain::{LogNotification, MockChainClient, TransactionInfo};
use rwa_indexer::db::init_db;
use rwa_indexer::decoder::encode_event_log;
use rwa_indexer::domain::{
    Address, AssetCreated, DividendClaimed, DividendOpened, ProgramEvent, SharesBought, TimeMs,
};
use rwa_indexer::orchestration::{Listener, ListenerConfig};
use rwa_indexer::{AccountLayout, EventProcessor, LedgerReader, Repository};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 32])
}

fn market() -> Address {
    addr(60)
}

fn registry() -> Address {
    addr(61)
}

fn test_config() -> ListenerConfig {
    ListenerConfig {
        retry_max_elapsed: Duration::from_millis(50),
        resubscribe_initial: Duration::from_millis(10),
        resubscribe_max: Duration::from_millis(20),
        transaction_lookup_max_elapsed: Duration::ZERO,
    }
}

async fn setup_db() -> (sqlx::SqlitePool, Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool.clone()));
    (pool, repo, temp_dir)
}

fn listener(chain: &MockChainClient, repo: &Arc<Repository>) -> Listener {
    Listener::new(
        Arc::new(chain.clone()),
        Arc::new(EventProcessor::new(repo.clone())),
        repo.clone(),
        AccountLayout::default(),
        vec![market(), registry()],
        test_config(),
    )
}

async fn wait_for<F, Fut>(reader: &LedgerReader, mut done: F)
where
    F: FnMut(LedgerReader) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if done(reader.clone()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn created() -> ProgramEvent {
    ProgramEvent::AssetCreated(AssetCreated {
        asset: addr(9),
        issuer: addr(8),
        asset_mint: addr(2),
        price_usdc: 10_000_000,
        total_supply: 1_000,
        free_float: 1_000,
    })
}

fn bought(amount: i64) -> ProgramEvent {
    ProgramEvent::SharesBought(SharesBought {
        buyer: addr(1),
        mint: addr(2),
        amount,
        total_paid: amount * 10_000_000,
    })
}

#[tokio::test]
async fn test_streams_both_programs_and_unsubscribes_on_shutdown() {
    let (_pool, repo, _temp) = setup_db().await;
    let keys: Vec<Address> = (20..26).map(addr).collect();
    let chain = MockChainClient::new()
        .with_events(&registry(), "sig-create", 10, &[created()])
        .unwrap()
        .with_transaction(
            "sig-create",
            TransactionInfo {
                account_keys: keys.clone(),
                block_time: Some(1_700_000_000),
                slot: 10,
            },
        )
        .with_events(&market(), "sig-buy", 11, &[bought(5), bought(2)])
        .unwrap();

    let listener = listener(&chain, &repo);
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move { listener.run(rx).await });

    let reader = repo.reader();
    wait_for(&reader, |r| async move {
        r.stats().await.map(|s| s.assets == 1 && s.trades == 2).unwrap_or(false)
    })
    .await;

    let asset = reader.get_asset(&addr(2)).await.unwrap().unwrap();
    assert_eq!(asset.usdc_mint, keys[4].to_string());
    assert_eq!(asset.created_at, TimeMs::new(1_700_000_000_000));

    // Trade events may arrive before the asset; the ledger converges either way.
    wait_for(&reader, |r| async move {
        r.get_position(&addr(1), &addr(2))
            .await
            .ok()
            .flatten()
            .map(|p| p.shares == 7)
            .unwrap_or(false)
    })
    .await;

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("listener did not stop")
        .unwrap();

    assert_eq!(chain.subscription_count(), 2);
    assert_eq!(chain.unsubscribe_count(), 2);
}

#[tokio::test]
async fn test_resubscribes_after_drop_without_duplicating() {
    let (_pool, repo, _temp) = setup_db().await;
    let chain = MockChainClient::new()
        .with_events(&market(), "sig-buy", 11, &[bought(3)])
        .unwrap()
        .closing_feeds();

    let listener = listener(&chain, &repo);
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move { listener.run(rx).await });

    // Each reconnect replays the same notification.
    for _ in 0..200 {
        if chain.subscription_count() >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(chain.subscription_count() >= 5);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("listener did not stop")
        .unwrap();

    let reader = repo.reader();
    assert_eq!(reader.stats().await.unwrap().trades, 1);
    let position = reader.get_position(&addr(1), &addr(2)).await.unwrap().unwrap();
    assert_eq!(position.shares, 3);
}

#[tokio::test]
async fn test_claim_pda_resolved_from_account_keys() {
    let (_pool, repo, _temp) = setup_db().await;
    let keys: Vec<Address> = (30..34).map(addr).collect();
    let chain = MockChainClient::new().with_transaction(
        "sig-claim",
        TransactionInfo {
            account_keys: keys.clone(),
            block_time: None,
            slot: 12,
        },
    );
    let listener = listener(&chain, &repo);

    let opened = ProgramEvent::DividendOpened(DividendOpened {
        dividend: addr(5),
        asset: addr(9),
        total_amount: 100,
        supply_circ_at_open: 10,
    });
    let claim = ProgramEvent::DividendClaimed(DividendClaimed {
        dividend: addr(5),
        holder: addr(1),
        amount: 25,
    });
    let notification = |sig: &str, events: &[ProgramEvent]| LogNotification {
        signature: sig.to_string(),
        slot: 12,
        logs: events.iter().map(|e| encode_event_log(e).unwrap()).collect(),
        failed: false,
    };

    listener
        .handle_notification(&notification("sig-create", &[created()]))
        .await
        .unwrap();
    listener
        .handle_notification(&notification("sig-open", &[opened]))
        .await
        .unwrap();
    let summary = listener
        .handle_notification(&notification("sig-claim", &[claim]))
        .await
        .unwrap();
    assert_eq!(summary.applied, 1);

    let claims = repo.reader().list_claims(Some(&addr(1)), None).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].pda, keys[1].to_string());
}

#[tokio::test]
async fn test_persistence_failure_is_dead_lettered() {
    let (pool, repo, _temp) = setup_db().await;
    sqlx::query("DROP TABLE positions")
        .execute(&pool)
        .await
        .unwrap();

    let chain = MockChainClient::new();
    let listener = listener(&chain, &repo);
    let notification = LogNotification {
        signature: "sig-doomed".to_string(),
        slot: 13,
        logs: vec![encode_event_log(&bought(1)).unwrap()],
        failed: false,
    };

    let summary = listener.handle_notification(&notification).await.unwrap();
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(summary.applied, 0);

    let reader = repo.reader();
    let letters = reader.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].signature, "sig-doomed");
    assert_eq!(letters[0].event_name, "SharesBought");
    assert!(letters[0].payload.contains("SharesBought"));

    // The failed trade was rolled back with the rest of its transaction.
    let trades: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(trades, 0);
}
