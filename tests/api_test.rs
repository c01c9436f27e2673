use axum::http::StatusCode;
use rwa_indexer::api::{self, AppState};
use rwa_indexer::chain::{MockChainClient, ProgramAccount};
use rwa_indexer::db::{init_db, NewDeadLetter};
use rwa_indexer::decoder::encode_asset_account;
use rwa_indexer::domain::{
    Address, AssetAccount, AssetCreated, DividendOpened, ProgramEvent, SharesBought, SharesSold,
    TimeMs,
};
use rwa_indexer::engine::{AssetSyncService, EventContext, EventProcessor};
use rwa_indexer::Repository;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    processor: EventProcessor,
    _temp: TempDir,
}

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 32])
}

fn registry() -> Address {
    addr(50)
}

async fn setup_test_app(chain: MockChainClient) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool));
    let sync = Arc::new(AssetSyncService::new(
        Arc::new(chain),
        repo.clone(),
        registry(),
    ));
    let app = api::create_router(AppState::new(repo.reader(), sync));

    TestApp {
        app,
        processor: EventProcessor::new(repo),
        _temp: temp_dir,
    }
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => axum::body::Body::from(json.to_string()),
            None => axum::body::Body::empty(),
        })
        .unwrap();

    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

impl TestApp {
    async fn apply(&self, sig: &str, event: ProgramEvent) {
        let ctx = EventContext::new(sig, 1).with_block_time(Some(TimeMs::now()));
        self.processor.process(&event, &ctx).await.unwrap();
    }

    /// Asset at 12 per share; wallet 1 holds 50 shares bought at 10 average.
    async fn seed(&self) {
        self.apply(
            "create",
            ProgramEvent::AssetCreated(AssetCreated {
                asset: addr(9),
                issuer: addr(8),
                asset_mint: addr(2),
                price_usdc: 12_000_000,
                total_supply: 1_000,
                free_float: 1_000,
            }),
        )
        .await;
        self.apply(
            "buy",
            ProgramEvent::SharesBought(SharesBought {
                buyer: addr(1),
                mint: addr(2),
                amount: 100,
                total_paid: 1_000_000_000,
            }),
        )
        .await;
        self.apply(
            "sell",
            ProgramEvent::SharesSold(SharesSold {
                seller: addr(1),
                mint: addr(2),
                amount: 50,
                total_received: 600_000_000,
            }),
        )
        .await;
    }
}

#[tokio::test]
async fn test_health_and_ready() {
    let t = setup_test_app(MockChainClient::new()).await;
    let (status, body) = get(t.app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(t.app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_assets_list_and_detail() {
    let t = setup_test_app(MockChainClient::new()).await;
    t.seed().await;

    let (status, body) = get(t.app.clone(), "/v1/assets?sort=price").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assets"].as_array().unwrap().len(), 1);
    assert_eq!(body["assets"][0]["mint"], addr(2).to_string());
    assert_eq!(body["assets"][0]["freeFloat"], 950);
    assert_eq!(body["assets"][0]["price"], 12.0);

    let (status, body) = get(t.app.clone(), &format!("/v1/assets/{}", addr(2))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["priceUsdc"], 12_000_000);

    let (status, body) = get(t.app.clone(), &format!("/v1/assets/{}", addr(3))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = get(t.app.clone(), "/v1/assets/not-a-key").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(t.app, "/v1/assets?sort=random").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_price_update() {
    let t = setup_test_app(MockChainClient::new()).await;
    t.seed().await;

    let uri = format!("/v1/assets/{}/price", addr(2));
    let (status, body) = send(
        t.app.clone(),
        "POST",
        &uri,
        Some(serde_json::json!({"priceUsdc": 15_000_000})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["priceUsdc"], 15_000_000);

    let unknown = format!("/v1/assets/{}/price", addr(3));
    let (status, _) = send(
        t.app,
        "POST",
        &unknown,
        Some(serde_json::json!({"priceUsdc": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trades_pagination_and_limit_cap() {
    let t = setup_test_app(MockChainClient::new()).await;
    t.seed().await;

    let (status, body) = get(
        t.app.clone(),
        &format!("/v1/trades?wallet={}&limit=1", addr(1)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trades"].as_array().unwrap().len(), 1);

    let (_, body) = get(t.app.clone(), "/v1/trades?limit=10000").await;
    assert_eq!(body["limit"], 500);
    assert_eq!(body["trades"].as_array().unwrap().len(), 2);

    let (status, _) = get(t.app.clone(), "/v1/trades?wallet=0x123").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(t.app, "/v1/trades?offset=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_portfolio_and_pnl() {
    let t = setup_test_app(MockChainClient::new()).await;
    t.seed().await;

    let (status, body) = get(t.app.clone(), &format!("/v1/portfolio?wallet={}", addr(1))).await;
    assert_eq!(status, StatusCode::OK);
    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["shares"], 50);
    assert_eq!(positions[0]["totalInvested"], 500.0);
    assert_eq!(positions[0]["currentValue"], 600.0);
    assert_eq!(body["summary"]["totalProfitLoss"], 100.0);

    let (status, body) = get(t.app.clone(), &format!("/v1/pnl/portfolio?wallet={}", addr(1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalInvested"], 500.0);
    assert_eq!(body["totalCurrentValue"], 600.0);
    assert_eq!(body["totalProfitLossPercent"], 20.0);

    let (status, body) = get(
        t.app.clone(),
        &format!("/v1/pnl/history?wallet={}&days=7", addr(1)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);

    let (status, _) = get(
        t.app.clone(),
        &format!("/v1/pnl/history?wallet={}&days=0", addr(1)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(
        t.app.clone(),
        &format!("/v1/assets/{}/performance?days=30", addr(2)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chartData"].as_array().unwrap().len(), 1);

    let (status, _) = get(t.app, "/v1/pnl/portfolio").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dividends_claims_and_stats() {
    let t = setup_test_app(MockChainClient::new()).await;
    t.seed().await;
    t.apply(
        "open",
        ProgramEvent::DividendOpened(DividendOpened {
            dividend: addr(5),
            asset: addr(9),
            total_amount: 1_000,
            supply_circ_at_open: 50,
        }),
    )
    .await;

    let (status, body) = get(t.app.clone(), &format!("/v1/dividends?mint={}", addr(2))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dividends"][0]["pda"], addr(5).to_string());
    assert_eq!(body["dividends"][0]["isClosed"], false);

    let (status, body) = get(t.app.clone(), "/v1/claims?dividendId=1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["claims"].as_array().unwrap().is_empty());

    let (status, body) = get(t.app, "/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assets"], 1);
    assert_eq!(body["trades"], 2);
    assert_eq!(body["positions"], 1);
    assert_eq!(body["dividends"], 1);
    assert_eq!(body["deadLetters"], 0);
}

#[tokio::test]
async fn test_manual_sync() {
    let account = AssetAccount {
        account: addr(10),
        issuer: addr(40),
        mint: addr(20),
        usdc_mint: addr(41),
        decimals: 6,
        price_usdc: 5_000_000,
        total_supply: 1_000,
        free_float: 900,
    };
    let chain = MockChainClient::new().with_account(
        &registry(),
        ProgramAccount {
            address: addr(10),
            data: encode_asset_account(&account).unwrap(),
        },
    );
    let t = setup_test_app(chain.clone()).await;

    let (status, body) = send(t.app.clone(), "POST", "/v1/sync/assets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountsSeen"], 1);
    assert_eq!(body["inserted"], 1);

    chain.set_program_accounts_failing(true);
    let (status, body) = send(t.app, "POST", "/v1/sync/assets", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("registry accounts"));
}

#[tokio::test]
async fn test_dead_letters_listing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    for slot in 1..=3 {
        repo.insert_dead_letter(&NewDeadLetter {
            signature: format!("sig-{}", slot),
            slot,
            event_name: "SharesBought".to_string(),
            payload: "{}".to_string(),
            error: "database is locked".to_string(),
            created_at: TimeMs::new(slot),
        })
        .await
        .unwrap();
    }
    let sync = Arc::new(AssetSyncService::new(
        Arc::new(MockChainClient::new()),
        repo.clone(),
        registry(),
    ));
    let app = api::create_router(AppState::new(repo.reader(), sync));

    let (status, body) = get(app.clone(), "/v1/dead-letters?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let letters = body["deadLetters"].as_array().unwrap();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0]["signature"], "sig-3");
    assert_eq!(letters[0]["eventName"], "SharesBought");

    let (status, _) = get(app, "/v1/dead-letters?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
