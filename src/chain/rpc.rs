//! Solana JSON-RPC and pubsub client.

use super::{ChainClient, ChainError, LogNotification, LogSubscription, ProgramAccount, TransactionInfo};
use crate::domain::Address;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_BUFFER: usize = 256;

/// Chain client backed by a Solana RPC node (HTTP for queries, websocket for logs).
#[derive(Debug, Clone)]
pub struct SolanaRpcClient {
    client: Client,
    rpc_url: String,
    ws_url: String,
    max_elapsed: Duration,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: String, ws_url: String) -> Self {
        Self {
            client: Client::new(),
            rpc_url,
            ws_url,
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Bound the total time spent retrying one HTTP call.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ChainError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(ChainError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(ChainError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::ParseError(e.to_string())))
        })
        .await?;

        if let Some(err) = body.get("error") {
            return Err(rpc_error(err));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    async fn subscribe_logs(&self, program: &Address) -> Result<LogSubscription, ChainError> {
        let (mut ws, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| ChainError::NetworkError(e.to_string()))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "logsSubscribe",
            "params": [
                {"mentions": [program.as_str()]},
                {"commitment": "confirmed"}
            ]
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| ChainError::NetworkError(e.to_string()))?;

        let subscription_id = tokio::time::timeout(ACK_TIMEOUT, await_subscription_ack(&mut ws))
            .await
            .map_err(|_| ChainError::NetworkError("timed out waiting for logsSubscribe ack".to_string()))??;

        info!(
            program = %program,
            subscription_id,
            ws_url = %self.ws_url,
            "Log subscription established"
        );

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_log_feed(ws, subscription_id, tx, cancel_rx));
        Ok(LogSubscription::new(rx, cancel_tx, task))
    }

    async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionInfo>, ChainError> {
        debug!(signature, "Fetching transaction");
        let result = self
            .call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "json",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;
        parse_transaction(&result)
    }

    async fn get_program_accounts(
        &self,
        program: &Address,
    ) -> Result<Vec<ProgramAccount>, ChainError> {
        debug!(program = %program, "Fetching program accounts");
        let result = self
            .call(
                "getProgramAccounts",
                json!([
                    program.as_str(),
                    {"encoding": "base64", "commitment": "confirmed"}
                ]),
            )
            .await?;

        let entries = result
            .as_array()
            .ok_or_else(|| ChainError::ParseError("Expected array response".to_string()))?;

        let mut accounts = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_program_account(entry) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("Failed to parse program account: {}", e),
            }
        }
        Ok(accounts)
    }
}

/// Derive the pubsub endpoint from an HTTP RPC URL.
pub fn ws_url_from_rpc(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}

fn rpc_error(err: &Value) -> ChainError {
    ChainError::Rpc {
        code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

async fn await_subscription_ack(ws: &mut WsStream) -> Result<u64, ChainError> {
    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| ChainError::NetworkError(e.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ChainError::ParseError(e.to_string()))?;
        if value.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
            continue;
        }
        if let Some(err) = value.get("error") {
            return Err(rpc_error(err));
        }
        return value
            .get("result")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::ParseError("Missing subscription id".to_string()));
    }
    Err(ChainError::SubscriptionClosed(
        "stream ended before subscription ack".to_string(),
    ))
}

async fn run_log_feed(
    mut ws: WsStream,
    subscription_id: u64,
    tx: mpsc::Sender<Result<LogNotification, ChainError>>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                let request = json!({
                    "jsonrpc": "2.0",
                    "id": UNSUBSCRIBE_REQUEST_ID,
                    "method": "logsUnsubscribe",
                    "params": [subscription_id]
                });
                if let Err(e) = ws.send(Message::Text(request.to_string())).await {
                    debug!(error = %e, subscription_id, "logsUnsubscribe send failed");
                }
                let _ = ws.close(None).await;
                info!(subscription_id, "Log subscription cancelled");
                return;
            }
            message = ws.next() => {
                let failure = match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(notification) = parse_logs_notification(&text) {
                            if tx.send(Ok(notification)).await.is_err() {
                                return;
                            }
                        }
                        continue;
                    }
                    Some(Ok(Message::Ping(payload))) => match ws.send(Message::Pong(payload)).await {
                        Ok(()) => continue,
                        Err(e) => ChainError::NetworkError(e.to_string()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        ChainError::SubscriptionClosed(format!("{:?}", frame))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => ChainError::NetworkError(e.to_string()),
                    None => ChainError::SubscriptionClosed("stream ended".to_string()),
                };
                warn!(subscription_id, error = %failure, "Log feed terminated");
                let _ = tx.send(Err(failure)).await;
                return;
            }
        }
    }
}

fn parse_logs_notification(text: &str) -> Option<LogNotification> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Skipping invalid ws message json");
            return None;
        }
    };

    if value.get("method").and_then(Value::as_str) != Some("logsNotification") {
        return None;
    }

    let result = value.get("params")?.get("result")?;
    let event = result.get("value")?;
    let signature = event.get("signature")?.as_str()?.to_string();
    let slot = result
        .pointer("/context/slot")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let logs = event
        .get("logs")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let failed = event.get("err").map(|err| !err.is_null()).unwrap_or(false);

    Some(LogNotification {
        signature,
        slot,
        logs,
        failed,
    })
}

fn parse_transaction(result: &Value) -> Result<Option<TransactionInfo>, ChainError> {
    if result.is_null() {
        return Ok(None);
    }

    let slot = result
        .get("slot")
        .and_then(Value::as_u64)
        .ok_or_else(|| ChainError::ParseError("Missing slot field".to_string()))?;
    let block_time = result.get("blockTime").and_then(Value::as_i64);

    let static_keys = result
        .pointer("/transaction/message/accountKeys")
        .and_then(Value::as_array)
        .ok_or_else(|| ChainError::ParseError("Missing accountKeys".to_string()))?;

    // v0 transactions append lookup-table accounts after the static keys.
    let loaded = ["/meta/loadedAddresses/writable", "/meta/loadedAddresses/readonly"]
        .iter()
        .filter_map(|path| result.pointer(path).and_then(Value::as_array))
        .flatten();

    let mut account_keys = Vec::with_capacity(static_keys.len());
    for item in static_keys.iter().chain(loaded) {
        let key = item
            .as_str()
            .or_else(|| item.get("pubkey").and_then(Value::as_str))
            .ok_or_else(|| ChainError::ParseError("Invalid account key entry".to_string()))?;
        let address =
            Address::parse(key).map_err(|e| ChainError::ParseError(e.to_string()))?;
        account_keys.push(address);
    }

    Ok(Some(TransactionInfo {
        account_keys,
        block_time,
        slot,
    }))
}

fn parse_program_account(entry: &Value) -> Result<ProgramAccount, ChainError> {
    let pubkey = entry
        .get("pubkey")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::ParseError("Missing pubkey field".to_string()))?;
    let address = Address::parse(pubkey).map_err(|e| ChainError::ParseError(e.to_string()))?;

    let encoded = entry
        .pointer("/account/data/0")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::ParseError("Missing account data".to_string()))?;
    let data = BASE64
        .decode(encoded)
        .map_err(|e| ChainError::ParseError(format!("Invalid account data: {}", e)))?;

    Ok(ProgramAccount { address, data })
}
