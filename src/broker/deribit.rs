use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    AccountSummary, BrokerClient, BrokerOrder, BrokerPosition, InstrumentInfo, OrderRequest,
    OrderResult, OrderType, Ticker,
};
use crate::types::{Candle, Environment};

const DERIBIT_LIVE: &str = "https://www.deribit.com/api/v2";
const DERIBIT_TESTNET: &str = "https://test.deribit.com/api/v2";

/// Flat per-second quota for REST calls; Deribit's credit scheme allows
/// bursts, but pacing keeps one user's strategies from starving another's.
const REQUESTS_PER_SECOND: u32 = 10;
const MAX_ATTEMPTS: u32 = 3;
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Deribit JSON-RPC v2 client over HTTPS using the `client_signature`
/// authentication grant.
pub struct DeribitClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
    connected: AtomicBool,
    nonce_counter: AtomicU64,
    limiter: DefaultDirectRateLimiter,
}

impl DeribitClient {
    pub fn new(client_id: String, client_secret: String, environment: Environment) -> Self {
        let base_url = match environment {
            Environment::Live => DERIBIT_LIVE.to_string(),
            Environment::Testnet => DERIBIT_TESTNET.to_string(),
        };

        Self {
            http: Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url,
            client_id,
            client_secret,
            token: Mutex::new(None),
            connected: AtomicBool::new(false),
            nonce_counter: AtomicU64::new(1),
            limiter: RateLimiter::direct(Quota::per_second(
                NonZeroU32::new(REQUESTS_PER_SECOND).unwrap(),
            )),
        }
    }

    /// Authenticates eagerly so callers learn about bad credentials at
    /// connect time instead of on the first private call.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_token().await?;
        Ok(())
    }

    fn sign(&self, timestamp: i64, nonce: &str, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.client_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{}\n{}\n{}", timestamp, nonce, data).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn ensure_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at - Utc::now() > ChronoDuration::seconds(60) {
                return Ok(token.token.clone());
            }
        }

        let timestamp = Utc::now().timestamp_millis();
        let nonce = format!("n{}", self.nonce_counter.fetch_add(1, Ordering::Relaxed));
        let signature = self.sign(timestamp, &nonce, "");

        let params = vec![
            ("grant_type", "client_signature".to_string()),
            ("client_id", self.client_id.clone()),
            ("timestamp", timestamp.to_string()),
            ("nonce", nonce),
            ("data", String::new()),
            ("signature", signature),
        ];

        let result = self.raw_call("public/auth", &params, None).await?;
        let access_token = result["access_token"]
            .as_str()
            .context("auth response missing access_token")?
            .to_string();
        let expires_in = result["expires_in"].as_i64().unwrap_or(900);

        let token = AccessToken {
            token: access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        };
        *guard = Some(token);
        self.connected.store(true, Ordering::Release);
        debug!("deribit auth refreshed, expires in {}s", expires_in);
        Ok(access_token)
    }

    /// One JSON-RPC call with the per-client quota applied and transport
    /// errors retried with short backoff. RPC-level errors are not retried;
    /// the caller decides what a rejection means.
    async fn call(&self, method: &str, params: &[(&str, String)], private: bool) -> Result<Value> {
        self.limiter.until_ready().await;

        let bearer = if private {
            Some(self.ensure_token().await?)
        } else {
            None
        };

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.raw_call(method, params, bearer.as_deref()).await {
                Ok(value) => {
                    self.connected.store(true, Ordering::Release);
                    return Ok(value);
                }
                Err(err) => {
                    if !is_transient(&err) {
                        return Err(err);
                    }
                    warn!(
                        "deribit {} transient failure (attempt {}/{}): {}",
                        method, attempt, MAX_ATTEMPTS, err
                    );
                    last_err = Some(err);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        Err(last_err.unwrap_or_else(|| anyhow!("deribit {} failed", method)))
    }

    async fn raw_call(
        &self,
        method: &str,
        params: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let mut request = self.http.get(&url).query(params);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("transport: {}", e))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("transport: invalid json: {}", e))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let code = error["code"].as_i64().unwrap_or(0);
            let message = error["message"].as_str().unwrap_or("unknown");
            return Err(anyhow!("deribit rpc error {}: {}", code, message));
        }

        Ok(body["result"].clone())
    }

    fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("instrument_name", request.instrument.clone()),
            ("amount", request.amount.to_string()),
            ("type", request.order_type.as_str().to_string()),
            ("label", request.label.clone()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
        }
        if let Some(trigger) = request.trigger_price {
            params.push(("trigger_price", trigger.to_string()));
            params.push(("trigger", "last_price".to_string()));
        }
        if request.reduce_only {
            params.push(("reduce_only", "true".to_string()));
        }
        params
    }

    fn parse_order_result(result: &Value) -> Result<OrderResult> {
        let order_id = result["order"]["order_id"]
            .as_str()
            .context("order response missing order_id")?
            .to_string();
        Ok(OrderResult { order_id })
    }
}

#[async_trait]
impl BrokerClient for DeribitClient {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn get_ticker(&self, instrument: &str) -> Result<Ticker> {
        let params = vec![("instrument_name", instrument.to_string())];
        let result = self.call("public/ticker", &params, false).await?;
        Ok(Ticker {
            instrument: instrument.to_string(),
            last_price: decimal_field(&result, "last_price")?,
            mark_price: decimal_field(&result, "mark_price")?,
            bid: decimal_field(&result, "best_bid_price")?,
            ask: decimal_field(&result, "best_ask_price")?,
            timestamp: Utc::now(),
        })
    }

    async fn get_candles(
        &self,
        instrument: &str,
        resolution_minutes: u32,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let end = Utc::now().timestamp_millis();
        let span = i64::from(resolution_minutes) * 60_000 * count as i64;
        let params = vec![
            ("instrument_name", instrument.to_string()),
            ("resolution", resolution_minutes.to_string()),
            ("start_timestamp", (end - span).to_string()),
            ("end_timestamp", end.to_string()),
        ];
        let result = self
            .call("public/get_tradingview_chart_data", &params, false)
            .await?;

        if result["status"].as_str() == Some("no_data") {
            return Ok(Vec::new());
        }

        let ticks = array_field(&result, "ticks")?;
        let opens = array_field(&result, "open")?;
        let highs = array_field(&result, "high")?;
        let lows = array_field(&result, "low")?;
        let closes = array_field(&result, "close")?;
        let volumes = array_field(&result, "volume")?;

        let mut candles = Vec::with_capacity(ticks.len());
        for i in 0..ticks.len() {
            candles.push(Candle {
                timestamp: ticks[i].as_i64().context("non-integer candle tick")?,
                open: decimal_value(&opens[i])?,
                high: decimal_value(&highs[i])?,
                low: decimal_value(&lows[i])?,
                close: decimal_value(&closes[i])?,
                volume: decimal_value(&volumes[i]).unwrap_or(Decimal::ZERO),
            });
        }
        Ok(candles)
    }

    async fn get_instrument(&self, instrument: &str) -> Result<InstrumentInfo> {
        let params = vec![("instrument_name", instrument.to_string())];
        let result = self.call("public/get_instrument", &params, false).await?;
        Ok(InstrumentInfo {
            instrument: instrument.to_string(),
            tick_size: decimal_field(&result, "tick_size")?,
            min_trade_amount: decimal_field(&result, "min_trade_amount")?,
            max_leverage: decimal_field(&result, "max_leverage").unwrap_or(Decimal::from(50)),
            contract_size: decimal_field(&result, "contract_size").unwrap_or(Decimal::ONE),
        })
    }

    async fn get_positions(&self, currency: &str) -> Result<Vec<BrokerPosition>> {
        let params = vec![
            ("currency", currency.to_string()),
            ("kind", "future".to_string()),
        ];
        let result = self.call("private/get_positions", &params, true).await?;
        let rows = result.as_array().context("positions: expected array")?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            positions.push(BrokerPosition {
                instrument: row["instrument_name"]
                    .as_str()
                    .context("position missing instrument_name")?
                    .to_string(),
                size: decimal_field(row, "size")?,
                average_price: decimal_field(row, "average_price").unwrap_or(Decimal::ZERO),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, instrument: &str) -> Result<Vec<BrokerOrder>> {
        let params = vec![("instrument_name", instrument.to_string())];
        let result = self
            .call("private/get_open_orders_by_instrument", &params, true)
            .await?;
        let rows = result.as_array().context("open orders: expected array")?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_type = match row["order_type"].as_str() {
                Some("limit") => OrderType::Limit,
                Some("stop_market") => OrderType::StopMarket,
                _ => OrderType::Market,
            };
            orders.push(BrokerOrder {
                order_id: row["order_id"]
                    .as_str()
                    .context("order missing order_id")?
                    .to_string(),
                order_type,
                amount: decimal_field(row, "amount").unwrap_or(Decimal::ZERO),
                // Stop orders report price as the string "market_price".
                price: decimal_field(row, "price").ok(),
                trigger_price: decimal_field(row, "trigger_price").ok(),
                reduce_only: row["reduce_only"].as_bool().unwrap_or(false),
                label: row["label"].as_str().map(str::to_string),
            });
        }
        Ok(orders)
    }

    async fn place_buy_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        let params = Self::order_params(request);
        let result = self.call("private/buy", &params, true).await?;
        Self::parse_order_result(&result)
    }

    async fn place_sell_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        let params = Self::order_params(request);
        let result = self.call("private/sell", &params, true).await?;
        Self::parse_order_result(&result)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let params = vec![("order_id", order_id.to_string())];
        self.call("private/cancel", &params, true).await?;
        Ok(())
    }

    async fn get_account_summary(&self, currency: &str) -> Result<AccountSummary> {
        let params = vec![("currency", currency.to_string())];
        let result = self.call("private/get_account_summary", &params, true).await?;
        Ok(AccountSummary {
            currency: currency.to_string(),
            equity: decimal_field(&result, "equity")?,
            available_funds: decimal_field(&result, "available_funds")?,
        })
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.to_string().starts_with("transport:")
}

fn decimal_field(value: &Value, field: &str) -> Result<Decimal> {
    decimal_value(&value[field]).with_context(|| format!("field {}", field))
}

fn decimal_value(value: &Value) -> Result<Decimal> {
    let number = value
        .as_f64()
        .with_context(|| format!("expected number, got {}", value))?;
    Decimal::try_from(number).map_err(|e| anyhow!("decimal conversion: {}", e))
}

fn array_field<'a>(value: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
    value[field]
        .as_array()
        .with_context(|| format!("missing array field {}", field))
}
