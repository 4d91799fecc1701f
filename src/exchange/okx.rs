use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{
    Exchange, ExchangeError, ExchangePosition, MarginMode, OpenOrder, OrderAck, OrderRequest,
    PositionMode, SUCCESS_CODE,
};
use crate::models::{Candle, ContractSpec, PositionSide};

// OKX REST v5
// Docs: https://www.okx.com/docs-v5/en/
pub const OKX_API_BASE: &str = "https://www.okx.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
// Trade endpoints allow 60 requests / 2s per instrument; stay well under
const REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => panic!("rate must be non-zero"),
};

type HmacSha256 = Hmac<Sha256>;

type OkxRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key triple issued by OKX
#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

/// Signed REST client for OKX perpetual swaps
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    base_url: String,
    credentials: OkxCredentials,
    simulated: bool,
    rate_limiter: Arc<OkxRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentRaw {
    min_sz: String,
    lot_sz: String,
    ct_val: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountBalanceRaw {
    #[serde(default)]
    details: Vec<BalanceDetailRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetailRaw {
    ccy: String,
    #[serde(default)]
    avail_bal: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingBalanceRaw {
    ccy: String,
    #[serde(default)]
    avail_bal: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRaw {
    inst_id: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    pos: String,
    #[serde(default)]
    avg_px: String,
    #[serde(default)]
    upl: String,
    #[serde(default)]
    lever: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrderRaw {
    ord_id: String,
    inst_id: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    sz: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResultRaw {
    #[serde(default)]
    ord_id: Option<String>,
    #[serde(default)]
    s_code: Option<String>,
    #[serde(default)]
    s_msg: Option<String>,
}

// ============== Request Bodies ==============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    inst_id: &'a str,
    td_mode: &'a str,
    side: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_side: Option<&'a str>,
    ord_type: &'a str,
    sz: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reduce_only: bool,
    cl_ord_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    inst_id: &'a str,
    ord_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeverageBody<'a> {
    inst_id: &'a str,
    lever: String,
    mgn_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_side: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionModeBody<'a> {
    pos_mode: &'a str,
}

// ============== Helpers ==============

/// OKX numeric fields are strings and may be empty
fn parse_num(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(0.0)
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ExchangeError::Decode(format!("{} '{}': {}", field, raw, e)))
}

/// Map a timeframe like `5m`/`1h`/`1d` to the OKX bar name (`5m`/`1H`/`1D`)
pub fn okx_bar(timeframe: &str) -> String {
    let tf = timeframe.trim();
    match tf.chars().last() {
        Some('h') | Some('d') | Some('w') => tf.to_ascii_uppercase(),
        _ => tf.to_string(),
    }
}

fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Candle row: [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]
fn parse_candle_row(row: &[String]) -> Result<Option<Candle>, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Decode(format!(
            "candle row has {} fields",
            row.len()
        )));
    }

    // Still-forming candle
    if row.get(8).map(|c| c == "0").unwrap_or(false) {
        return Ok(None);
    }

    let ts_ms: i64 = row[0]
        .parse()
        .map_err(|e| ExchangeError::Decode(format!("candle ts '{}': {}", row[0], e)))?;
    let timestamp = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or_else(|| ExchangeError::Decode(format!("candle ts out of range: {}", ts_ms)))?;

    Ok(Some(Candle {
        timestamp,
        open: parse_num(&row[1]),
        high: parse_num(&row[2]),
        low: parse_num(&row[3]),
        close: parse_num(&row[4]),
        volume: parse_num(&row[5]),
    }))
}

fn ack_from_envelope(envelope: Envelope<WriteResultRaw>) -> OrderAck {
    let first = envelope.data.into_iter().next();

    let (s_code, s_msg, order_id) = match first {
        Some(raw) => (raw.s_code, raw.s_msg, raw.ord_id.filter(|id| !id.is_empty())),
        None => (None, None, None),
    };

    if envelope.code == SUCCESS_CODE {
        // Batch-style results carry their own per-item code
        let code = s_code.unwrap_or_else(|| SUCCESS_CODE.to_string());
        let msg = s_msg.unwrap_or(envelope.msg);
        return OrderAck { code, msg, order_id };
    }

    OrderAck {
        code: s_code
            .filter(|c| !c.is_empty() && c != SUCCESS_CODE)
            .unwrap_or(envelope.code),
        msg: s_msg.filter(|m| !m.is_empty()).unwrap_or(envelope.msg),
        order_id,
    }
}

// ============== Implementation ==============

impl OkxClient {
    pub fn new(credentials: OkxCredentials) -> Result<Self, ExchangeError> {
        Self::with_base_url(credentials, OKX_API_BASE)
    }

    /// Client against a custom host (demo cluster, test server)
    pub fn with_base_url(credentials: OkxCredentials, base_url: &str) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            simulated: false,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(REQUESTS_PER_SECOND))),
        })
    }

    /// Route every request to OKX demo trading
    pub fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    fn timestamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// `base64(HMAC-SHA256(secret, ts + METHOD + path + body))`
    fn sign(&self, timestamp: &str, method: &Method, request_path: &str, body: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Auth(format!("HMAC error: {e}")))?;

        mac.update(timestamp.as_bytes());
        mac.update(method.as_str().as_bytes());
        mac.update(request_path.as_bytes());
        mac.update(body.as_bytes());

        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn request(&self, method: Method, request_path: &str, body: String, signed: bool) -> Result<RequestBuilder, ExchangeError> {
        let url = format!("{}{}", self.base_url, request_path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");

        if signed {
            let timestamp = Self::timestamp();
            let signature = self.sign(&timestamp, &method, request_path, &body)?;
            request = request
                .header("OK-ACCESS-KEY", &self.credentials.api_key)
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", timestamp)
                .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase);
        }

        if self.simulated {
            request = request.header("x-simulated-trading", "1");
        }

        if !body.is_empty() {
            request = request.body(body);
        }

        Ok(request)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!("OKX response {}: {}", status, text);

        // Error envelopes still carry code/msg, even on 4xx
        match serde_json::from_str::<Envelope<T>>(&text) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(ExchangeError::Status {
                status: status.as_u16(),
                body: text,
            }),
            Err(e) => Err(ExchangeError::Decode(format!("{} (body: {})", e, text))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<Vec<T>, ExchangeError> {
        let query = build_query(params);
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query)
        };

        let request = self.request(Method::GET, &request_path, String::new(), signed)?;
        let envelope: Envelope<T> = self.send(request).await?;

        if envelope.code != SUCCESS_CODE {
            return Err(ExchangeError::Api {
                code: envelope.code,
                msg: envelope.msg,
            });
        }

        Ok(envelope.data)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<OrderAck, ExchangeError> {
        let body = serde_json::to_string(body)?;
        let request = self.request(Method::POST, path, body, true)?;
        let envelope: Envelope<WriteResultRaw> = self.send(request).await?;
        Ok(ack_from_envelope(envelope))
    }

    async fn trading_account_usdt(&self) -> Result<f64, ExchangeError> {
        let accounts: Vec<AccountBalanceRaw> = self
            .get("/api/v5/account/balance", &[("ccy", "USDT".to_string())], true)
            .await?;

        Ok(accounts
            .iter()
            .flat_map(|a| a.details.iter())
            .find(|d| d.ccy == "USDT")
            .map(|d| parse_num(&d.avail_bal))
            .unwrap_or(0.0))
    }

    async fn funding_account_usdt(&self) -> Result<f64, ExchangeError> {
        let balances: Vec<FundingBalanceRaw> = self
            .get("/api/v5/asset/balances", &[("ccy", "USDT".to_string())], true)
            .await?;

        Ok(balances
            .iter()
            .find(|b| b.ccy == "USDT")
            .map(|b| parse_num(&b.avail_bal))
            .unwrap_or(0.0))
    }
}

#[async_trait]
impl Exchange for OkxClient {
    async fn fetch_candles(&self, inst_id: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<String>> = self
            .get(
                "/api/v5/market/candles",
                &[
                    ("instId", inst_id.to_string()),
                    ("bar", okx_bar(timeframe)),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(candle) = parse_candle_row(row)? {
                candles.push(candle);
            }
        }

        // OKX returns newest first
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn fetch_contract_spec(&self, inst_id: &str) -> Result<ContractSpec, ExchangeError> {
        let instruments: Vec<InstrumentRaw> = self
            .get(
                "/api/v5/public/instruments",
                &[("instType", "SWAP".to_string()), ("instId", inst_id.to_string())],
                false,
            )
            .await?;

        let raw = instruments
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("instrument {} not listed", inst_id)))?;

        Ok(ContractSpec {
            min_size: parse_decimal(&raw.min_sz, "minSz")?,
            size_increment: parse_decimal(&raw.lot_sz, "lotSz")?,
            contract_value: parse_decimal(&raw.ct_val, "ctVal")?,
        })
    }

    async fn fetch_usdt_balance(&self) -> Result<f64, ExchangeError> {
        // Trading account first, funding account as the alternate
        match self.trading_account_usdt().await {
            Ok(balance) if balance > 0.0 => return Ok(balance),
            Ok(_) => tracing::debug!("Trading account shows no USDT, checking funding account"),
            Err(e) => tracing::warn!("Trading account balance query failed: {}", e),
        }

        self.funding_account_usdt().await
    }

    async fn fetch_positions(&self, inst_id: &str) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let rows: Vec<PositionRaw> = self
            .get(
                "/api/v5/account/positions",
                &[("instType", "SWAP".to_string()), ("instId", inst_id.to_string())],
                true,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|p| p.inst_id == inst_id)
            .map(|p| ExchangePosition {
                inst_id: p.inst_id,
                pos_side: p.pos_side,
                pos: parse_num(&p.pos),
                avg_px: parse_num(&p.avg_px),
                upl: parse_num(&p.upl),
                lever: p.lever.trim().parse().ok(),
                state: p.state.filter(|s| !s.is_empty()),
            })
            .collect())
    }

    async fn list_open_orders(&self, inst_id: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let rows: Vec<PendingOrderRaw> = self
            .get(
                "/api/v5/trade/orders-pending",
                &[("instType", "SWAP".to_string()), ("instId", inst_id.to_string())],
                true,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.ord_id,
                inst_id: o.inst_id,
                side: o.side,
                size: o.sz,
            })
            .collect())
    }

    async fn cancel_order(&self, inst_id: &str, order_id: &str) -> Result<OrderAck, ExchangeError> {
        self.post(
            "/api/v5/trade/cancel-order",
            &CancelBody {
                inst_id,
                ord_id: order_id,
            },
        )
        .await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let body = OrderBody {
            inst_id: &order.inst_id,
            td_mode: order.margin_mode.as_str(),
            side: order.side.as_str(),
            pos_side: order.pos_side.as_ref().map(PositionSide::as_str),
            ord_type: "market",
            sz: order.size.normalize().to_string(),
            reduce_only: order.reduce_only,
            cl_ord_id: &order.client_order_id,
        };

        self.post("/api/v5/trade/order", &body).await
    }

    async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        margin_mode: MarginMode,
        pos_side: Option<PositionSide>,
    ) -> Result<OrderAck, ExchangeError> {
        self.post(
            "/api/v5/account/set-leverage",
            &LeverageBody {
                inst_id,
                lever: leverage.to_string(),
                mgn_mode: margin_mode.as_str(),
                pos_side: pos_side.as_ref().map(PositionSide::as_str),
            },
        )
        .await
    }

    async fn set_position_mode(&self, mode: PositionMode) -> Result<OrderAck, ExchangeError> {
        self.post(
            "/api/v5/account/set-position-mode",
            &PositionModeBody {
                pos_mode: mode.as_str(),
            },
        )
        .await
    }
}
