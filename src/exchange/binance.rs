// ===============================
// src/exchange/binance.rs
// ===============================
//
// Binance Spot REST adapter.
// - MARKET order saja: Buy pakai quoteOrderQty, Sell pakai quantity.
// - Params di-sort per key, di-sign HMAC-SHA256, API key lewat header.
// - Tidak ada retry otomatis: response yang hilang bisa berarti order sudah masuk.
//
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{error, info};

use super::{server_time_or_local, Exchange};
use crate::domain::{Balance, Credentials, Side, TradeRequest, TradeResult};
use crate::error::ExecutionError;
use crate::metrics::EXECS;
use crate::signing::{signed_query, timestamp_ms};

const VENUE: &str = "binance";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";
/// Binance: "Signature for this request is not valid."
const INVALID_SIGNATURE_CODE: i64 = -1022;

/// Decimals allowed for sell quantities on symbols not in the table.
pub const DEFAULT_QTY_PRECISION: u32 = 8;

/// LOT_SIZE step per symbol, as number of decimals.
pub fn quantity_precision(symbol: &str) -> u32 {
    match symbol.to_ascii_uppercase().as_str() {
        "BTCUSDT" | "BTCUSDC" | "BTCEUR" => 5,
        "ETHUSDT" | "ETHUSDC" | "ETHEUR" | "ETHBTC" => 4,
        "BNBUSDT" | "SOLUSDT" | "LTCUSDT" => 3,
        "DOTUSDT" | "LINKUSDT" | "AVAXUSDT" => 2,
        "XRPUSDT" | "ADAUSDT" | "TRXUSDT" | "MATICUSDT" => 1,
        "DOGEUSDT" | "SHIBUSDT" => 0,
        _ => DEFAULT_QTY_PRECISION,
    }
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    #[serde(rename = "serverTime")]
    server_time: u64,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<Balance>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Build MARKET order params (unsigned, unsorted).
pub fn build_order_params(
    request: &TradeRequest,
    client_order_id: &str,
    recv_window: u64,
    timestamp: u64,
) -> Result<Vec<(&'static str, String)>, ExecutionError> {
    let symbol = request.symbol.to_ascii_uppercase();
    let amount = Decimal::from_str(request.amount.trim()).map_err(|_| {
        ExecutionError::ExchangeRejected(format!("invalid order amount {:?}", request.amount))
    })?;

    let mut params = vec![
        ("symbol", symbol.clone()),
        ("side", request.side.as_exchange_str().to_string()),
        ("type", "MARKET".to_string()),
        ("newClientOrderId", client_order_id.to_string()),
        ("recvWindow", recv_window.to_string()),
        ("timestamp", timestamp.to_string()),
    ];

    match request.side {
        Side::Buy => params.push(("quoteOrderQty", amount.normalize().to_string())),
        Side::Sell => {
            let precision = quantity_precision(&symbol);
            let qty = amount
                .round_dp_with_strategy(precision, RoundingStrategy::ToZero)
                .normalize();
            if qty <= Decimal::ZERO {
                return Err(ExecutionError::QuantityBelowPrecision {
                    symbol,
                    quantity: request.amount.clone(),
                    precision,
                });
            }
            params.push(("quantity", qty.to_string()));
        }
    }
    Ok(params)
}

/// Error text from a non-success response: the exchange's own `msg` when
/// present, the raw body otherwise.
fn classify_error(status: StatusCode, body: &str) -> Result<String, ExecutionError> {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(api) if api.code == INVALID_SIGNATURE_CODE => Err(ExecutionError::SignatureError(api.msg)),
        Ok(api) => Ok(format!("{} (code {})", api.msg, api.code)),
        Err(_) if body.trim().is_empty() => Ok(format!("HTTP {status}")),
        Err(_) => Ok(format!("HTTP {status}: {}", body.trim())),
    }
}

/// The amount field actually placed in the signed query.
fn submitted_amount(params: &[(&'static str, String)]) -> Option<String> {
    params
        .iter()
        .find(|(k, _)| matches!(*k, "quoteOrderQty" | "quantity"))
        .map(|(_, v)| v.clone())
}

/// Body of a 2xx order response. The order may already be on the book, so a
/// failed read is reported as unknown status and not as a rejection.
fn order_body<E: std::fmt::Display>(read: Result<String, E>, cl_id: &str) -> Result<String, ExecutionError> {
    read.map_err(|e| {
        error!(error = %e, cl_id = %cl_id, "order response body unreadable");
        EXECS.with_label_values(&["unknown", VENUE]).inc();
        ExecutionError::ExchangeUnreachable(format!("order status unknown: {e} (clientOrderId {cl_id})"))
    })
}

fn unreachable(e: reqwest::Error) -> ExecutionError {
    ExecutionError::ExchangeUnreachable(e.to_string())
}

#[derive(Clone)]
pub struct BinanceSpot {
    http: reqwest::Client,
    rest_base: String,
    recv_window: u64,
}

impl BinanceSpot {
    pub fn new(rest_base: &str, recv_window: u64, timeout: Duration) -> Result<Self, ExecutionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(unreachable)?;
        Ok(Self::with_client(http, rest_base, recv_window))
    }

    pub fn with_client(http: reqwest::Client, rest_base: &str, recv_window: u64) -> Self {
        Self { http, rest_base: rest_base.trim_end_matches('/').to_string(), recv_window }
    }

    fn client_order_id(ts: u64) -> String {
        format!("SB-{}-{}", ts, rand::thread_rng().gen::<u32>())
    }
}

#[async_trait]
impl Exchange for BinanceSpot {
    async fn server_time(&self) -> Result<u64, ExecutionError> {
        let url = format!("{}/api/v3/time", self.rest_base);
        let rsp = self.http.get(url).send().await.map_err(unreachable)?;
        if !rsp.status().is_success() {
            return Err(ExecutionError::ExchangeUnreachable(format!("time endpoint HTTP {}", rsp.status())));
        }
        let t = rsp.json::<ServerTime>().await.map_err(unreachable)?;
        Ok(t.server_time)
    }

    async fn current_price(&self, symbol: &str) -> Result<String, ExecutionError> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.rest_base,
            urlencoding::encode(&symbol.to_ascii_uppercase())
        );
        let rsp = self.http.get(url).send().await.map_err(unreachable)?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(ExecutionError::ExchangeRejected(classify_error(status, &body)?));
        }
        let t = rsp.json::<TickerPrice>().await.map_err(unreachable)?;
        Ok(t.price)
    }

    async fn balances(&self, credentials: &Credentials) -> Result<Vec<Balance>, ExecutionError> {
        let ts = server_time_or_local(self, VENUE).await;
        let params = [("recvWindow", self.recv_window.to_string()), ("timestamp", ts.to_string())];
        let query = signed_query(&credentials.secret_key, &params)?;
        let url = format!("{}/api/v3/account?{}", self.rest_base, query);

        let rsp = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &credentials.api_key)
            .send()
            .await
            .map_err(unreachable)?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            error!(%status, %body, "account request failed");
            return Err(ExecutionError::ExchangeRejected(classify_error(status, &body)?));
        }
        let account = rsp.json::<AccountInfo>().await.map_err(unreachable)?;
        Ok(account.balances)
    }

    async fn execute_trade(
        &self,
        credentials: &Credentials,
        request: &TradeRequest,
    ) -> Result<TradeResult, ExecutionError> {
        let ts = request.timestamp.unwrap_or_else(timestamp_ms);
        let cl_id = Self::client_order_id(ts);
        let params = build_order_params(request, &cl_id, self.recv_window, ts)?;
        let submitted = submitted_amount(&params);
        let query = signed_query(&credentials.secret_key, &params)?;
        let url = format!("{}/api/v3/order?{}", self.rest_base, query);

        let rsp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &credentials.api_key)
            .send()
            .await
            .map_err(|e| {
                EXECS.with_label_values(&["unreachable", VENUE]).inc();
                unreachable(e)
            })?;

        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            error!(%status, %body, cl_id = %cl_id, "order send failed");
            EXECS.with_label_values(&["rejected", VENUE]).inc();
            return Ok(TradeResult::rejected(classify_error(status, &body)?));
        }
        let body = order_body(rsp.text().await, &cl_id)?;

        let v: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let order_id = match v.get("orderId") {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        match order_id {
            Some(id) => {
                info!(order_id = %id, cl_id = %cl_id, symbol = %request.symbol, side = request.side.as_str(), "order sent OK");
                EXECS.with_label_values(&["filled", VENUE]).inc();
                Ok(TradeResult::filled(id).with_submitted(submitted))
            }
            None => {
                error!(%body, cl_id = %cl_id, "order response without orderId");
                EXECS.with_label_values(&["rejected", VENUE]).inc();
                Ok(TradeResult::rejected(format!("response without orderId: {}", body.trim())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds() -> Credentials {
        Credentials::new("test-key", "test-secret")
    }

    fn buy(amount: &str) -> TradeRequest {
        TradeRequest { symbol: "XRPUSDT".into(), amount: amount.into(), side: Side::Buy, timestamp: Some(1000) }
    }

    fn sell(symbol: &str, amount: &str) -> TradeRequest {
        TradeRequest { symbol: symbol.into(), amount: amount.into(), side: Side::Sell, timestamp: Some(1000) }
    }

    fn adapter(url: &str) -> BinanceSpot {
        BinanceSpot::new(url, 5000, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn buy_uses_quote_order_qty() {
        let params = build_order_params(&buy("49.5000"), "cl", 5000, 1000).unwrap();
        assert!(params.contains(&("quoteOrderQty", "49.5".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "quantity"));
    }

    #[test]
    fn sell_quantity_is_floored_to_symbol_precision() {
        let params = build_order_params(&sell("XRPUSDT", "10.96"), "cl", 5000, 1000).unwrap();
        assert!(params.contains(&("quantity", "10.9".to_string())));
        let params = build_order_params(&sell("BTCUSDT", "0.123456789"), "cl", 5000, 1000).unwrap();
        assert!(params.contains(&("quantity", "0.12345".to_string())));
        let params = build_order_params(&sell("FOOUSDT", "1.123456789"), "cl", 5000, 1000).unwrap();
        assert!(params.contains(&("quantity", "1.12345678".to_string())));
    }

    #[test]
    fn submitted_amount_is_the_signed_value() {
        let params = build_order_params(&sell("XRPUSDT", "10.96000000"), "cl", 5000, 1000).unwrap();
        assert_eq!(submitted_amount(&params).as_deref(), Some("10.9"));
        let params = build_order_params(&buy("49.5000"), "cl", 5000, 1000).unwrap();
        assert_eq!(submitted_amount(&params).as_deref(), Some("49.5"));
    }

    #[test]
    fn unreadable_order_body_is_unknown_status() {
        let err = order_body(Err::<String, _>("connection reset by peer"), "SB-1-2").unwrap_err();
        match err {
            ExecutionError::ExchangeUnreachable(msg) => {
                assert!(msg.starts_with("order status unknown"));
                assert!(msg.contains("SB-1-2"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(order_body(Ok::<_, String>("{}".into()), "cl").unwrap(), "{}");
    }

    #[tokio::test]
    async fn sell_audits_rounded_quantity() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex(r"^/api/v3/order".into()))
            .match_query(Matcher::UrlEncoded("quantity".into(), "10.9".into()))
            .with_status(200)
            .with_body(r#"{"orderId":"77"}"#)
            .create_async()
            .await;

        let res = adapter(&server.url()).execute_trade(&creds(), &sell("XRPUSDT", "10.96000000")).await.unwrap();
        assert_eq!(res.order_id.as_deref(), Some("77"));
        assert_eq!(res.submitted_amount.as_deref(), Some("10.9"));
    }

    #[test]
    fn sell_that_rounds_to_zero_is_refused() {
        let err = build_order_params(&sell("DOGEUSDT", "0.9"), "cl", 5000, 1000).unwrap_err();
        assert!(matches!(err, ExecutionError::QuantityBelowPrecision { precision: 0, .. }));
    }

    #[test]
    fn error_body_is_classified() {
        let msg = classify_error(StatusCode::BAD_REQUEST, r#"{"code":-2010,"msg":"Account has insufficient balance"}"#).unwrap();
        assert_eq!(msg, "Account has insufficient balance (code -2010)");
        let err = classify_error(StatusCode::BAD_REQUEST, r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#).unwrap_err();
        assert!(matches!(err, ExecutionError::SignatureError(_)));
        let msg = classify_error(StatusCode::BAD_GATEWAY, "").unwrap();
        assert_eq!(msg, "HTTP 502 Bad Gateway");
    }

    #[tokio::test]
    async fn order_success_returns_order_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", Matcher::Regex(r"^/api/v3/order".into()))
            .match_header("X-MBX-APIKEY", "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "XRPUSDT".into()),
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("quoteOrderQty".into(), "49.5".into()),
                Matcher::UrlEncoded("timestamp".into(), "1000".into()),
                Matcher::Regex("signature=[0-9a-f]{64}$".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"symbol":"XRPUSDT","orderId":28,"status":"FILLED"}"#)
            .create_async()
            .await;

        let res = adapter(&server.url()).execute_trade(&creds(), &buy("49.5000")).await.unwrap();
        assert_eq!(res, TradeResult::filled("28").with_submitted(Some("49.5".into())));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn api_key_never_in_query() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", Matcher::Regex(r"^/api/v3/order".into()))
            .match_query(Matcher::Regex("test-key".into()))
            .with_status(200)
            .with_body(r#"{"orderId":1}"#)
            .expect(0)
            .create_async()
            .await;
        let fallback = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"orderId":1}"#)
            .create_async()
            .await;

        adapter(&server.url()).execute_trade(&creds(), &buy("10")).await.unwrap();
        m.assert_async().await;
        fallback.assert_async().await;
    }

    #[tokio::test]
    async fn rejection_surfaces_exchange_message() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
            .create_async()
            .await;

        let res = adapter(&server.url()).execute_trade(&creds(), &buy("10")).await.unwrap();
        assert!(!res.success);
        assert!(res.error.unwrap().contains("insufficient balance"));
    }

    #[tokio::test]
    async fn bad_signature_is_a_signature_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1022,"msg":"Signature for this request is not valid."}"#)
            .create_async()
            .await;

        let err = adapter(&server.url()).execute_trade(&creds(), &buy("10")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::SignatureError(_)));
    }

    #[tokio::test]
    async fn unreachable_exchange() {
        // port 9 (discard) di localhost: koneksi ditolak
        let err = adapter("http://127.0.0.1:9").execute_trade(&creds(), &buy("10")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ExchangeUnreachable(_)));
    }

    #[tokio::test]
    async fn price_and_server_time() {
        let mut server = mockito::Server::new_async().await;
        let _p = server
            .mock("GET", Matcher::Regex(r"^/api/v3/ticker/price".into()))
            .match_query(Matcher::UrlEncoded("symbol".into(), "XRPUSDT".into()))
            .with_body(r#"{"symbol":"XRPUSDT","price":"0.60000000"}"#)
            .create_async()
            .await;
        let _t = server
            .mock("GET", "/api/v3/time")
            .with_body(r#"{"serverTime":1499827319559}"#)
            .create_async()
            .await;

        let ex = adapter(&server.url());
        assert_eq!(ex.current_price("xrpusdt").await.unwrap(), "0.60000000");
        assert_eq!(ex.server_time().await.unwrap(), 1_499_827_319_559);
    }

    #[tokio::test]
    async fn balances_are_signed_with_server_time() {
        let mut server = mockito::Server::new_async().await;
        let _t = server
            .mock("GET", "/api/v3/time")
            .with_body(r#"{"serverTime":1499827319559}"#)
            .create_async()
            .await;
        let m = server
            .mock("GET", Matcher::Regex(r"^/api/v3/account".into()))
            .match_header("X-MBX-APIKEY", "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("timestamp".into(), "1499827319559".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_body(r#"{"canTrade":true,"balances":[{"asset":"USDT","free":"100.00000000","locked":"0.00000000"}]}"#)
            .create_async()
            .await;

        let balances = adapter(&server.url()).balances(&creds()).await.unwrap();
        assert_eq!(balances, vec![Balance::new("USDT", "100.00000000", "0.00000000")]);
        m.assert_async().await;
    }
}
