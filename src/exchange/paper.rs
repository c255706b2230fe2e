// ===============================
// src/exchange/paper.rs (mock venue)
// ===============================
//
// Venue in-process: MARKET order langsung FILLED setelah delay opsional,
// saldo di-update di memori. Dipakai saat VENUE_MODE=mock dan di test.
//
use std::str::FromStr;
use std::sync::Mutex;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};
use tracing::info;

use super::Exchange;
use crate::domain::{Balance, Credentials, Side, TradeRequest, TradeResult};
use crate::error::ExecutionError;
use crate::metrics::EXECS;
use crate::pair;
use crate::signing::timestamp_ms;

const VENUE: &str = "paper";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperFill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: String,
}

#[derive(Default)]
struct PaperState {
    balances: HashMap<String, Decimal>,
    prices: HashMap<String, Decimal>,
    fills: Vec<PaperFill>,
    next_id: u64,
}

#[derive(Default)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
    fill_delay: Duration,
}

/// Parse `"USDT:1000,XRP:50"` style lists. Bad entries are skipped.
fn parse_pairs(list: &str) -> Vec<(String, Decimal)> {
    list.split(',')
        .filter_map(|item| {
            let (k, v) = item.split_once(':')?;
            let v = Decimal::from_str(v.trim()).ok()?;
            let k = k.trim().to_ascii_uppercase();
            (!k.is_empty()).then_some((k, v))
        })
        .collect()
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from env-style lists, e.g. balances `"USDT:1000"`, prices `"XRPUSDT:0.6"`.
    pub fn from_lists(balances: &str, prices: &str) -> Self {
        let ex = Self::new();
        {
            let mut st = ex.lock();
            st.balances.extend(parse_pairs(balances));
            st.prices.extend(parse_pairs(prices));
        }
        ex
    }

    pub fn with_balance(self, asset: &str, free: &str) -> Self {
        if let Ok(v) = Decimal::from_str(free) {
            self.lock().balances.insert(asset.to_ascii_uppercase(), v);
        }
        self
    }

    pub fn with_price(self, symbol: &str, price: &str) -> Self {
        if let Ok(v) = Decimal::from_str(price) {
            self.lock().prices.insert(symbol.to_ascii_uppercase(), v);
        }
        self
    }

    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    pub fn fills(&self) -> Vec<PaperFill> {
        self.lock().fills.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn server_time(&self) -> Result<u64, ExecutionError> {
        Ok(timestamp_ms())
    }

    async fn current_price(&self, symbol: &str) -> Result<String, ExecutionError> {
        self.lock()
            .prices
            .get(&symbol.to_ascii_uppercase())
            .map(|p| p.normalize().to_string())
            .ok_or_else(|| ExecutionError::ExchangeRejected(format!("unknown symbol {symbol}")))
    }

    async fn balances(&self, _credentials: &Credentials) -> Result<Vec<Balance>, ExecutionError> {
        let st = self.lock();
        let mut out: Vec<Balance> = st
            .balances
            .iter()
            .map(|(asset, free)| Balance {
                asset: asset.clone(),
                free: free.normalize().to_string(),
                locked: "0".to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(out)
    }

    async fn execute_trade(
        &self,
        _credentials: &Credentials,
        request: &TradeRequest,
    ) -> Result<TradeResult, ExecutionError> {
        if !self.fill_delay.is_zero() {
            sleep(self.fill_delay).await;
        }

        let symbol = request.symbol.to_ascii_uppercase();
        let assets = match pair::resolve(&symbol) {
            Ok(a) => a,
            Err(e) => return Ok(TradeResult::rejected(e.to_string())),
        };
        let amount = match Decimal::from_str(request.amount.trim()) {
            Ok(a) if a > Decimal::ZERO => a,
            _ => return Ok(TradeResult::rejected(format!("invalid amount {}", request.amount))),
        };

        let mut st = self.lock();
        let Some(price) = st.prices.get(&symbol).copied() else {
            return Ok(TradeResult::rejected(format!("unknown symbol {symbol}")));
        };
        // Buy: amount dalam quote; Sell: amount dalam base
        let (spend_asset, spend, recv_asset, recv) = match request.side {
            Side::Buy => (&assets.quote, amount, &assets.base, amount / price),
            Side::Sell => (&assets.base, amount, &assets.quote, amount * price),
        };
        let have = st.balances.get(spend_asset).copied().unwrap_or(Decimal::ZERO);
        if have < spend {
            EXECS.with_label_values(&["rejected", VENUE]).inc();
            return Ok(TradeResult::rejected(format!("insufficient {spend_asset} balance")));
        }
        st.balances.insert(spend_asset.clone(), have - spend);
        *st.balances.entry(recv_asset.clone()).or_insert(Decimal::ZERO) += recv;

        st.next_id += 1;
        let order_id = format!("PAPER-{}", st.next_id);
        st.fills.push(PaperFill {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side: request.side,
            amount: request.amount.clone(),
        });
        EXECS.with_label_values(&["filled", VENUE]).inc();
        info!(%order_id, %symbol, side = request.side.as_str(), amount = %request.amount, "paper fill");
        Ok(TradeResult::filled(order_id))
    }
}
