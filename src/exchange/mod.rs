// ===============================
// src/exchange/mod.rs
// ===============================
//
// Satu trait untuk semua venue. Tambah exchange baru = tambah implementor
// baru lalu register di ExchangeRegistry, bukan branching di pipeline.
//
pub mod binance;
pub mod paper;

use std::sync::Arc;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use tracing::warn;

use crate::domain::{Balance, Credentials, TradeRequest, TradeResult};
use crate::error::ExecutionError;
use crate::metrics::SERVER_TIME_FALLBACKS;
use crate::signing::timestamp_ms;

/// What the pipeline needs from a venue.
///
/// `execute_trade` returns `Ok` with `success == false` when the exchange
/// answered and refused the order; `Err` is reserved for transport and
/// signing failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange clock in epoch milliseconds.
    async fn server_time(&self) -> Result<u64, ExecutionError>;

    async fn current_price(&self, symbol: &str) -> Result<String, ExecutionError>;

    async fn balances(&self, credentials: &Credentials) -> Result<Vec<Balance>, ExecutionError>;

    async fn execute_trade(
        &self,
        credentials: &Credentials,
        request: &TradeRequest,
    ) -> Result<TradeResult, ExecutionError>;
}

/// Exchange time if reachable, local clock otherwise. Never blocks longer
/// than the adapter's own request timeout.
pub async fn server_time_or_local(exchange: &dyn Exchange, venue: &str) -> u64 {
    match exchange.server_time().await {
        Ok(ts) => ts,
        Err(e) => {
            warn!(%venue, error = %e, "server time unavailable, falling back to local clock");
            SERVER_TIME_FALLBACKS.with_label_values(&[venue]).inc();
            timestamp_ms()
        }
    }
}

/// Adapters keyed by lowercase exchange name.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    adapters: HashMap<String, Arc<dyn Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, exchange: Arc<dyn Exchange>) {
        self.adapters.insert(name.trim().to_ascii_lowercase(), exchange);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Exchange>, ExecutionError> {
        self.adapters
            .get(&name.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ExecutionError::UnsupportedExchange(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
