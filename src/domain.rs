// ===============================
// src/domain.rs
// ===============================
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }

impl Side {
    /// Case-insensitive parse of the webhook `action` field.
    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
    pub fn as_exchange_str(&self) -> &'static str { match self { Side::Buy => "BUY", Side::Sell => "SELL" } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// Raw webhook payload. Every field is untrusted; `action` stays a string
/// until the validator turns it into a [`Side`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: String,
    pub ticker: String,
    pub order_size: String,
    pub position_size: String,
    pub schema: String,
    pub timestamp: String,
    pub public_id: String,
}

/// API credentials. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), secret_key: secret_key.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Bot configuration as resolved by the persistence layer. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub id: String,
    #[serde(rename = "public_id", alias = "publicId")]
    pub public_id: String,
    pub trading_pair: String,
    pub user_id: String,
    pub exchange_name: String,
    pub credentials: Credentials,
    #[serde(default, rename = "allowedIPs", alias = "allowedIps")]
    pub allowed_ips: BTreeSet<String>,
    #[serde(default)]
    pub max_orders_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance { pub asset: String, pub free: String, pub locked: String }

impl Balance {
    pub fn new(asset: &str, free: &str, locked: &str) -> Self {
        Self { asset: asset.to_string(), free: free.to_string(), locked: locked.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning { pub code: String, pub message: String }

/// Result of converting an order size into something the exchange accepts.
/// All amounts are fixed-precision decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCalculation {
    pub quantity: String,
    pub base_amount: String,
    pub quote_amount: String,
    pub price: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    /// Quote amount for Buy, base quantity for Sell.
    pub amount: String,
    pub side: Side,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
    /// Amount as signed and sent, after any venue-side rounding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_amount: Option<String>,
}

impl TradeResult {
    pub fn filled(order_id: impl Into<String>) -> Self {
        Self { success: true, order_id: Some(order_id.into()), error: None, submitted_amount: None }
    }
    pub fn rejected(error: impl Into<String>) -> Self {
        Self { success: false, order_id: None, error: Some(error.into()), submitted_amount: None }
    }
    pub fn with_submitted(mut self, amount: Option<String>) -> Self {
        self.submitted_amount = amount;
        self
    }
}
