// ===============================
// src/pair.rs (ticker -> base/quote)
// ===============================
use crate::error::CalculationError;

/// Known quote assets, in match priority. USDT must stay ahead of the shorter
/// and more ambiguous suffixes (BTC, ETH).
pub const QUOTE_ASSETS: [&str; 7] = ["USDT", "USDC", "TUSD", "BUSD", "EUR", "BTC", "ETH"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPair {
    pub base: String,
    pub quote: String,
}

pub fn resolve(ticker: &str) -> Result<AssetPair, CalculationError> {
    let upper = ticker.trim().to_ascii_uppercase();
    for quote in QUOTE_ASSETS {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return Ok(AssetPair { base: base.to_string(), quote: quote.to_string() });
            }
        }
    }
    Err(CalculationError::InvalidTickerFormat(ticker.to_string()))
}
