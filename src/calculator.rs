// ===============================
// src/calculator.rs (order size -> quantity)
// ===============================
//
// Mengubah order_size ("50%" atau "15") menjadi quantity yang bisa dikirim ke
// exchange, berdasarkan saldo free dan harga terkini.
//
// - Sell: quantity dalam base asset, di-clamp ke saldo (warning AMOUNT_ADJUSTED).
// - Buy : quote amount dipotong 1% untuk fee, minimal 1 unit quote asset.
// - Semua nilai antara di-log (tracing) apapun hasilnya.
//
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use crate::domain::{Balance, OrderCalculation, Side, Warning};
use crate::error::CalculationError;
use crate::pair;

pub const BASE_DECIMALS: u32 = 8;
pub const QUOTE_DECIMALS: u32 = 4;
pub const AMOUNT_ADJUSTED: &str = "AMOUNT_ADJUSTED";

/// Fee headroom kept back on every buy.
fn fee_safety_factor() -> Decimal {
    Decimal::new(99, 2)
}

/// Smallest post-margin buy value, in quote units.
fn min_order_value() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSize {
    Percent(Decimal),
    Absolute(Decimal),
}

impl OrderSize {
    pub fn parse(raw: &str) -> Result<OrderSize, CalculationError> {
        let s = raw.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct = Decimal::from_str(pct.trim())
                .map_err(|_| CalculationError::InvalidPercentage(raw.to_string()))?;
            if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(CalculationError::InvalidPercentage(raw.to_string()));
            }
            return Ok(OrderSize::Percent(pct));
        }
        let amount =
            Decimal::from_str(s).map_err(|_| CalculationError::InvalidAmount(raw.to_string()))?;
        if amount <= Decimal::ZERO {
            return Err(CalculationError::InvalidAmount(raw.to_string()));
        }
        Ok(OrderSize::Absolute(amount))
    }
}

/// Truncate toward zero and pad to exactly `dp` decimals.
pub fn fixed(value: Decimal, dp: u32) -> String {
    let mut v = value.round_dp_with_strategy(dp, RoundingStrategy::ToZero);
    v.rescale(dp);
    v.to_string()
}

fn truncate(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Free balance of `asset`; a missing or unparseable entry counts as zero.
pub fn free_balance(balances: &[Balance], asset: &str) -> Decimal {
    balances
        .iter()
        .find(|b| b.asset.eq_ignore_ascii_case(asset))
        .map(|b| match Decimal::from_str(b.free.trim()) {
            Ok(v) if v > Decimal::ZERO => v,
            Ok(_) => Decimal::ZERO,
            Err(_) => {
                warn!(asset = %b.asset, free = %b.free, "unparseable balance, treated as zero");
                Decimal::ZERO
            }
        })
        .unwrap_or(Decimal::ZERO)
}

pub fn calculate(
    balances: &[Balance],
    order_size: &str,
    ticker: &str,
    price: &str,
    action: Side,
) -> Result<OrderCalculation, CalculationError> {
    let result = calculate_inner(balances, order_size, ticker, price, action);
    match &result {
        Ok(calc) => info!(
            %ticker,
            side = action.as_str(),
            %order_size,
            quantity = %calc.quantity,
            base_amount = %calc.base_amount,
            quote_amount = %calc.quote_amount,
            price = %calc.price,
            warnings = calc.warnings.len(),
            "order calculation done"
        ),
        Err(e) => warn!(%ticker, side = action.as_str(), %order_size, %price, error = %e, "order calculation failed"),
    }
    result
}

fn calculate_inner(
    balances: &[Balance],
    order_size: &str,
    ticker: &str,
    price: &str,
    action: Side,
) -> Result<OrderCalculation, CalculationError> {
    let assets = pair::resolve(ticker)?;
    debug!(base = %assets.base, quote = %assets.quote, "assets resolved");

    let px = Decimal::from_str(price.trim())
        .ok()
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| CalculationError::InvalidPrice(price.to_string()))?;

    let side_asset = match action {
        Side::Sell => assets.base.as_str(),
        Side::Buy => assets.quote.as_str(),
    };
    let available = free_balance(balances, side_asset);
    debug!(asset = side_asset, %available, "available balance");

    let size = OrderSize::parse(order_size)?;
    let mut warnings = Vec::new();
    let requested = match size {
        OrderSize::Percent(pct) => available
            .checked_mul(pct)
            .map(|v| v / Decimal::ONE_HUNDRED)
            .ok_or_else(|| CalculationError::InvalidPercentage(order_size.to_string()))?,
        OrderSize::Absolute(amount) if amount > available => {
            let available = available.normalize();
            warnings.push(Warning {
                code: AMOUNT_ADJUSTED.to_string(),
                message: format!(
                    "requested {} {side_asset} exceeds available balance, adjusted to {available} {side_asset}",
                    amount.normalize()
                ),
            });
            available
        }
        OrderSize::Absolute(amount) => amount,
    };
    debug!(?size, %requested, adjusted = !warnings.is_empty(), "requested amount");

    match action {
        Side::Sell => {
            let quantity = truncate(requested, BASE_DECIMALS);
            if quantity <= Decimal::ZERO {
                return Err(CalculationError::InvalidQuantity(quantity.to_string()));
            }
            let quote_amount = quantity
                .checked_mul(px)
                .ok_or_else(|| CalculationError::InvalidAmount(order_size.to_string()))?;
            debug!(%quantity, %quote_amount, "sell path");
            Ok(OrderCalculation {
                quantity: fixed(quantity, BASE_DECIMALS),
                base_amount: fixed(quantity, BASE_DECIMALS),
                quote_amount: fixed(quote_amount, QUOTE_DECIMALS),
                price: px.normalize().to_string(),
                base_asset: assets.base,
                quote_asset: assets.quote,
                warnings,
            })
        }
        Side::Buy => {
            let adjusted = truncate(requested * fee_safety_factor(), QUOTE_DECIMALS);
            debug!(%requested, %adjusted, "buy path, fee margin applied");
            if adjusted < min_order_value() {
                return Err(CalculationError::MinOrderValueNotMet {
                    amount: fixed(adjusted, QUOTE_DECIMALS),
                    minimum: min_order_value().to_string(),
                    asset: assets.quote,
                });
            }
            let quantity = adjusted
                .checked_div(px)
                .map(|q| truncate(q, BASE_DECIMALS))
                .ok_or_else(|| CalculationError::InvalidPrice(price.to_string()))?;
            if quantity <= Decimal::ZERO {
                return Err(CalculationError::InvalidQuantity(quantity.to_string()));
            }
            debug!(%quantity, "buy quantity");
            Ok(OrderCalculation {
                quantity: fixed(quantity, BASE_DECIMALS),
                base_amount: fixed(quantity, BASE_DECIMALS),
                quote_amount: fixed(adjusted, QUOTE_DECIMALS),
                price: px.normalize().to_string(),
                base_asset: assets.base,
                quote_asset: assets.quote,
                warnings,
            })
        }
    }
}
