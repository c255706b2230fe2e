// ===============================
// src/executor.rs
// ===============================
use tracing::{error, info};

use crate::domain::{BotConfig, OrderCalculation, Side, TradeRequest, TradeResult};
use crate::error::ExecutionError;
use crate::exchange::{server_time_or_local, Exchange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedOrder {
    pub order_id: String,
    /// What the venue actually received; `request.amount` when it did not round.
    pub submitted_amount: String,
    pub request: TradeRequest,
    pub result: TradeResult,
}

/// Amount sent to the exchange: the fee-adjusted quote amount for a buy,
/// the base quantity for a sell.
pub fn trade_request(symbol: &str, side: Side, calc: &OrderCalculation, timestamp: u64) -> TradeRequest {
    let amount = match side {
        Side::Buy => calc.quote_amount.clone(),
        Side::Sell => calc.quantity.clone(),
    };
    TradeRequest { symbol: symbol.to_ascii_uppercase(), amount, side, timestamp: Some(timestamp) }
}

/// Submit one order. A refusal from the exchange becomes `ExchangeRejected`
/// with the exchange's own message. Nothing here retries.
pub async fn execute(
    exchange: &dyn Exchange,
    bot: &BotConfig,
    symbol: &str,
    side: Side,
    calc: &OrderCalculation,
) -> Result<ExecutedOrder, ExecutionError> {
    let ts = server_time_or_local(exchange, &bot.exchange_name).await;
    let request = trade_request(symbol, side, calc, ts);
    info!(
        bot_id = %bot.id,
        exchange = %bot.exchange_name,
        symbol = %request.symbol,
        side = side.as_str(),
        amount = %request.amount,
        timestamp = ts,
        "submitting order"
    );

    let result = exchange.execute_trade(&bot.credentials, &request).await?;
    match (&result.success, &result.order_id) {
        (true, Some(id)) => {
            let submitted_amount = result.submitted_amount.clone().unwrap_or_else(|| request.amount.clone());
            Ok(ExecutedOrder { order_id: id.clone(), submitted_amount, request, result })
        }
        (true, None) => {
            error!(bot_id = %bot.id, "exchange reported success without an order id");
            Err(ExecutionError::ExchangeRejected("exchange reported success without an order id".into()))
        }
        (false, _) => {
            let msg = result.error.unwrap_or_else(|| "order rejected without message".to_string());
            error!(bot_id = %bot.id, error = %msg, "order rejected");
            Err(ExecutionError::ExchangeRejected(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Credentials;
    use crate::exchange::MockExchange;
    use mockall::predicate::always;

    fn bot() -> BotConfig {
        BotConfig {
            id: "bot-1".into(),
            public_id: "pub".into(),
            trading_pair: "XRPUSDT".into(),
            user_id: "u".into(),
            exchange_name: "binance".into(),
            credentials: Credentials::new("k", "s"),
            allowed_ips: Default::default(),
            max_orders_per_minute: 0,
        }
    }

    fn calc() -> OrderCalculation {
        OrderCalculation {
            quantity: "82.50000000".into(),
            base_amount: "82.50000000".into(),
            quote_amount: "49.5000".into(),
            price: "0.6".into(),
            base_asset: "XRP".into(),
            quote_asset: "USDT".into(),
            warnings: vec![],
        }
    }

    #[test]
    fn buy_sends_quote_sell_sends_quantity() {
        assert_eq!(trade_request("xrpusdt", Side::Buy, &calc(), 1).amount, "49.5000");
        let sell = trade_request("xrpusdt", Side::Sell, &calc(), 1);
        assert_eq!(sell.amount, "82.50000000");
        assert_eq!(sell.symbol, "XRPUSDT");
    }

    #[tokio::test]
    async fn uses_server_time_and_returns_order_id() {
        let mut ex = MockExchange::new();
        ex.expect_server_time().returning(|| Ok(42));
        ex.expect_execute_trade()
            .withf(|_, req| req.timestamp == Some(42) && req.amount == "49.5000")
            .times(1)
            .returning(|_, _| Ok(TradeResult::filled("777")));

        let done = execute(&ex, &bot(), "XRPUSDT", Side::Buy, &calc()).await.unwrap();
        assert_eq!(done.order_id, "777");
        assert_eq!(done.submitted_amount, "49.5000");
    }

    #[tokio::test]
    async fn venue_rounding_is_reported() {
        let mut ex = MockExchange::new();
        ex.expect_server_time().returning(|| Ok(1));
        ex.expect_execute_trade()
            .times(1)
            .returning(|_, _| Ok(TradeResult::filled("5").with_submitted(Some("82.5".into()))));

        let done = execute(&ex, &bot(), "XRPUSDT", Side::Sell, &calc()).await.unwrap();
        assert_eq!(done.request.amount, "82.50000000");
        assert_eq!(done.submitted_amount, "82.5");
    }

    #[tokio::test]
    async fn rejection_keeps_exchange_message() {
        let mut ex = MockExchange::new();
        ex.expect_server_time().returning(|| Ok(1));
        ex.expect_execute_trade()
            .with(always(), always())
            .times(1)
            .returning(|_, _| Ok(TradeResult::rejected("Filter failure: NOTIONAL")));

        let err = execute(&ex, &bot(), "XRPUSDT", Side::Sell, &calc()).await.unwrap_err();
        assert_eq!(err, ExecutionError::ExchangeRejected("Filter failure: NOTIONAL".into()));
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let mut ex = MockExchange::new();
        ex.expect_server_time().returning(|| Ok(1));
        ex.expect_execute_trade()
            .times(1)
            .returning(|_, _| Err(ExecutionError::ExchangeUnreachable("connection reset".into())));

        let err = execute(&ex, &bot(), "XRPUSDT", Side::Buy, &calc()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ExchangeUnreachable(_)));
    }
}
