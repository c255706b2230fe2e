// ===============================
// src/error.rs
// ===============================
use serde::Serialize;
use thiserror::Error;

/// Terminal classification of a failed signal, as written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ValidationError,
    CalculationError,
    ExecutionError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::CalculationError => "calculation_error",
            ErrorCategory::ExecutionError => "execution_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported schema {got:?}, expected {expected:?}")]
    SchemaMismatch { expected: String, got: String },
    #[error("public_id does not belong to this bot")]
    BotIdentityMismatch,
    #[error("ticker {got:?} does not match bot trading pair {expected:?}")]
    TickerMismatch { expected: String, got: String },
    #[error("ip {0} is not in the bot allow-list")]
    IpNotAuthorized(String),
    #[error("invalid action {0:?}, expected buy or sell")]
    InvalidAction(String),
    #[error("stale or invalid timestamp: {0}")]
    StaleOrInvalidTimestamp(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("rate limit exceeded: max {0} orders per minute")]
    RateLimited(u32),
    #[error("duplicate signal already accepted within the dedup window")]
    DuplicateSignal,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            ValidationError::BotIdentityMismatch => "BOT_IDENTITY_MISMATCH",
            ValidationError::TickerMismatch { .. } => "TICKER_MISMATCH",
            ValidationError::IpNotAuthorized(_) => "IP_NOT_AUTHORIZED",
            ValidationError::InvalidAction(_) => "INVALID_ACTION",
            ValidationError::StaleOrInvalidTimestamp(_) => "STALE_OR_INVALID_TIMESTAMP",
            ValidationError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            ValidationError::RateLimited(_) => "RATE_LIMITED",
            ValidationError::DuplicateSignal => "DUPLICATE_SIGNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("cannot derive base/quote assets from ticker {0:?}")]
    InvalidTickerFormat(String),
    #[error("percentage must be in (0, 100], got {0:?}")]
    InvalidPercentage(String),
    #[error("amount must be a positive number, got {0:?}")]
    InvalidAmount(String),
    #[error("price must be a positive number, got {0:?}")]
    InvalidPrice(String),
    #[error("order value {amount} {asset} is below the minimum of {minimum} {asset}")]
    MinOrderValueNotMet { amount: String, minimum: String, asset: String },
    #[error("calculated quantity {0} is not positive")]
    InvalidQuantity(String),
}

impl CalculationError {
    pub fn code(&self) -> &'static str {
        match self {
            CalculationError::InvalidTickerFormat(_) => "INVALID_TICKER_FORMAT",
            CalculationError::InvalidPercentage(_) => "INVALID_PERCENTAGE",
            CalculationError::InvalidAmount(_) => "INVALID_AMOUNT",
            CalculationError::InvalidPrice(_) => "INVALID_PRICE",
            CalculationError::MinOrderValueNotMet { .. } => "MIN_ORDER_VALUE_NOT_MET",
            CalculationError::InvalidQuantity(_) => "INVALID_QUANTITY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("exchange unreachable: {0}")]
    ExchangeUnreachable(String),
    #[error("exchange rejected order: {0}")]
    ExchangeRejected(String),
    #[error("request signature error: {0}")]
    SignatureError(String),
    #[error("no adapter registered for exchange {0:?}")]
    UnsupportedExchange(String),
    #[error("quantity {quantity} rounds to zero at {precision} decimals for {symbol}")]
    QuantityBelowPrecision { symbol: String, quantity: String, precision: u32 },
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::ExchangeUnreachable(_) => "EXCHANGE_UNREACHABLE",
            ExecutionError::ExchangeRejected(_) => "EXCHANGE_REJECTED",
            ExecutionError::SignatureError(_) => "SIGNATURE_ERROR",
            ExecutionError::UnsupportedExchange(_) => "UNSUPPORTED_EXCHANGE",
            ExecutionError::QuantityBelowPrecision { .. } => "QUANTITY_BELOW_PRECISION",
        }
    }
}

/// Any terminal failure of the webhook pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Validation(_) => ErrorCategory::ValidationError,
            PipelineError::Calculation(_) => ErrorCategory::CalculationError,
            PipelineError::Execution(_) => ErrorCategory::ExecutionError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(e) => e.code(),
            PipelineError::Calculation(e) => e.code(),
            PipelineError::Execution(e) => e.code(),
        }
    }
}
