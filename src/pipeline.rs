// ===============================
// src/pipeline.rs (webhook -> order)
// ===============================
//
// validate -> dedupe -> rate limit -> fetch saldo & harga (timeout)
// -> calculate -> execute. Setiap kegagalan menghasilkan tepat satu
// audit entry terminal (validation_error / calculation_error / execution_error).
//
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::try_join;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::audit::{new_id, AuditSink, AuditTrail, Stage};
use crate::calculator;
use crate::dedupe::SeenSignals;
use crate::domain::{BotConfig, OrderCalculation, Side, TradingSignal, Warning};
use crate::error::{ExecutionError, PipelineError, ValidationError};
use crate::exchange::{Exchange, ExchangeRegistry};
use crate::executor;
use crate::metrics::{LAT_PIPELINE, SIGNALS_ACCEPTED, SIGNALS_REJECTED};
use crate::throttle::BotRateLimiter;
use crate::validator::{SignalValidator, ValidatorCfg};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PipelineCfg {
    pub validator: ValidatorCfg,
    /// Upper bound for the balance + price fetch.
    pub fetch_timeout: Duration,
    /// TTL of the payload-minus-timestamp key; zero disables it.
    pub dedup_window: Duration,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            validator: ValidatorCfg::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalOutcome {
    pub signal_id: String,
    pub calculation_id: String,
    pub order_id: String,
    pub received_at: DateTime<Utc>,
    pub calculation: OrderCalculation,
}

impl SignalOutcome {
    pub fn warnings(&self) -> &[Warning] {
        &self.calculation.warnings
    }
}

#[derive(Debug, Clone)]
pub struct SignalFailure {
    pub signal_id: String,
    pub received_at: DateTime<Utc>,
    pub error: PipelineError,
}

struct StageFailure {
    stage: Stage,
    error: PipelineError,
    details: Value,
    /// The validator writes its own entry.
    audited: bool,
}

impl StageFailure {
    fn new(stage: Stage, error: impl Into<PipelineError>, details: Value) -> Self {
        Self { stage, error: error.into(), details, audited: false }
    }
}

pub struct WebhookPipeline {
    validator: SignalValidator,
    exchanges: ExchangeRegistry,
    limiter: BotRateLimiter,
    seen: SeenSignals,
    audit: Arc<dyn AuditSink>,
    fetch_timeout: Duration,
}

impl WebhookPipeline {
    pub fn new(cfg: PipelineCfg, exchanges: ExchangeRegistry, audit: Arc<dyn AuditSink>) -> Self {
        // exact replay harus tertahan selama timestamp-nya masih dianggap fresh
        let exact_ttl = cfg.validator.max_skew.to_std().unwrap_or_default() * 2;
        Self {
            validator: SignalValidator::new(cfg.validator),
            exchanges,
            limiter: BotRateLimiter::new(),
            seen: SeenSignals::new(cfg.dedup_window, exact_ttl),
            audit,
            fetch_timeout: cfg.fetch_timeout,
        }
    }

    /// Entry point for a raw request body. Unparseable JSON or a body
    /// missing required fields is audited as `MALFORMED_PAYLOAD`.
    pub async fn process_body(
        &self,
        bot: &BotConfig,
        body: &[u8],
        client_ip: &str,
    ) -> Result<SignalOutcome, SignalFailure> {
        let payload: Value = serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
        match serde_json::from_value::<TradingSignal>(payload.clone()) {
            Ok(signal) => self.process(bot, &signal, payload, client_ip).await,
            Err(e) => {
                let received_at = Utc::now();
                let signal_id = new_id("SIG");
                let trail = AuditTrail::new(self.audit.as_ref(), &signal_id, &bot.id, payload);
                let failure = StageFailure::new(
                    Stage::Validation,
                    ValidationError::MalformedPayload(e.to_string()),
                    json!({ "client_ip": client_ip }),
                );
                Err(self.finish_failure(&trail, failure, received_at, bot))
            }
        }
    }

    /// Run one signal end to end. `payload` is the original JSON kept for
    /// the audit trail.
    pub async fn process(
        &self,
        bot: &BotConfig,
        signal: &TradingSignal,
        payload: Value,
        client_ip: &str,
    ) -> Result<SignalOutcome, SignalFailure> {
        let started = Instant::now();
        let received_at = Utc::now();
        let signal_id = new_id("SIG");
        let trail = AuditTrail::new(self.audit.as_ref(), &signal_id, &bot.id, payload);

        let res = self.run(bot, signal, client_ip, received_at, &trail).await;
        LAT_PIPELINE.observe(started.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(outcome) => Ok(outcome),
            Err(failure) => Err(self.finish_failure(&trail, failure, received_at, bot)),
        }
    }

    fn finish_failure(
        &self,
        trail: &AuditTrail<'_>,
        failure: StageFailure,
        received_at: DateTime<Utc>,
        bot: &BotConfig,
    ) -> SignalFailure {
        if !failure.audited {
            trail.failure(failure.stage, &failure.error, failure.details);
        }
        SIGNALS_REJECTED
            .with_label_values(&[failure.error.category().as_str(), failure.error.code()])
            .inc();
        warn!(
            bot_id = %bot.id,
            signal_id = %trail.signal_id,
            stage = failure.stage.as_str(),
            code = failure.error.code(),
            error = %failure.error,
            "signal failed"
        );
        SignalFailure { signal_id: trail.signal_id.clone(), received_at, error: failure.error }
    }

    /// Rate limit, fresh balances and price, order sizing. Nothing here
    /// touches the exchange's order endpoint.
    async fn prepare(
        &self,
        bot: &BotConfig,
        signal: &TradingSignal,
        side: Side,
        trail: &AuditTrail<'_>,
    ) -> Result<(Arc<dyn Exchange>, OrderCalculation, String), StageFailure> {
        self.limiter
            .try_acquire(&bot.id, bot.max_orders_per_minute)
            .map_err(|e| StageFailure::new(Stage::Validation, e, json!({ "max_orders_per_minute": bot.max_orders_per_minute })))?;

        // ---- 3) Saldo & harga terbaru (tidak pernah di-cache) ----
        let exchange = self
            .exchanges
            .get(&bot.exchange_name)
            .map_err(|e| StageFailure::new(Stage::Execution, e, Value::Null))?;
        let fetch = try_join(
            exchange.balances(&bot.credentials),
            exchange.current_price(&signal.ticker),
        );
        let (balances, price) = match timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(StageFailure::new(Stage::Execution, e, json!({ "phase": "fetch" }))),
            Err(_) => {
                let e = ExecutionError::ExchangeUnreachable(format!(
                    "balance/price fetch timed out after {}ms",
                    self.fetch_timeout.as_millis()
                ));
                return Err(StageFailure::new(Stage::Execution, e, json!({ "phase": "fetch" })));
            }
        };

        // ---- 4) Calculation ----
        let calc = calculator::calculate(&balances, &signal.order_size, &signal.ticker, &price, side)
            .map_err(|e| {
                StageFailure::new(
                    Stage::Calculation,
                    e,
                    json!({ "price": price, "balances": balances, "order_size": signal.order_size }),
                )
            })?;
        let calculation_id = new_id("CALC");
        trail.success(
            Stage::Calculation,
            "order calculated",
            json!({ "calculation_id": calculation_id, "calculation": calc, "balances": balances }),
        );
        Ok((exchange, calc, calculation_id))
    }

    async fn run(
        &self,
        bot: &BotConfig,
        signal: &TradingSignal,
        client_ip: &str,
        received_at: DateTime<Utc>,
        trail: &AuditTrail<'_>,
    ) -> Result<SignalOutcome, StageFailure> {
        // ---- 1) Validation (audits itself) ----
        let valid = self
            .validator
            .validate(signal, bot, client_ip, received_at, trail)
            .map_err(|e| StageFailure { audited: true, ..StageFailure::new(Stage::Validation, e, Value::Null) })?;
        SIGNALS_ACCEPTED.inc();

        // ---- 2) Dedupe dulu, baru rate limit: duplikat tidak makan kuota ----
        self.seen
            .check_and_insert(&bot.id, signal)
            .map_err(|e| StageFailure::new(Stage::Validation, e, Value::Null))?;

        // belum ada order yang dikirim -> kunci dedupe dilepas kalau gagal
        let (exchange, calc, calculation_id) = match self.prepare(bot, signal, valid.side, trail).await {
            Ok(v) => v,
            Err(failure) => {
                self.seen.release(&bot.id, signal);
                return Err(failure);
            }
        };

        // ---- 5) Execution ----
        let done = executor::execute(exchange.as_ref(), bot, &signal.ticker, valid.side, &calc)
            .await
            .map_err(|e| StageFailure::new(Stage::Execution, e, json!({ "calculation_id": calculation_id })))?;
        trail.success(
            Stage::Execution,
            "order placed",
            json!({
                "calculation_id": calculation_id,
                "order_id": done.order_id,
                "submitted_amount": done.submitted_amount,
                "request": done.request,
            }),
        );
        info!(
            bot_id = %bot.id,
            signal_id = %trail.signal_id,
            order_id = %done.order_id,
            side = valid.side.as_str(),
            quantity = %calc.quantity,
            "signal executed"
        );

        Ok(SignalOutcome {
            signal_id: trail.signal_id.clone(),
            calculation_id,
            order_id: done.order_id,
            received_at,
            calculation: calc,
        })
    }
}
