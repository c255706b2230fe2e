// ===============================
// src/validator.rs (webhook contract)
// ===============================
//
// Urutan cek penting (diagnostik): schema -> public_id -> ticker -> IP
// -> action -> timestamp. Gagal pertama langsung return + audit entry.
//
use std::net::IpAddr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditTrail, Stage};
use crate::domain::{BotConfig, Side, TradingSignal};
use crate::error::{PipelineError, ValidationError};

pub const DEFAULT_SCHEMA: &str = "1.0";
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ValidatorCfg {
    pub schema: String,
    pub max_skew: Duration,
}

impl Default for ValidatorCfg {
    fn default() -> Self {
        Self { schema: DEFAULT_SCHEMA.to_string(), max_skew: Duration::seconds(DEFAULT_MAX_SKEW_SECS) }
    }
}

/// A signal that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSignal {
    pub side: Side,
    pub signal_time: DateTime<Utc>,
    pub client_ip: String,
}

/// Strip the IPv4-mapped IPv6 prefix (`::ffff:1.2.3.4` -> `1.2.3.4`).
pub fn normalize_ip(raw: &str) -> String {
    let s = raw.trim().trim_start_matches('[').trim_end_matches(']');
    match s.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(ip) => ip.to_string(),
        Err(_) => {
            let lower = s.to_ascii_lowercase();
            lower.strip_prefix("::ffff:").map(str::to_string).unwrap_or(lower)
        }
    }
}

/// ISO-8601 with offset, or without one (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Ordered contract checks; no side effects.
pub fn check(
    signal: &TradingSignal,
    bot: &BotConfig,
    client_ip: &str,
    now: DateTime<Utc>,
    cfg: &ValidatorCfg,
) -> Result<ValidatedSignal, ValidationError> {
    // 1) schema
    if signal.schema != cfg.schema {
        return Err(ValidationError::SchemaMismatch { expected: cfg.schema.clone(), got: signal.schema.clone() });
    }
    // 2) identitas bot
    if signal.public_id != bot.public_id {
        return Err(ValidationError::BotIdentityMismatch);
    }
    // 3) ticker harus persis sama (tanpa fuzzy match)
    if signal.ticker != bot.trading_pair {
        return Err(ValidationError::TickerMismatch { expected: bot.trading_pair.clone(), got: signal.ticker.clone() });
    }
    // 4) allow-list IP; kosong = semua boleh
    let ip = normalize_ip(client_ip);
    if !bot.allowed_ips.is_empty() && !bot.allowed_ips.iter().any(|a| normalize_ip(a) == ip) {
        return Err(ValidationError::IpNotAuthorized(ip));
    }
    // 5) action
    let side = Side::parse(&signal.action).ok_or_else(|| ValidationError::InvalidAction(signal.action.clone()))?;
    // 6) timestamp +- max_skew
    let signal_time = parse_timestamp(&signal.timestamp).ok_or_else(|| {
        ValidationError::StaleOrInvalidTimestamp(format!("cannot parse {:?}", signal.timestamp))
    })?;
    let skew = now.signed_duration_since(signal_time);
    if skew > cfg.max_skew || skew < -cfg.max_skew {
        return Err(ValidationError::StaleOrInvalidTimestamp(format!(
            "{} is {}s away from server time",
            signal.timestamp,
            skew.num_seconds()
        )));
    }

    Ok(ValidatedSignal { side, signal_time, client_ip: ip })
}

pub struct SignalValidator {
    cfg: ValidatorCfg,
}

impl SignalValidator {
    pub fn new(cfg: ValidatorCfg) -> Self {
        Self { cfg }
    }

    /// Run [`check`] and audit the outcome: `received` on accept,
    /// one `validation_error` entry on reject.
    pub fn validate(
        &self,
        signal: &TradingSignal,
        bot: &BotConfig,
        client_ip: &str,
        now: DateTime<Utc>,
        trail: &AuditTrail<'_>,
    ) -> Result<ValidatedSignal, ValidationError> {
        match check(signal, bot, client_ip, now, &self.cfg) {
            Ok(v) => {
                info!(bot_id = %bot.id, signal_id = %trail.signal_id, side = v.side.as_str(), ticker = %signal.ticker, "signal received");
                trail.received(
                    Stage::Validation,
                    "signal accepted",
                    json!({ "client_ip": v.client_ip, "position_size": signal.position_size }),
                );
                Ok(v)
            }
            Err(e) => {
                warn!(bot_id = %bot.id, signal_id = %trail.signal_id, code = e.code(), error = %e, "signal rejected");
                trail.failure(
                    Stage::Validation,
                    &PipelineError::Validation(e.clone()),
                    json!({ "client_ip": normalize_ip(client_ip) }),
                );
                Err(e)
            }
        }
    }
}
