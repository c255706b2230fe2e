// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : signal_bot_rust: webhook signal to exchange order pipeline
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Env (.env honoured) + CLI flags. CLI wins over env, env wins over
          defaults. Venue mode selects paper vs Binance REST endpoints.
=============================================================================
*/
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use dotenvy::dotenv;
use thiserror::Error;
use tokio::time::Duration;

use crate::pipeline::PipelineCfg;
use crate::validator::{ValidatorCfg, DEFAULT_MAX_SKEW_SECS, DEFAULT_SCHEMA};

/// Mode venue trading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn parse(raw: &str) -> Option<MarketMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mock" | "paper"   => Some(MarketMode::Mock),
            "binance_sandbox"  => Some(MarketMode::BinanceSandbox),
            "binance_mainnet"  => Some(MarketMode::BinanceMainnet),
            _ => None,
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "https://testnet.binance.vision", // tidak dipakai saat mock
            MarketMode::BinanceSandbox  => "https://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "https://api.binance.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "mock",
            MarketMode::BinanceSandbox  => "binance_sandbox",
            MarketMode::BinanceMainnet  => "binance_mainnet",
        }
    }
}

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "signal_bot_rust", about = "Webhook trading signal -> exchange order")]
pub struct Cli {
    /// Listen address, overrides BIND_ADDR
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Bot config JSON file, overrides BOTS_FILE
    #[arg(long)]
    pub bots_file: Option<PathBuf>,
    /// Audit JSONL file ("-" = log only), overrides AUDIT_FILE
    #[arg(long)]
    pub audit_file: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Args {
    pub bind_addr: SocketAddr,
    pub bots_file: PathBuf,
    /// None = audit lewat tracing saja
    pub audit_file: Option<PathBuf>,

    pub venue_mode: MarketMode,
    pub binance_rest_url: String,
    pub binance_recv_window: u64,
    pub exchange_timeout: Duration,

    pub signal_schema: String,
    pub max_clock_skew_secs: i64,
    pub dedup_window_secs: u64,
    pub trust_forwarded_for: bool,

    pub paper_balances: String,
    pub paper_prices: String,
}

impl Args {
    pub fn pipeline_cfg(&self) -> PipelineCfg {
        PipelineCfg {
            validator: ValidatorCfg {
                schema: self.signal_schema.clone(),
                max_skew: chrono::Duration::seconds(self.max_clock_skew_secs),
            },
            fetch_timeout: self.exchange_timeout,
            dedup_window: Duration::from_secs(self.dedup_window_secs),
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
    }
}

/// Build config from an arbitrary key lookup (env in production, a map in tests).
pub fn from_lookup(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Result<Args, ConfigError> {
    // ===== Basic =====
    let bind_addr = match cli.bind {
        Some(a) => a,
        None => parsed(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
    };
    let bots_file = cli
        .bots_file
        .clone()
        .or_else(|| lookup("BOTS_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("bots.json"));
    let audit_raw = cli
        .audit_file
        .clone()
        .or_else(|| lookup("AUDIT_FILE"))
        .unwrap_or_else(|| "logs/audit.jsonl".to_string());
    let audit_file = match audit_raw.trim() {
        "" | "-" => None,
        p => Some(PathBuf::from(p)),
    };

    // ===== Mode =====
    let venue_mode = match lookup("VENUE_MODE") {
        None => MarketMode::Mock,
        Some(v) => MarketMode::parse(&v).ok_or(ConfigError::Invalid { key: "VENUE_MODE", value: v })?,
    };
    let binance_rest_url = lookup("BINANCE_REST_URL")
        .unwrap_or_else(|| venue_mode.default_rest_url().to_string());
    let binance_recv_window = parsed(&lookup, "BINANCE_RECV_WINDOW", 5_000u64)?;
    let exchange_timeout = Duration::from_millis(parsed(&lookup, "EXCHANGE_TIMEOUT_MS", 5_000u64)?);

    // ===== Signal contract =====
    let signal_schema = lookup("SIGNAL_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
    let max_clock_skew_secs = parsed(&lookup, "MAX_CLOCK_SKEW_SECS", DEFAULT_MAX_SKEW_SECS)?;
    if max_clock_skew_secs <= 0 {
        return Err(ConfigError::Invalid { key: "MAX_CLOCK_SKEW_SECS", value: max_clock_skew_secs.to_string() });
    }
    let dedup_window_secs = parsed(&lookup, "DEDUP_WINDOW_SECS", 10u64)?;
    let trust_forwarded_for = flag(&lookup, "TRUST_FORWARDED_FOR")?;

    // ===== Paper venue =====
    let paper_balances = lookup("PAPER_BALANCES").unwrap_or_else(|| "USDT:1000".to_string());
    let paper_prices = lookup("PAPER_PRICES").unwrap_or_else(|| "BTCUSDT:60000,ETHUSDT:3000,XRPUSDT:0.6".to_string());

    Ok(Args {
        bind_addr,
        bots_file,
        audit_file,
        venue_mode,
        binance_rest_url,
        binance_recv_window,
        exchange_timeout,
        signal_schema,
        max_clock_skew_secs,
        dedup_window_secs,
        trust_forwarded_for,
        paper_balances,
        paper_prices,
    })
}

pub fn load(cli: &Cli) -> Result<Args, ConfigError> {
    // Pastikan .env dibaca (agar BOTS_FILE, VENUE_MODE, dll ter-load)
    let _ = dotenv();
    from_lookup(cli, |k| env::var(k).ok())
}
