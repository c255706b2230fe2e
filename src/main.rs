// ===============================
// src/main.rs
// ===============================
/*
 # kirim signal ke bot lokal (VENUE_MODE=mock)
 curl -s -X POST localhost:8080/webhook/bot-1 -H 'content-type: application/json' \
   -d '{"action":"buy","ticker":"XRPUSDT","order_size":"50%","position_size":"1",
        "schema":"1.0","timestamp":"'$(date -u +%FT%TZ)'","public_id":"pub-1"}'

 # konfigurasi yang aktif & hasil signal
 curl -s localhost:8080/metrics | egrep '^config_(venue_mode|exchange)'
 curl -s localhost:8080/metrics | grep '^signals_'
*/
/*
=============================================================================
Project : signal_bot_rust: webhook signal to exchange order pipeline
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Receives charting-platform webhook signals, validates them against
          per-bot config, sizes orders from live balances and price, submits
          MARKET orders (paper or Binance Spot), and writes a JSONL audit
          trail. Exposes Prometheus metrics on the same port.
=============================================================================
*/
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_bot_rust::audit::{AuditSink, JsonlAuditSink, LogAuditSink};
use signal_bot_rust::bots::JsonFileBots;
use signal_bot_rust::config::{self, Cli, MarketMode};
use signal_bot_rust::exchange::binance::BinanceSpot;
use signal_bot_rust::exchange::paper::PaperExchange;
use signal_bot_rust::exchange::ExchangeRegistry;
use signal_bot_rust::metrics;
use signal_bot_rust::pipeline::WebhookPipeline;
use signal_bot_rust::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config ----
    let cli = Cli::parse();
    let args = config::load(&cli).context("invalid configuration")?;

    // ---- Metrics ----
    metrics::init();

    // ---- Venues ----
    let paper = Arc::new(PaperExchange::from_lists(&args.paper_balances, &args.paper_prices));
    let mut exchanges = ExchangeRegistry::new();
    exchanges.register("paper", paper.clone());
    match args.venue_mode {
        // mock: bot dengan exchangeName "binance" juga diarahkan ke paper venue
        MarketMode::Mock => exchanges.register("binance", paper),
        MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
            let binance = BinanceSpot::new(&args.binance_rest_url, args.binance_recv_window, args.exchange_timeout)
                .context("cannot build Binance client")?;
            exchanges.register("binance", Arc::new(binance));
        }
    }

    info!(
        bind = %args.bind_addr,
        bots_file = %args.bots_file.display(),
        audit_file = ?args.audit_file,
        venue_mode = args.venue_mode.as_str(),
        binance_rest = %args.binance_rest_url,
        exchanges = ?exchanges.names(),
        schema = %args.signal_schema,
        max_clock_skew_secs = args.max_clock_skew_secs,
        dedup_window_secs = args.dedup_window_secs,
        "startup config"
    );
    metrics::CONFIG_VENUE_MODE
        .with_label_values(&[args.venue_mode.as_str()])
        .set(1);
    for name in exchanges.names() {
        metrics::CONFIG_EXCHANGE.with_label_values(&[name.as_str()]).set(1);
    }

    // ---- Audit (optional file) ----
    let (audit, writer) = match &args.audit_file {
        Some(path) => {
            let (sink, handle) = JsonlAuditSink::open(path)
                .await
                .with_context(|| format!("cannot open audit file {}", path.display()))?;
            (Arc::new(sink) as Arc<dyn AuditSink>, Some(handle))
        }
        None => (Arc::new(LogAuditSink) as Arc<dyn AuditSink>, None),
    };

    // ---- Pipeline + HTTP ----
    let state = Arc::new(AppState {
        pipeline: WebhookPipeline::new(args.pipeline_cfg(), exchanges, audit),
        bots: Arc::new(JsonFileBots::new(&args.bots_file)),
        trust_forwarded_for: args.trust_forwarded_for,
    });

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    server::serve(args.bind_addr, state, shutdown)
        .await
        .context("webhook server failed")?;

    // server sudah drop semua state -> channel audit tertutup, tunggu flush
    if let Some(handle) = writer {
        let _ = handle.await;
    }
    info!("bye");
    Ok(())
}
