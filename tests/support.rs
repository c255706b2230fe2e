#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hyper::{Body, Request, Response, StatusCode};
use serde_json::{json, Value};

use signal_bot_rust::audit::{AuditLogEntry, MemoryAuditSink};
use signal_bot_rust::bots::StaticBots;
use signal_bot_rust::domain::{BotConfig, Credentials, TradingSignal};
use signal_bot_rust::exchange::paper::PaperExchange;
use signal_bot_rust::exchange::ExchangeRegistry;
use signal_bot_rust::pipeline::{PipelineCfg, WebhookPipeline};
use signal_bot_rust::server::{self, AppState};

pub const BOT_ID: &str = "bot-1";
pub const PUBLIC_ID: &str = "pub-1";
pub const TICKER: &str = "XRPUSDT";

pub fn bot() -> BotConfig {
    BotConfig {
        id: BOT_ID.into(),
        public_id: PUBLIC_ID.into(),
        trading_pair: TICKER.into(),
        user_id: "user-1".into(),
        exchange_name: "binance".into(),
        credentials: Credentials::new("api-key", "secret"),
        allowed_ips: Default::default(),
        max_orders_per_minute: 0,
    }
}

pub fn signal(action: &str, order_size: &str) -> TradingSignal {
    TradingSignal {
        action: action.into(),
        ticker: TICKER.into(),
        order_size: order_size.into(),
        position_size: "1".into(),
        schema: "1.0".into(),
        timestamp: Utc::now().to_rfc3339(),
        public_id: PUBLIC_ID.into(),
    }
}

pub fn payload(sig: &TradingSignal) -> Value {
    serde_json::to_value(sig).unwrap()
}

pub struct TestHarness {
    pub paper: Arc<PaperExchange>,
    pub audit: Arc<MemoryAuditSink>,
    pub state: Arc<AppState>,
}

impl TestHarness {
    pub fn new(paper: PaperExchange) -> Self {
        Self::with_bots(paper, vec![bot()], false)
    }

    pub fn with_bots(paper: PaperExchange, bots: Vec<BotConfig>, trust_forwarded_for: bool) -> Self {
        let paper = Arc::new(paper);
        let audit = Arc::new(MemoryAuditSink::new());
        let mut exchanges = ExchangeRegistry::new();
        exchanges.register("binance", paper.clone());
        let state = Arc::new(AppState {
            pipeline: WebhookPipeline::new(PipelineCfg::default(), exchanges, audit.clone()),
            bots: Arc::new(StaticBots::new(bots)),
            trust_forwarded_for,
        });
        Self { paper, audit, state }
    }

    pub fn pipeline(&self) -> &WebhookPipeline {
        &self.state.pipeline
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.audit.entries()
    }

    pub fn entries_for(&self, signal_id: &str) -> Vec<AuditLogEntry> {
        self.entries().into_iter().filter(|e| e.signal_id == signal_id).collect()
    }

    pub async fn post(&self, path: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        self.post_from(path, body, None).await
    }

    pub async fn post_from(
        &self,
        path: &str,
        body: impl Into<Body>,
        forwarded_for: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = Request::post(path).header("content-type", "application/json");
        if let Some(ip) = forwarded_for {
            req = req.header("x-forwarded-for", ip);
        }
        let resp = self.send(req.body(body.into()).unwrap()).await;
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)));
        (status, value)
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        let remote: SocketAddr = "10.0.0.9:40000".parse().unwrap();
        server::handle(req, remote, self.state.clone()).await.unwrap()
    }
}
