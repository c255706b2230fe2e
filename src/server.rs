// ===============================
// src/server.rs (hyper 0.14)
// ===============================
//
// POST /webhook/{bot_id}  -> pipeline
// GET  /metrics           -> Prometheus text
// GET  /healthz           -> "ok"
//
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::bots::BotDirectory;
use crate::error::{PipelineError, ValidationError};
use crate::metrics::{encode_metrics, WEBHOOK_REQUESTS};
use crate::pipeline::{SignalFailure, SignalOutcome, WebhookPipeline};

/// Webhook payloads are tiny; anything bigger is not a signal.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub pipeline: WebhookPipeline,
    pub bots: Arc<dyn BotDirectory>,
    /// Take the client IP from `X-Forwarded-For` (only behind a trusted proxy).
    pub trust_forwarded_for: bool,
}

pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, remote, state.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "webhook server listening");
    server.with_graceful_shutdown(shutdown).await
}

pub async fn handle(
    req: Request<Body>,
    remote: SocketAddr,
    state: Arc<AppState>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let resp = match (&method, path.as_str()) {
        (&Method::GET, "/metrics") => Response::builder()
            .header(CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(encode_metrics())),
        (&Method::GET, "/healthz") => Response::builder().body(Body::from("ok")),
        (m, p) if p.starts_with("/webhook/") => {
            let bot_id = p.trim_start_matches("/webhook/").to_string();
            if *m != Method::POST {
                Ok(webhook_reply(StatusCode::METHOD_NOT_ALLOWED, json!({ "error": "method not allowed" })))
            } else if bot_id.is_empty() || bot_id.contains('/') {
                Ok(webhook_reply(StatusCode::NOT_FOUND, json!({ "error": "not found" })))
            } else {
                Ok(webhook(req, remote, &bot_id, &state).await)
            }
        }
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::from("not found")),
    };
    Ok(resp.unwrap_or_else(|e| {
        error!(?e, "response build failed");
        let mut r = Response::new(Body::empty());
        *r.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        r
    }))
}

/// First hop of `X-Forwarded-For` when trusted, socket peer otherwise.
pub fn client_ip(req: &Request<Body>, remote: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    remote.ip().to_string()
}

async fn webhook(req: Request<Body>, remote: SocketAddr, bot_id: &str, state: &AppState) -> Response<Body> {
    let ip = client_ip(&req, remote, state.trust_forwarded_for);

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|n| n > MAX_BODY_BYTES) {
        return webhook_reply(StatusCode::PAYLOAD_TOO_LARGE, json!({ "error": "payload too large" }));
    }
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) if b.len() > MAX_BODY_BYTES => {
            return webhook_reply(StatusCode::PAYLOAD_TOO_LARGE, json!({ "error": "payload too large" }))
        }
        Ok(b) => b,
        Err(e) => {
            warn!(%bot_id, ?e, "webhook: body read failed");
            return webhook_reply(StatusCode::BAD_REQUEST, json!({ "success": false, "message": "cannot read body" }));
        }
    };

    // bot config dibaca ulang setiap request
    let bot = match state.bots.find(bot_id).await {
        Ok(Some(bot)) => bot,
        Ok(None) => {
            warn!(%bot_id, %ip, "webhook: unknown bot");
            return webhook_reply(
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": "bot not found", "error": "BOT_NOT_FOUND" }),
            );
        }
        Err(e) => {
            error!(%bot_id, error = %e, "webhook: bot store unavailable");
            return webhook_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "bot store unavailable", "details": e.to_string() }),
            );
        }
    };

    match state.pipeline.process_body(&bot, &body, &ip).await {
        Ok(outcome) => webhook_reply(StatusCode::OK, success_body(&outcome)),
        Err(failure) => {
            let (status, body) = failure_response(&failure);
            webhook_reply(status, body)
        }
    }
}

fn success_body(outcome: &SignalOutcome) -> Value {
    json!({
        "message": "Order placed",
        "signal_id": outcome.signal_id,
        "calculation_id": outcome.calculation_id,
        "order_id": outcome.order_id,
        "received_at": outcome.received_at,
        "warnings": outcome.warnings(),
    })
}

pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::Validation(ValidationError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::Validation(ValidationError::DuplicateSignal) => StatusCode::CONFLICT,
        PipelineError::Validation(_) | PipelineError::Calculation(_) => StatusCode::BAD_REQUEST,
        PipelineError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn failure_response(failure: &SignalFailure) -> (StatusCode, Value) {
    let err = &failure.error;
    let status = status_for(err);
    let body = match err {
        PipelineError::Execution(_) => json!({
            "error": "Trade execution failed",
            "details": {
                "code": err.code(),
                "message": err.to_string(),
                "signal_id": failure.signal_id,
            },
        }),
        PipelineError::Validation(_) | PipelineError::Calculation(_) => json!({
            "success": false,
            "message": err.to_string(),
            "error": err.category().as_str(),
            "details": {
                "code": err.code(),
                "signal_id": failure.signal_id,
                "received_at": failure.received_at,
            },
        }),
    };
    (status, body)
}

fn webhook_reply(status: StatusCode, body: Value) -> Response<Body> {
    WEBHOOK_REQUESTS.with_label_values(&[status.as_str()]).inc();
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalculationError, ExecutionError};
    use chrono::Utc;

    fn failure(err: impl Into<PipelineError>) -> SignalFailure {
        SignalFailure { signal_id: "SIG-1".into(), received_at: Utc::now(), error: err.into() }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&ValidationError::BotIdentityMismatch.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ValidationError::RateLimited(3).into()), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(&ValidationError::DuplicateSignal.into()), StatusCode::CONFLICT);
        assert_eq!(status_for(&CalculationError::InvalidAmount("x".into()).into()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&ExecutionError::ExchangeRejected("no".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn client_error_body_shape() {
        let (status, body) = failure_response(&failure(CalculationError::InvalidPercentage("0%".into())));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "calculation_error");
        assert_eq!(body["details"]["code"], "INVALID_PERCENTAGE");
    }

    #[test]
    fn execution_error_body_shape() {
        let (_, body) = failure_response(&failure(ExecutionError::ExchangeRejected("Filter failure".into())));
        assert_eq!(body["error"], "Trade execution failed");
        assert!(body["details"]["message"].as_str().unwrap().contains("Filter failure"));
        assert!(body.get("success").is_none());
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let req = Request::builder()
            .header("x-forwarded-for", "52.89.214.238, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let remote: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        assert_eq!(client_ip(&req, remote, true), "52.89.214.238");
        assert_eq!(client_ip(&req, remote, false), "10.0.0.9");
    }
}
