// ===============================
// src/lib.rs
// ===============================
pub mod audit;
pub mod bots;
pub mod calculator;
pub mod config;
pub mod dedupe;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod metrics;
pub mod pair;
pub mod pipeline;
pub mod server;
pub mod signing;
pub mod throttle;
pub mod validator;
