// ===============================
// src/dedupe.rs (idempotency)
// ===============================
//
// Dua kunci per signal:
// - intent: sha256(bot + payload tanpa timestamp), TTL pendek (DEDUP_WINDOW_SECS)
// - exact : sha256(bot + payload lengkap), TTL = jendela freshness timestamp
// Kunci dicatat sebelum order dikirim -> at-most-once. Kalau signal gagal
// sebelum order dikirim (rate limit, fetch, kalkulasi), kunci dilepas lagi
// supaya re-delivery dari platform masih bisa jalan.
//
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use sha2::{Digest, Sha256};

use crate::domain::TradingSignal;
use crate::error::ValidationError;

fn digest(bot_id: &str, signal: &TradingSignal, with_timestamp: bool) -> String {
    let action = signal.action.to_ascii_lowercase();
    let mut h = Sha256::new();
    for part in [
        bot_id,
        signal.public_id.as_str(),
        signal.schema.as_str(),
        action.as_str(),
        signal.ticker.as_str(),
        signal.order_size.as_str(),
        signal.position_size.as_str(),
    ] {
        h.update(part.as_bytes());
        h.update([0u8]);
    }
    if with_timestamp {
        h.update(signal.timestamp.as_bytes());
    }
    hex::encode(h.finalize())
}

/// Intent key: the payload minus its timestamp.
pub fn intent_key(bot_id: &str, signal: &TradingSignal) -> String {
    format!("i:{}", digest(bot_id, signal, false))
}

pub fn exact_key(bot_id: &str, signal: &TradingSignal) -> String {
    format!("x:{}", digest(bot_id, signal, true))
}

#[derive(Debug)]
pub struct SeenSignals {
    intent_ttl: Duration,
    exact_ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl SeenSignals {
    /// A zero `intent_ttl` disables intent dedup; exact replays are always caught.
    pub fn new(intent_ttl: Duration, exact_ttl: Duration) -> Self {
        Self { intent_ttl, exact_ttl, seen: Mutex::new(HashMap::new()) }
    }

    pub fn check_and_insert(&self, bot_id: &str, signal: &TradingSignal) -> Result<(), ValidationError> {
        self.check_and_insert_at(bot_id, signal, Instant::now())
    }

    pub fn check_and_insert_at(
        &self,
        bot_id: &str,
        signal: &TradingSignal,
        now: Instant,
    ) -> Result<(), ValidationError> {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.retain(|_, expires| *expires > now);

        let exact = exact_key(bot_id, signal);
        let intent = (!self.intent_ttl.is_zero()).then(|| intent_key(bot_id, signal));
        if seen.contains_key(&exact) || intent.as_ref().is_some_and(|k| seen.contains_key(k)) {
            return Err(ValidationError::DuplicateSignal);
        }
        seen.insert(exact, now + self.exact_ttl);
        if let Some(k) = intent {
            seen.insert(k, now + self.intent_ttl);
        }
        Ok(())
    }

    /// Forget both keys of a signal that never reached the exchange.
    pub fn release(&self, bot_id: &str, signal: &TradingSignal) {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.remove(&exact_key(bot_id, signal));
        seen.remove(&intent_key(bot_id, signal));
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
