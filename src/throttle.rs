// ===============================
// src/throttle.rs
// ===============================
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;

use crate::error::ValidationError;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding one-minute window per bot. Excess signals are rejected, never
/// queued: a late order on a stale signal is worse than no order.
#[derive(Debug, Default)]
pub struct BotRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl BotRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `limit == 0` means the bot has no per-minute cap.
    pub fn try_acquire(&self, bot_id: &str, limit: u32) -> Result<(), ValidationError> {
        self.try_acquire_at(bot_id, limit, Instant::now())
    }

    pub fn try_acquire_at(&self, bot_id: &str, limit: u32, now: Instant) -> Result<(), ValidationError> {
        if limit == 0 {
            return Ok(());
        }
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let q = windows.entry(bot_id.to_string()).or_default();
        while let Some(front) = q.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                q.pop_front();
            } else {
                break;
            }
        }
        if q.len() >= limit as usize {
            return Err(ValidationError::RateLimited(limit));
        }
        q.push_back(now);
        Ok(())
    }
}
