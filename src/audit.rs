// ===============================
// src/audit.rs
// ===============================
//
// Audit trail append-only untuk setiap signal:
// - Satu entry per stage (received / success / error), tidak pernah di-update.
// - Payload asli ikut disimpan supaya bisa di-replay secara forensik.
// - JsonlAuditSink: tulis ke file .jsonl via task background (BufWriter,
//   flush periodik tiap 1s dan tiap 100 entry, reopen kalau tulis gagal).
//
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::error::{ErrorCategory, PipelineError};
use crate::metrics::AUDIT_ENTRIES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage { Validation, Calculation, Execution }

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self { Stage::Validation => "validation", Stage::Calculation => "calculation", Stage::Execution => "execution" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus { Received, Success, Error }

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self { AuditStatus::Received => "received", AuditStatus::Success => "success", AuditStatus::Error => "error" }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub signal_id: String,
    pub bot_id: String,
    pub stage: Stage,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// `PREFIX-<unix nanos>-<random>`; unique enough for log correlation.
pub fn new_id(prefix: &str) -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("{}-{}-{}", prefix, now, rand::thread_rng().gen::<u32>())
}

impl AuditLogEntry {
    pub fn new(
        signal_id: &str,
        bot_id: &str,
        stage: Stage,
        status: AuditStatus,
        message: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Self {
        Self {
            id: new_id("AUD"),
            signal_id: signal_id.to_string(),
            bot_id: bot_id.to_string(),
            stage,
            status,
            category: None,
            code: None,
            message: message.into(),
            details: serde_json::Value::Null,
            payload: payload.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        signal_id: &str,
        bot_id: &str,
        stage: Stage,
        err: &PipelineError,
        payload: &serde_json::Value,
    ) -> Self {
        let mut entry = Self::new(signal_id, bot_id, stage, AuditStatus::Error, err.to_string(), payload);
        entry.category = Some(err.category());
        entry.code = Some(err.code().to_string());
        entry
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit entries. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditLogEntry);
}

/// Entries for one signal, all sharing its id, bot and original payload.
pub struct AuditTrail<'a> {
    sink: &'a dyn AuditSink,
    pub signal_id: String,
    pub bot_id: String,
    pub payload: serde_json::Value,
}

impl<'a> AuditTrail<'a> {
    pub fn new(sink: &'a dyn AuditSink, signal_id: &str, bot_id: &str, payload: serde_json::Value) -> Self {
        Self { sink, signal_id: signal_id.to_string(), bot_id: bot_id.to_string(), payload }
    }

    pub fn received(&self, stage: Stage, message: &str, details: serde_json::Value) {
        self.emit(stage, AuditStatus::Received, message, details);
    }

    pub fn success(&self, stage: Stage, message: &str, details: serde_json::Value) {
        self.emit(stage, AuditStatus::Success, message, details);
    }

    pub fn failure(&self, stage: Stage, err: &PipelineError, details: serde_json::Value) {
        let entry = AuditLogEntry::failure(&self.signal_id, &self.bot_id, stage, err, &self.payload)
            .with_details(details);
        self.sink.record(entry);
    }

    fn emit(&self, stage: Stage, status: AuditStatus, message: &str, details: serde_json::Value) {
        let entry = AuditLogEntry::new(&self.signal_id, &self.bot_id, stage, status, message, &self.payload)
            .with_details(details);
        self.sink.record(entry);
    }
}

/// Keeps entries in memory; used by tests and tooling.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditLogEntry) {
        count(&entry);
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).push(entry);
    }
}

/// Emits entries through `tracing` only (no AUDIT_FILE configured).
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, entry: AuditLogEntry) {
        count(&entry);
        match serde_json::to_string(&entry) {
            Ok(line) => info!(target: "audit", "{line}"),
            Err(e) => error!(?e, "audit: serialize error"),
        }
    }
}

fn count(entry: &AuditLogEntry) {
    AUDIT_ENTRIES
        .with_label_values(&[entry.stage.as_str(), entry.status.as_str()])
        .inc();
}

/// Appends entries as JSON lines through a background writer task.
pub struct JsonlAuditSink {
    tx: mpsc::UnboundedSender<AuditLogEntry>,
}

impl JsonlAuditSink {
    /// Open (or create) `path` and start the writer. The returned handle
    /// completes after the sink is dropped and everything is flushed.
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<(Self, JoinHandle<()>)> {
        let path = path.into();
        let writer = open_writer(&path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, writer, path));
        Ok((Self { tx }, handle))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: AuditLogEntry) {
        count(&entry);
        if let Err(e) = self.tx.send(entry) {
            // writer sudah berhenti; jangan sampai hilang tanpa jejak
            error!(entry = ?e.0, "audit: writer stopped, entry logged here instead");
        }
    }
}

async fn open_writer(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

async fn run(mut rx: mpsc::UnboundedReceiver<AuditLogEntry>, mut writer: BufWriter<fs::File>, path: PathBuf) {
    info!(path = %path.display(), "audit: writer started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    const FLUSH_EVERY_N_ENTRIES: u32 = 100;

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(entry) = maybe else {
                    // Channel closed: flush dan keluar
                    if let Err(e) = writer.flush().await {
                        error!(?e, "audit: final flush failed");
                    }
                    info!("audit: writer stopped");
                    break;
                };
                let line = match serde_json::to_string(&entry) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, id = %entry.id, "audit: serialize error, skip entry");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    warn!(?e, "audit: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, %line, "audit: reopen failed, entry logged here instead");
                            continue;
                        }
                    }
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, %line, "audit: write failed again after reopen");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_ENTRIES {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalculationError;

    fn payload() -> serde_json::Value {
        serde_json::json!({"action": "buy", "ticker": "XRPUSDT"})
    }

    #[test]
    fn failure_entry_carries_category_and_code() {
        let err: PipelineError = CalculationError::InvalidAmount("x".into()).into();
        let entry = AuditLogEntry::failure("SIG-1", "bot-1", Stage::Calculation, &err, &payload());
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["stage"], "calculation");
        assert_eq!(v["category"], "calculation_error");
        assert_eq!(v["code"], "INVALID_AMOUNT");
        assert_eq!(v["payload"]["ticker"], "XRPUSDT");
    }

    #[test]
    fn received_entry_omits_error_fields() {
        let entry = AuditLogEntry::new("SIG-1", "bot-1", Stage::Validation, AuditStatus::Received, "ok", &payload());
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["status"], "received");
        assert!(v.get("category").is_none());
        assert!(v.get("code").is_none());
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let path = std::env::temp_dir()
            .join(new_id("audit-test"))
            .join("audit.jsonl");
        let (sink, handle) = JsonlAuditSink::open(&path).await.unwrap();
        sink.record(AuditLogEntry::new("S1", "b", Stage::Validation, AuditStatus::Received, "a", &payload()));
        sink.record(AuditLogEntry::new("S1", "b", Stage::Execution, AuditStatus::Success, "b", &payload()));
        drop(sink);
        handle.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "a");
        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
