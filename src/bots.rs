// ===============================
// src/bots.rs
// ===============================
//
// Bot config dimiliki layer persistence (di luar service ini). Di sini cuma
// lookup read-only, dibaca ulang setiap request: tidak ada cache global,
// supaya perubahan allow-list / pair langsung berlaku.
//
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::BotConfig;

#[derive(Debug, Error)]
pub enum BotStoreError {
    #[error("cannot read bot store {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("cannot parse bot store {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

#[async_trait]
pub trait BotDirectory: Send + Sync {
    async fn find(&self, bot_id: &str) -> Result<Option<BotConfig>, BotStoreError>;
}

/// JSON array of bot configs on disk.
pub struct JsonFileBots {
    path: PathBuf,
}

impl JsonFileBots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load_all(&self) -> Result<Vec<BotConfig>, BotStoreError> {
        let path = self.path.display().to_string();
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| BotStoreError::Io { path: path.clone(), source })?;
        serde_json::from_str(&text).map_err(|source| BotStoreError::Parse { path, source })
    }
}

#[async_trait]
impl BotDirectory for JsonFileBots {
    async fn find(&self, bot_id: &str) -> Result<Option<BotConfig>, BotStoreError> {
        Ok(self.load_all().await?.into_iter().find(|b| b.id == bot_id))
    }
}

/// Fixed set of bots, for tests and embedding.
pub struct StaticBots {
    bots: Vec<BotConfig>,
}

impl StaticBots {
    pub fn new(bots: Vec<BotConfig>) -> Self {
        Self { bots }
    }
}

#[async_trait]
impl BotDirectory for StaticBots {
    async fn find(&self, bot_id: &str) -> Result<Option<BotConfig>, BotStoreError> {
        Ok(self.bots.iter().find(|b| b.id == bot_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTS: &str = r#"[
        {
            "id": "bot-1",
            "public_id": "pub-1",
            "tradingPair": "XRPUSDT",
            "userId": "user-1",
            "exchangeName": "binance",
            "credentials": { "apiKey": "k", "secretKey": "s" },
            "allowedIPs": ["52.89.214.238", "::ffff:34.212.75.30"],
            "maxOrdersPerMinute": 5
        },
        {
            "id": "bot-2",
            "publicId": "pub-2",
            "tradingPair": "BTCUSDT",
            "userId": "user-1",
            "exchangeName": "paper",
            "credentials": { "apiKey": "k2", "secretKey": "s2" }
        }
    ]"#;

    async fn write_tmp(text: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(crate::audit::new_id("bots-test"));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("bots.json");
        tokio::fs::write(&path, text).await.unwrap();
        path
    }

    #[tokio::test]
    async fn reads_bots_from_file() {
        let path = write_tmp(BOTS).await;
        let store = JsonFileBots::new(&path);

        let bot = store.find("bot-1").await.unwrap().unwrap();
        assert_eq!(bot.public_id, "pub-1");
        assert_eq!(bot.allowed_ips.len(), 2);
        assert_eq!(bot.max_orders_per_minute, 5);

        let bot2 = store.find("bot-2").await.unwrap().unwrap();
        assert_eq!(bot2.public_id, "pub-2");
        assert!(bot2.allowed_ips.is_empty());
        assert_eq!(bot2.max_orders_per_minute, 0);

        assert!(store.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn changes_on_disk_are_seen_immediately() {
        let path = write_tmp("[]").await;
        let store = JsonFileBots::new(&path);
        assert!(store.find("bot-1").await.unwrap().is_none());
        tokio::fs::write(&path, BOTS).await.unwrap();
        assert!(store.find("bot-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn broken_file_is_an_error() {
        let path = write_tmp("{ not json").await;
        assert!(matches!(JsonFileBots::new(&path).find("x").await, Err(BotStoreError::Parse { .. })));
        let missing = JsonFileBots::new("/nonexistent/bots.json");
        assert!(matches!(missing.find("x").await, Err(BotStoreError::Io { .. })));
    }

    #[test]
    fn debug_redacts_secret() {
        let bots: Vec<BotConfig> = serde_json::from_str(BOTS).unwrap();
        let dbg = format!("{:?}", bots[0]);
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("secretKey: \"s\""));
        assert!(!dbg.contains("secret_key: \"s\""));
    }
}
