//! Built-in watchers
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use slicewise_core::Watcher;
use slicewise_core::chat::Conversation;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum WriteMode {
    /// Add to whatever the file already holds
    #[default]
    Append,
    /// Truncate the file on the first write, then append
    Replace,
}

/// Writes every conversation as a line of JSON
#[derive(Debug)]
pub struct JsonlWatcher {
    path: PathBuf,
    mode: WriteMode,
    /// Whether anything was written yet; also serializes writes
    written: Mutex<bool>,
}

impl JsonlWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlWatcher {
            path: path.into(),
            mode: WriteMode::default(),
            written: Mutex::new(false),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Watcher for JsonlWatcher {
    #[tracing::instrument(skip_all, fields(path = %self.path.display(), count = conversations.len()))]
    async fn watch(&self, conversations: &[Conversation]) -> Result<()> {
        let mut written = self.written.lock().await;

        let mut lines = String::new();
        for conversation in conversations {
            lines.push_str(
                &serde_json::to_string(conversation).context("Failed to serialize conversation")?,
            );
            lines.push('\n');
        }

        let truncate = self.mode == WriteMode::Replace && !*written;
        let mut file = fs_err::tokio::OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(&self.path)
            .await?;

        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        *written = true;

        tracing::debug!(mode = %self.mode, "Wrote conversations");
        Ok(())
    }
}

/// Emits an event for every conversation
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWatcher;

#[async_trait]
impl Watcher for TracingWatcher {
    async fn watch(&self, conversations: &[Conversation]) -> Result<()> {
        for conversation in conversations {
            tracing::info!(
                uuid = %conversation.uuid(),
                messages = conversation.len(),
                stop_reason = ?conversation.stop_reason(),
                failure = ?conversation.failure(),
                "Conversation finished"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slicewise_core::chat::Message;
    use temp_dir::TempDir;

    fn conversation(content: &str) -> Conversation {
        Conversation::new(vec![Message::user(content)])
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("conversations.jsonl");
        std::fs::write(&path, "{\"existing\":true}\n").unwrap();

        let watcher = JsonlWatcher::new(&path);
        watcher.watch(&[conversation("one")]).await.unwrap();
        watcher
            .watch(&[conversation("two"), conversation("three")])
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["existing"], true);
        assert_eq!(lines[3]["messages"][0]["content"], "three");
    }

    #[test_log::test(tokio::test)]
    async fn test_replace_truncates_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("conversations.jsonl");
        std::fs::write(&path, "{\"existing\":true}\n").unwrap();

        let watcher = JsonlWatcher::new(&path).with_mode(WriteMode::Replace);
        watcher.watch(&[conversation("one")]).await.unwrap();
        watcher.watch(&[conversation("two")]).await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["messages"][0]["content"], "one");
        assert_eq!(lines[1]["messages"][0]["content"], "two");
    }

    #[test_log::test(tokio::test)]
    async fn test_tracing_watcher_accepts_anything() {
        TracingWatcher
            .watch(&[conversation("one")])
            .await
            .unwrap();
    }
}
