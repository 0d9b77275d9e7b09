//! JSON file storage for the state snapshot.

use std::path::{Path, PathBuf};

use crate::base::types::{Res, Void};

use super::BotState;

/// Reads and writes the snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` when the file does not exist.
    pub async fn read(&self) -> Res<Option<BotState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write the snapshot, creating parent directories as needed.
    pub async fn write(&self, state: &BotState) -> Void {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(state)?;

        // Write to a sibling temp file, then rename over the snapshot.
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}
