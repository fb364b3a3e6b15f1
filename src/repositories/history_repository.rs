use std::path::PathBuf;

use async_trait::async_trait;

use super::error::{RepositoryError, RepositoryResult};
use crate::models::ChatMessage;

/// Persistence seam for conversation histories.
///
/// The payload is the plain per-session turn snapshot, indexed like the
/// session arena; the core treats the storage format as a passthrough.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn load(&self) -> RepositoryResult<Vec<Vec<ChatMessage>>>;
    async fn save(&self, histories: &[Vec<ChatMessage>]) -> RepositoryResult<()>;
    async fn clear(&self) -> RepositoryResult<()>;
    fn storage_path(&self) -> String;
}

/// JSON-file history store.
pub struct JsonHistoryRepository {
    file_path: PathBuf,
}

impl JsonHistoryRepository {
    /// Create the repository at the XDG-compliant default location.
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RepositoryError::PathError("Cannot determine config directory".into()))?;
        Ok(Self {
            file_path: config_dir.join("quorum").join("history.json"),
        })
    }

    /// Create repository with custom path (for testing).
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    /// Write atomically using temp file + rename.
    async fn write_json(&self, json: String) -> RepositoryResult<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for JsonHistoryRepository {
    async fn load(&self) -> RepositoryResult<Vec<Vec<ChatMessage>>> {
        // No file yet means no saved session (first run).
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(&self.file_path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, histories: &[Vec<ChatMessage>]) -> RepositoryResult<()> {
        let json = serde_json::to_string_pretty(histories)?;
        self.write_json(json).await
    }

    async fn clear(&self) -> RepositoryResult<()> {
        self.write_json("[]".to_owned()).await
    }

    fn storage_path(&self) -> String {
        self.file_path.to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Vec<ChatMessage>> {
        vec![
            vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")],
            vec![ChatMessage::user("hello")],
        ]
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonHistoryRepository::with_path(dir.path().join("history.json"));

        repo.save(&sample()).await.unwrap();
        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonHistoryRepository::with_path(dir.path().join("none.json"));
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_leaves_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonHistoryRepository::with_path(dir.path().join("history.json"));

        repo.save(&sample()).await.unwrap();
        repo.clear().await.unwrap();
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonHistoryRepository::with_path(dir.path().join("nested/deep/history.json"));
        repo.save(&sample()).await.unwrap();
        assert_eq!(repo.load().await.unwrap(), sample());
    }
}
