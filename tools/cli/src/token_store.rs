//! Session tokens persisted to a JSON file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use sealdrop_client::{StorageKey, TokenRepository, TokenType};
use sealdrop_common::{Error, Maybe, Result};

/// Token repository backed by a file readable only by the current user.
///
/// The whole map is rewritten on every change through a temporary file and
/// a rename, so a crash never leaves a half-written file behind.
pub struct FileTokenRepository {
    path: PathBuf,
    items: Mutex<HashMap<StorageKey, String>>,
}

impl FileTokenRepository {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                Error::Config(format!("Corrupt token store {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, items: &HashMap<StorageKey, String>) -> Result<()> {
        if items.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // A stale staging file could carry wider permissions; start afresh.
        let staged = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&staged).await?;
        file.write_all(&serde_json::to_vec_pretty(items)?).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staged, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for FileTokenRepository {
    async fn store_authentication_token(&self, token: &str) -> Result<()> {
        self.set_item(StorageKey::AuthenticationToken, token).await
    }

    async fn store_refresh_token(&self, token: &str, token_type: TokenType) -> Result<()> {
        let mut items = self.items.lock().await;
        items.insert(StorageKey::RefreshToken, token.to_string());
        items.insert(StorageKey::RefreshTokenType, token_type.as_str().to_string());
        self.persist(&items).await
    }

    async fn set_item(&self, key: StorageKey, value: &str) -> Result<()> {
        let mut items = self.items.lock().await;
        items.insert(key, value.to_string());
        self.persist(&items).await
    }

    async fn has_item(&self, key: StorageKey) -> bool {
        self.items.lock().await.contains_key(&key)
    }

    async fn get_item(&self, key: StorageKey) -> Maybe<String> {
        self.items.lock().await.get(&key).cloned().into()
    }

    async fn clear(&self) -> Result<()> {
        let mut items = self.items.lock().await;
        items.clear();
        self.persist(&items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tokens_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sealdrop").join("tokens.json");

        let store = FileTokenRepository::open(&path).await.unwrap();
        store.store_authentication_token("auth-1").await.unwrap();
        store.store_refresh_token("refresh-1", TokenType::Device).await.unwrap();

        let reopened = FileTokenRepository::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_item(StorageKey::AuthenticationToken).await,
            Maybe::Some("auth-1".to_string())
        );
        assert_eq!(
            reopened.get_item(StorageKey::RefreshTokenType).await,
            Maybe::Some("device".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenRepository::open(&path).await.unwrap();
        store.set_item(StorageKey::UserSession, "alice").await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(!store.has_item(StorageKey::UserSession).await);
    }

    #[tokio::test]
    async fn test_corrupt_store_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileTokenRepository::open(&path).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenRepository::open(&path).await.unwrap();
        store.store_authentication_token("auth").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_staging_file_does_not_widen_access() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let stale = path.with_extension("tmp");
        std::fs::write(&stale, b"{}").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileTokenRepository::open(&path).await.unwrap();
        store.store_authentication_token("auth").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
    }
}
