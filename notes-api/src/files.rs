use std::path::{Component, Path, PathBuf};

use rand::Rng;

use crate::{notes::MediaKind, Error, Result};

/// Media files under the public uploads root. Stored paths are relative,
/// `{kind}s/{filename}`.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub path: String,
}

fn extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(10)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

pub fn generate_filename(original_name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{millis}-{suffix:09}{}", extension(original_name))
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config() -> Self {
        Self::new(&crate::config().uploads_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored path. `None` for paths that would
    /// leave the uploads root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        (is_plain && !path.is_empty()).then(|| self.root.join(relative))
    }

    pub async fn save(&self, kind: MediaKind, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        let filename = generate_filename(original_name);
        let path = format!("{}/{filename}", kind.plural());
        let dir = self.root.join(kind.plural());

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Unexpected(format!("Failed to create {}: {e}", dir.display())))?;
        tokio::fs::write(dir.join(&filename), bytes)
            .await
            .map_err(|e| Error::Unexpected(format!("Failed to store {path}: {e}")))?;

        tracing::debug!("stored {} bytes at {path}", bytes.len());
        Ok(StoredFile { filename, path })
    }

    /// Best effort; failures are logged and swallowed.
    pub async fn remove(&self, path: &str) {
        let Some(location) = self.resolve(path) else {
            tracing::warn!("refusing to remove {path}: outside uploads root");
            return;
        };

        match tokio::fs::remove_file(&location).await {
            Ok(()) => tracing::debug!("removed {path}"),
            Err(error) => tracing::warn!("failed to remove {path}: {error}"),
        }
    }

    pub async fn remove_all(&self, paths: &[String]) {
        for path in paths {
            self.remove(path).await;
        }
    }
}
