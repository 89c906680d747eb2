//! JSON file store
//!
//! One document per key at `<root>/<file name>.json`. File names are the key
//! with every character outside `[A-Za-z0-9._-]` replaced by `_`; a leading
//! dot is escaped the same way so no key can name a hidden or parent entry.
//!
//! Writes go to a temporary sibling and are renamed into place, so readers
//! only ever see a complete document.

use crate::error::StoreError;
use quill_autosave::{PersistenceSink, SaveKey, SinkError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const EXTENSION: &str = "json";

/// Directory of JSON documents, one per key
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
    durable: bool,
}

impl JsonFileStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            durable: false,
        }
    }

    /// Fsync each document before it is renamed into place
    #[must_use]
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `key`
    ///
    /// # Errors
    /// - `StoreError::InvalidKey` for a blank key
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let name = file_name(key).ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        Ok(self.root.join(format!("{name}.{EXTENSION}")))
    }

    /// Write `value` as the document for `key`
    ///
    /// # Errors
    /// - `StoreError::Json` if `value` cannot be encoded
    /// - `StoreError::Io` on filesystem failure
    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let contents = serde_json::to_vec_pretty(value)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp_path = tmp_path_for(&path);
        let written = self.write_tmp(&tmp_path, &contents).await;
        let renamed = match written {
            Ok(()) => tokio::fs::rename(&tmp_path, &path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = renamed {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        tracing::trace!(key, path = %path.display(), bytes = contents.len(), "document written");
        Ok(())
    }

    /// Read the document for `key`
    ///
    /// Returns `None` if nothing was stored under `key`.
    ///
    /// # Errors
    /// - `StoreError::Json` if the document does not decode as `T`
    /// - `StoreError::Io` on other filesystem failures
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// File stems of stored documents, sorted
    ///
    /// # Errors
    /// - `StoreError::Io` if the root exists but cannot be listed
    pub async fn stored_names(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn write_tmp(&self, tmp_path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(contents).await?;
        if self.durable {
            file.sync_all().await?;
        } else {
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: Serialize + Send + Sync + 'static> PersistenceSink<T> for JsonFileStore {
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError> {
        self.write(key.as_str(), &payload).await.map_err(SinkError::from)
    }
}

/// Sanitised file stem for `key`, or `None` for a blank key
fn file_name(key: &str) -> Option<String> {
    let mut name: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with('.') {
        name.replace_range(0..1, "_");
    }
    if name.is_empty() {
        return None;
    }
    Some(name)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
