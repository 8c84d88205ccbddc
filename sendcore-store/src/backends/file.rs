//! Durable file-backed [`BackingStore`].
//!
//! Each message is one file named `<ulid>.bin` (bincode-encoded [`Context`])
//! under the configured spool directory. Writes go through a `.tmp` sibling
//! and an atomic rename so a crash mid-write never leaves a torn file behind
//! for [`list`](BackingStore::list)/[`read`](BackingStore::read) to trip over.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sendcore_common::context::Context;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::{SerializationError, SpoolError, ValidationError},
    r#trait::BackingStore,
    types::SpooledMessageId,
};

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/sendcore")
}

/// Directories a spool must never be pointed at, regardless of platform.
#[cfg(unix)]
const FORBIDDEN_PREFIXES: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

#[cfg(windows)]
const FORBIDDEN_PREFIXES: &[&str] = &[
    "c:\\windows",
    "c:\\program files",
    "c:\\program files (x86)",
    "c:\\programdata",
];

fn validate_path(path: &Path) -> Result<(), SpoolError> {
    let display = path.display().to_string();

    if !path.is_absolute() {
        return Err(SpoolError::Validation(ValidationError::InvalidConfiguration(
            format!("spool path must be absolute: {display}"),
        )));
    }

    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(SpoolError::Validation(ValidationError::InvalidConfiguration(
            format!("spool path cannot contain '..': {display}"),
        )));
    }

    let normalised = display.to_ascii_lowercase().replace('/', "\\");
    let normalised_unix = display.to_ascii_lowercase();
    if FORBIDDEN_PREFIXES
        .iter()
        .any(|prefix| normalised.starts_with(prefix) || normalised_unix.starts_with(prefix))
    {
        return Err(SpoolError::Validation(ValidationError::InvalidConfiguration(
            format!("spool path refers to a system directory: {display}"),
        )));
    }

    Ok(())
}

/// File-backed [`BackingStore`]: the production spool implementation.
///
/// Construct via [`FileBackingStore::builder`] (or [`Deserialize`], which
/// runs the same path validation) rather than the struct literal, so the
/// "no system directories, no traversal, must be absolute" invariants always
/// hold.
#[derive(Debug, Clone, Serialize)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self { path: default_path() }
    }
}

impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default = "default_path")]
            path: PathBuf,
        }

        let raw = Raw::deserialize(deserializer)?;
        validate_path(&raw.path).map_err(serde::de::Error::custom)?;
        Ok(Self { path: raw.path })
    }
}

impl FileBackingStore {
    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensures the spool directory exists and is usable: created if absent,
    /// rejected if it exists as a non-directory or isn't writable.
    ///
    /// # Errors
    /// Returns [`SpoolError::Validation`] if the directory cannot be created,
    /// is not a directory, or a writability probe fails.
    pub fn ensure_ready(&self) -> crate::Result<()> {
        if !self.path.exists() {
            std::fs::create_dir_all(&self.path).map_err(|_| {
                SpoolError::Validation(ValidationError::PathNotFound(
                    self.path.display().to_string(),
                ))
            })?;
        }

        let metadata = std::fs::metadata(&self.path).map_err(|_| {
            SpoolError::Validation(ValidationError::PathNotFound(self.path.display().to_string()))
        })?;
        if !metadata.is_dir() {
            return Err(SpoolError::Validation(ValidationError::NotDirectory(
                self.path.display().to_string(),
            )));
        }

        let probe = self.path.join(format!(".sendcore-probe-{}", ulid::Ulid::new()));
        std::fs::write(&probe, []).map_err(|_| {
            SpoolError::Validation(ValidationError::NotWritable(self.path.display().to_string()))
        })?;
        let _ = std::fs::remove_file(&probe);

        Ok(())
    }

    fn data_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    fn tmp_path(&self, id: &SpooledMessageId) -> PathBuf {
        self.path.join(format!("{id}.bin.tmp"))
    }

    async fn persist(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(context, bincode::config::standard())
            .map_err(|e| SpoolError::Serialization(SerializationError::Encode(e)))?;

        let tmp = self.tmp_path(id);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.data_path(id)).await?;
        Ok(())
    }
}

/// Builder for [`FileBackingStore`], running path validation in [`build`](Self::build).
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: Option<PathBuf>,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// # Errors
    /// Returns an error if the path is relative, traverses `..`, or refers to
    /// a well-known system directory.
    pub fn build(self) -> crate::Result<FileBackingStore> {
        let path = self.path.unwrap_or_else(default_path);
        validate_path(&path)?;
        Ok(FileBackingStore { path })
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId> {
        let id = SpooledMessageId::generate();
        context.tracking_id = Some(id.to_string());
        self.persist(&id, context).await?;
        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>> {
        let mut dir = tokio::fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && let Some(id) = SpooledMessageId::from_filename(name)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context> {
        let bytes = tokio::fs::read(self.data_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpoolError::NotFound(id.clone())
            } else {
                SpoolError::Io(e)
            }
        })?;

        let (context, _): (Context, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| SpoolError::Serialization(SerializationError::Decode(e)))?;
        Ok(context)
    }

    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()> {
        if tokio::fs::metadata(self.data_path(id)).await.is_err() {
            return Err(SpoolError::NotFound(id.clone()));
        }
        self.persist(id, context).await
    }

    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()> {
        tokio::fs::remove_file(self.data_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpoolError::NotFound(id.clone())
            } else {
                SpoolError::Io(e)
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, FileBackingStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackingStore::builder()
            .path(dir.path().to_path_buf())
            .build()
            .expect("valid path");
        (dir, store)
    }

    #[tokio::test]
    async fn write_read_delete_round_trip() {
        let (_dir, store) = temp_store();
        let mut context = Context::default();
        let id = store.write(&mut context).await.expect("write");

        let listed = store.list().await.expect("list");
        assert_eq!(listed, vec![id.clone()]);

        let read = store.read(&id).await.expect("read");
        assert_eq!(read.tracking_id, Some(id.to_string()));

        store.delete(&id).await.expect("delete");
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_requires_existing_message() {
        let (_dir, store) = temp_store();
        let id = SpooledMessageId::generate();
        let err = store.update(&id, &Context::default()).await.unwrap_err();
        assert!(matches!(err, SpoolError::NotFound(_)));
    }

    #[tokio::test]
    async fn read_missing_message_is_not_found() {
        let (_dir, store) = temp_store();
        let id = SpooledMessageId::generate();
        let err = store.read(&id).await.unwrap_err();
        assert!(matches!(err, SpoolError::NotFound(_)));
    }
}
