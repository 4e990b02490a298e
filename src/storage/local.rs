//! Local filesystem storage implementation.
//!
//! Writes go through a `StagedSnapshot`: the document is written in full to
//! a temporary file beside the target, fsynced, read back and verified, and
//! only then renamed over the previous snapshot. A staged snapshot that is
//! dropped without being promoted removes its temporary file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Language;
use crate::storage::{FORMAT_VERSION, Snapshot, SnapshotDocument, SnapshotStorage, checksum};

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Stable path of a partition's snapshot.
    pub fn path(&self, language: &Language) -> PathBuf {
        self.root_dir.join(format!("rewards_{language}.json"))
    }

    fn temp_path(&self, language: &Language) -> PathBuf {
        let n = STAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root_dir.join(format!(
            ".rewards_{language}.json.{}.{n}.tmp",
            std::process::id()
        ))
    }

    /// Write and verify a snapshot without replacing the current one.
    pub async fn stage(&self, language: &Language, snapshot: &Snapshot) -> Result<StagedSnapshot> {
        tokio::fs::create_dir_all(&self.root_dir).await?;

        let document = SnapshotDocument::new(language, snapshot)?;
        let bytes = serde_json::to_vec_pretty(&document)?;

        let staged = StagedSnapshot {
            language: language.clone(),
            temp_path: self.temp_path(language),
            final_path: self.path(language),
            promoted: false,
        };

        let mut file = tokio::fs::File::create(&staged.temp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        // Ensure data is on disk before the rename can make it visible
        file.sync_all().await?;
        drop(file);

        let written = tokio::fs::read(&staged.temp_path).await?;
        let reread = decode(language, &written)?;
        if reread.checksum != document.checksum {
            return Err(AppError::persistence(
                language,
                "staged snapshot does not match what was written",
            ));
        }

        Ok(staged)
    }
}

#[async_trait]
impl SnapshotStorage for LocalStorage {
    async fn load(&self, language: &Language) -> Result<Option<Snapshot>> {
        let path = self.path(language);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::persistence(language, e)),
        };
        let document = decode(language, &bytes)?;
        log::debug!("Loaded snapshot {}", path.display());
        Ok(Some(document.into_snapshot()))
    }

    async fn save(&self, language: &Language, snapshot: &Snapshot) -> Result<()> {
        self.stage(language, snapshot).await?.promote().await
    }

    async fn remove(&self, language: &Language) -> Result<()> {
        match tokio::fs::remove_file(self.path(language)).await {
            Ok(()) => {
                if let Err(e) = sync_dir(&self.root_dir).await {
                    log::warn!("Could not sync {}: {}", self.root_dir.display(), e);
                }
                log::info!("Removed snapshot for {}", language);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::persistence(language, e)),
        }
    }
}

/// Parse and verify a snapshot document.
fn decode(language: &Language, bytes: &[u8]) -> Result<SnapshotDocument> {
    let document: SnapshotDocument = serde_json::from_slice(bytes)
        .map_err(|e| AppError::persistence(language, format!("corrupt snapshot: {e}")))?;

    if document.format_version != FORMAT_VERSION {
        return Err(AppError::persistence(
            language,
            format!("unsupported format version {}", document.format_version),
        ));
    }
    if &document.language != language {
        return Err(AppError::persistence(
            language,
            format!("snapshot belongs to {}", document.language),
        ));
    }
    if checksum(&document.records)? != document.checksum {
        return Err(AppError::persistence(language, "checksum mismatch"));
    }
    Ok(document)
}

/// A verified snapshot waiting to replace the current one.
#[derive(Debug)]
pub struct StagedSnapshot {
    language: Language,
    temp_path: PathBuf,
    final_path: PathBuf,
    promoted: bool,
}

impl StagedSnapshot {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically replace the current snapshot with the staged one.
    pub async fn promote(mut self) -> Result<()> {
        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|e| AppError::persistence(&self.language, e))?;
        self.promoted = true;

        // Rename is already visible, so a failed directory sync is only logged
        if let Some(dir) = self.final_path.parent() {
            if let Err(e) = sync_dir(dir).await {
                log::warn!("Could not sync {}: {}", dir.display(), e);
            }
        }

        log::info!(
            "Snapshot for {} written to {}",
            self.language,
            self.final_path.display()
        );
        Ok(())
    }
}

/// Flush a directory entry change (rename, unlink) to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl Drop for StagedSnapshot {
    fn drop(&mut self) {
        if !self.promoted {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
