//! File-system mutation: reads, writes, deletes, backups and restores.
//!
//! Every destructive operation on a file that existed before the session goes
//! through [`FileManager`], which takes one backup per original path (the
//! first pre-session state) and reuses it for later edits.

pub mod rewrite;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::analyzer::pipeline::content_hash;
use crate::config::RetryPolicy;
use crate::errors::{GraftError, GraftResult};
use crate::models::BackupInfo;

/// Outcome of a write through the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: PathBuf,
    /// The file did not exist before this write.
    pub created: bool,
    pub backup: Option<BackupInfo>,
}

/// Pre-step snapshot of one path, used to undo a single integration step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub snapshot: Option<PathBuf>,
    pub existed: bool,
    pub had_backup: bool,
    pub was_created: bool,
}

/// Stable, collision-resistant artifact name for an original path.
fn artifact_name(path: &Path, suffix: &str) -> String {
    let key = path.to_string_lossy();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    format!("{:08x}-{name}.{suffix}", crc32fast::hash(key.as_bytes()))
}

fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::AlreadyExists
    )
}

/// Write `bytes` to a sibling temp file, sync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

pub struct FileManager {
    backup_dir: PathBuf,
    journal_dir: PathBuf,
    backups_enabled: bool,
    retry: RetryPolicy,
    backups: IndexMap<PathBuf, BackupInfo>,
    created: IndexSet<PathBuf>,
}

impl FileManager {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        journal_dir: impl Into<PathBuf>,
        backups_enabled: bool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            journal_dir: journal_dir.into(),
            backups_enabled,
            retry,
            backups: IndexMap::new(),
            created: IndexSet::new(),
        }
    }

    /// Reload backups and created files recorded by an earlier run.
    pub fn with_ledger(
        mut self,
        backups: impl IntoIterator<Item = BackupInfo>,
        created: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        for info in backups {
            self.backups.insert(info.original_path.clone(), info);
        }
        self.created.extend(created);
        self
    }

    pub fn backups(&self) -> Vec<BackupInfo> {
        self.backups.values().cloned().collect()
    }

    pub fn backup_for(&self, path: &Path) -> Option<&BackupInfo> {
        self.backups.get(path)
    }

    /// Files that did not exist before the session and were written by it.
    pub fn created(&self) -> Vec<PathBuf> {
        self.created.iter().cloned().collect()
    }

    pub fn was_created(&self, path: &Path) -> bool {
        self.created.contains(path)
    }

    /// Run `op` with bounded exponential backoff on transient I/O errors.
    pub fn with_retry<T>(
        &self,
        op: &'static str,
        path: &Path,
        mut f: impl FnMut() -> io::Result<T>,
    ) -> GraftResult<T> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_transient(&e) => {
                    let delay = self.retry.base_delay_ms.saturating_mul(1 << (attempt - 1).min(16));
                    warn!(
                        "{op} {} failed (attempt {attempt}/{attempts}): {e}; retrying in {delay}ms",
                        path.display()
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(GraftError::fs(op, path, e)),
            }
        }
    }

    pub fn read(&self, path: &Path) -> GraftResult<Vec<u8>> {
        self.with_retry("read", path, || fs::read(path))
    }

    pub fn read_to_string(&self, path: &Path) -> GraftResult<String> {
        self.with_retry("read", path, || fs::read_to_string(path))
    }

    /// Copy the current content of `path` aside. Repeated calls for the same
    /// path return the first backup.
    pub fn backup(&mut self, path: &Path) -> GraftResult<BackupInfo> {
        if let Some(existing) = self.backups.get(path) {
            return Ok(existing.clone());
        }
        let bytes = self.read(path)?;
        let backup_path = self.backup_dir.join(artifact_name(path, "bak"));
        self.with_retry("write backup", &backup_path, || write_atomic(&backup_path, &bytes))?;

        let written = self.read(&backup_path)?;
        if content_hash(&written) != content_hash(&bytes) {
            return Err(GraftError::fs(
                "verify backup",
                &backup_path,
                io::Error::new(io::ErrorKind::InvalidData, "backup differs from source"),
            ));
        }

        let info = BackupInfo {
            original_path: path.to_path_buf(),
            backup_path,
            created_at: Utc::now(),
        };
        debug!(
            "Backed up {} to {}",
            path.display(),
            info.backup_path.display()
        );
        self.backups.insert(path.to_path_buf(), info.clone());
        Ok(info)
    }

    /// Write the backup content back to its original path and delete the backup.
    pub fn restore(&mut self, info: &BackupInfo) -> GraftResult<()> {
        let bytes = self.read(&info.backup_path)?;
        self.with_retry("restore", &info.original_path, || {
            write_atomic(&info.original_path, &bytes)
        })?;
        self.with_retry("remove backup", &info.backup_path, || {
            fs::remove_file(&info.backup_path)
        })?;
        self.backups.shift_remove(&info.original_path);
        debug!("Restored {}", info.original_path.display());
        Ok(())
    }

    /// Restore every recorded backup, collecting failures instead of stopping.
    pub fn restore_all(&mut self) -> (Vec<PathBuf>, Vec<(PathBuf, GraftError)>) {
        let mut restored = Vec::new();
        let mut failed = Vec::new();
        for info in self.backups() {
            match self.restore(&info) {
                Ok(()) => restored.push(info.original_path),
                Err(e) => failed.push((info.original_path, e)),
            }
        }
        (restored, failed)
    }

    /// Delete every backup artifact without restoring it.
    pub fn discard_backups(&mut self) -> GraftResult<()> {
        for info in self.backups() {
            if info.backup_path.exists() {
                self.with_retry("remove backup", &info.backup_path, || {
                    fs::remove_file(&info.backup_path)
                })?;
            }
            self.backups.shift_remove(&info.original_path);
        }
        self.created.clear();
        Ok(())
    }

    /// Write `content`, backing up a pre-session original before the first write.
    pub fn write(&mut self, path: &Path, content: &[u8]) -> GraftResult<WriteReceipt> {
        let existed = path.exists();
        let backup = if existed && self.backups_enabled && !self.created.contains(path) {
            Some(self.backup(path)?)
        } else {
            None
        };
        self.with_retry("write", path, || write_atomic(path, content))?;
        if !existed {
            self.created.insert(path.to_path_buf());
        }
        debug!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(WriteReceipt {
            path: path.to_path_buf(),
            created: !existed,
            backup,
        })
    }

    /// Remove a file. Pre-session files are backed up first so a rollback can
    /// bring them back.
    pub fn delete(&mut self, path: &Path) -> GraftResult<()> {
        if self.backups_enabled && !self.created.contains(path) {
            self.backup(path)?;
        }
        self.with_retry("delete", path, || fs::remove_file(path))?;
        self.created.shift_remove(path);
        debug!("Deleted {}", path.display());
        Ok(())
    }

    /// Remove a file this session created, without taking a backup.
    pub fn remove_created(&mut self, path: &Path) -> GraftResult<()> {
        if path.exists() {
            self.with_retry("delete", path, || fs::remove_file(path))?;
        }
        self.created.shift_remove(path);
        Ok(())
    }

    /// Snapshot `path` before an integration step touches it.
    pub fn checkpoint(&self, path: &Path) -> GraftResult<Checkpoint> {
        let existed = path.exists();
        let snapshot = if existed {
            let snapshot = self.journal_dir.join(artifact_name(path, "snap"));
            let bytes = self.read(path)?;
            self.with_retry("write snapshot", &snapshot, || write_atomic(&snapshot, &bytes))?;
            Some(snapshot)
        } else {
            None
        };
        Ok(Checkpoint {
            path: path.to_path_buf(),
            snapshot,
            existed,
            had_backup: self.backups.contains_key(path),
            was_created: self.created.contains(path),
        })
    }

    /// Undo everything done to the checkpointed path since `checkpoint`.
    pub fn revert(&mut self, checkpoint: &Checkpoint) -> GraftResult<()> {
        let path = &checkpoint.path;
        if checkpoint.existed {
            let fresh_backup = match self.backups.get(path) {
                Some(info) if !checkpoint.had_backup => Some(info.clone()),
                _ => None,
            };
            match (fresh_backup, &checkpoint.snapshot) {
                (Some(info), _) => self.restore(&info)?,
                (None, Some(snapshot)) => {
                    let bytes = self.read(snapshot)?;
                    self.with_retry("revert", path, || write_atomic(path, &bytes))?;
                }
                (None, None) => {}
            }
        } else {
            if path.exists() {
                self.with_retry("revert", path, || fs::remove_file(path))?;
            }
            if !checkpoint.was_created {
                self.created.shift_remove(path);
            }
        }
        debug!("Reverted {}", path.display());
        self.commit(checkpoint)
    }

    /// Drop the snapshot of a step that is being kept.
    pub fn commit(&self, checkpoint: &Checkpoint) -> GraftResult<()> {
        if let Some(snapshot) = &checkpoint.snapshot {
            if snapshot.exists() {
                self.with_retry("remove snapshot", snapshot, || fs::remove_file(snapshot))?;
            }
        }
        Ok(())
    }

    /// Remove the now-empty parent directories of `path`, stopping at `stop`.
    pub fn prune_empty_parents(&self, path: &Path, stop: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop || !current.starts_with(stop) {
                break;
            }
            let empty = fs::read_dir(current).is_ok_and(|mut entries| entries.next().is_none());
            if !empty || fs::remove_dir(current).is_err() {
                break;
            }
            debug!("Removed empty directory {}", current.display());
            dir = current.parent();
        }
    }

    /// Remove empty directories under and including `root`, deepest first.
    /// Returns whether `root` itself was removed.
    pub fn remove_empty_dirs(&self, root: &Path) -> GraftResult<bool> {
        if !root.is_dir() {
            return Ok(false);
        }
        let dirs: Vec<PathBuf> = WalkDir::new(root)
            .contents_first(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();
        for dir in dirs {
            let empty = fs::read_dir(&dir)
                .map_err(|e| GraftError::fs("list", &dir, e))?
                .next()
                .is_none();
            if empty {
                self.with_retry("remove directory", &dir, || fs::remove_dir(&dir))?;
            }
        }
        Ok(!root.exists())
    }
}
