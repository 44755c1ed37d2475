//! Crash-safe blob replacement.
//!
//! ```text
//! write  dest.tmp
//! copy   dest        -> dest.backup     (only if dest exists)
//! remove dest
//! rename dest.tmp    -> dest
//! remove dest.backup
//! ```
//!
//! A failure after the backup exists puts the backup back in place. A crash
//! between `remove dest` and `rename` leaves only the backup, which
//! [`load_blob`] promotes on the next read.

use crate::layout::{backup_path_for, temp_path_for};
use crate::{MissingItem, RestoreOutcome, Result, StoreError};
use bytes::Bytes;
use log::{debug, error, warn};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveStage {
    WriteTemp,
    Backup,
    RemoveDestination,
    Promote,
}

fn checkpoint(fault: Option<SaveStage>, stage: SaveStage) -> std::io::Result<()> {
    if fault == Some(stage) {
        return Err(std::io::Error::other(format!("interrupted at {stage:?}")));
    }
    Ok(())
}

/// Atomically replaces `dest` with `bytes`, keeping the previous version
/// until the new one is in place.
///
/// The parent directory must already exist. A room directory that was
/// deleted while a save was in flight is not recreated; the save fails.
pub async fn save_blob(dest: &Path, bytes: &[u8]) -> Result<()> {
    save_blob_with_fault(dest, bytes, None).await
}

async fn save_blob_with_fault(dest: &Path, bytes: &[u8], fault: Option<SaveStage>) -> Result<()> {
    let tmp = temp_path_for(dest);
    let backup = backup_path_for(dest);

    if let Err(err) = write_temp(&tmp, bytes, fault).await {
        discard(&tmp).await;
        return Err(StoreError::io_at(dest, err));
    }

    let had_previous = match fs::metadata(dest).await {
        Ok(meta) => meta.is_file(),
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            discard(&tmp).await;
            return Err(StoreError::io_at(dest, err));
        }
    };

    if had_previous {
        let copied = match checkpoint(fault, SaveStage::Backup) {
            Ok(()) => fs::copy(dest, &backup).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = copied {
            discard(&tmp).await;
            discard(&backup).await;
            return Err(StoreError::io_at(dest, err));
        }
    }

    if let Err(err) = promote(dest, &tmp, had_previous, fault).await {
        discard(&tmp).await;
        let restore = if had_previous {
            restore_from_backup(&backup, dest).await
        } else {
            RestoreOutcome::NoBackup
        };
        match &restore {
            RestoreOutcome::RestoreFailed(reason) => {
                error!("Save of {} failed ({err}); {reason}", dest.display());
            }
            other => warn!("Save of {} failed ({err}); {other}", dest.display()),
        }
        return Err(StoreError::IoFailure {
            path: dest.to_path_buf(),
            source: err,
            restore,
        });
    }

    if had_previous {
        if let Err(err) = fs::remove_file(&backup).await {
            warn!("Failed to remove backup {}: {err}", backup.display());
        }
    }
    debug!("Saved {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}

async fn write_temp(tmp: &Path, bytes: &[u8], fault: Option<SaveStage>) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    let half = bytes.len() / 2;
    file.write_all(&bytes[..half]).await?;
    checkpoint(fault, SaveStage::WriteTemp)?;
    file.write_all(&bytes[half..]).await?;
    file.sync_all().await?;
    Ok(())
}

async fn promote(
    dest: &Path,
    tmp: &Path,
    had_previous: bool,
    fault: Option<SaveStage>,
) -> std::io::Result<()> {
    if had_previous {
        checkpoint(fault, SaveStage::RemoveDestination)?;
        fs::remove_file(dest).await?;
    }
    checkpoint(fault, SaveStage::Promote)?;
    fs::rename(tmp, dest).await
}

async fn restore_from_backup(backup: &Path, dest: &Path) -> RestoreOutcome {
    match fs::rename(backup, dest).await {
        Ok(()) => RestoreOutcome::Restored,
        Err(err) => RestoreOutcome::RestoreFailed(err.to_string()),
    }
}

async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {err}", path.display());
        }
    }
}

/// Reads a blob, first recovering from a save that was interrupted after
/// the destination had been removed.
pub async fn load_blob(path: &Path, what: MissingItem) -> Result<Bytes> {
    match fs::read(path).await {
        Ok(raw) => Ok(Bytes::from(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let backup = backup_path_for(path);
            if fs::metadata(&backup).await.is_ok() {
                warn!(
                    "Recovering {} from interrupted save backup",
                    path.display()
                );
                match restore_from_backup(&backup, path).await {
                    RestoreOutcome::Restored => {
                        let raw = fs::read(path)
                            .await
                            .map_err(|err| StoreError::io_at(path, err))?;
                        return Ok(Bytes::from(raw));
                    }
                    other => warn!("Recovery of {} failed: {other}", path.display()),
                }
            }
            Err(StoreError::NotFound {
                what,
                path: path.to_path_buf(),
            })
        }
        Err(err) => Err(StoreError::io_at(path, err)),
    }
}
