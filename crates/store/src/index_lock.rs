use crate::{Result, StoreError};
use fs2::FileExt;
use log::debug;
use std::path::Path;
use std::time::Instant;

/// Cross-process exclusive lock on the room index. Released on drop.
pub(crate) struct IndexWriteLock {
    file: std::fs::File,
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_index_write_lock(path: &Path) -> Result<IndexWriteLock> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StoreError::io_at(parent, err))?;
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::Other(format!("open index lock {}: {err}", path.display())))?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            StoreError::Other(format!("acquire index lock {}: {err}", path.display()))
        })?;
        let waited = start.elapsed();
        if waited.as_millis() > 0 {
            debug!("Waited {}ms for index lock", waited.as_millis());
        }

        Ok(IndexWriteLock { file })
    })
    .await
    .map_err(|err| StoreError::Other(format!("join index lock task: {err}")))?
}
