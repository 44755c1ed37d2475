use crate::bundle::write_bundle;
use crate::index_lock::acquire_index_write_lock;
use crate::layout::{room_dir_name, StoreLayout};
use crate::{Result, StoreError};
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use spatial_model::{Room, RoomId};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};

/// Index entry that was not loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// What happened while reading the index at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogLoadReport {
    pub index_missing: bool,
    pub index_error: Option<String>,
    pub skipped: Vec<SkippedEntry>,
}

impl CatalogLoadReport {
    /// Startup status line, if anything needs the user's attention.
    #[must_use]
    pub fn status_message(&self) -> Option<String> {
        if let Some(err) = &self.index_error {
            return Some(format!("Room index unreadable, starting empty: {err}"));
        }
        match self.skipped.len() {
            0 => None,
            1 => Some(format!(
                "Skipped room {:?}: {}",
                self.skipped[0].name, self.skipped[0].reason
            )),
            n => Some(format!("Skipped {n} rooms with missing or invalid data")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// Entry removed from the catalog but the directory could not be deleted.
    RemovedFilesRemain(String),
    /// Nothing to do; the index was not touched.
    NotInCatalog,
}

/// Durable, ordered index of rooms.
///
/// Reads are served from an in-memory snapshot. Every mutation rewrites the
/// whole index atomically while holding both an in-process mutex and the
/// cross-process `rooms.lock`, then publishes one notification.
pub struct RoomCatalog {
    layout: StoreLayout,
    rooms: watch::Sender<Vec<Room>>,
    write_lock: Mutex<()>,
    load_report: CatalogLoadReport,
}

impl RoomCatalog {
    pub async fn open(layout: StoreLayout) -> Result<Self> {
        let root = layout.root().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| StoreError::io_at(&root, err))?;

        let (rooms, load_report) = read_index(&layout).await;
        info!(
            "Room catalog at {} holds {} rooms",
            root.display(),
            rooms.len()
        );
        if let Some(message) = load_report.status_message() {
            warn!("{message}");
        }

        let (sender, _) = watch::channel(rooms);
        Ok(Self {
            layout,
            rooms: sender,
            write_lock: Mutex::new(()),
            load_report,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    #[must_use]
    pub fn load_report(&self) -> &CatalogLoadReport {
        &self.load_report
    }

    #[must_use]
    pub fn list(&self) -> Vec<Room> {
        self.rooms.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, id: RoomId) -> Option<Room> {
        self.rooms.borrow().iter().find(|r| r.id == id).cloned()
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Room> {
        self.rooms.borrow().iter().find(|r| r.name == name).cloned()
    }

    /// Feed of the room list; receives one update per mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms.subscribe()
    }

    /// Whether the room's spatial map has been written at least once.
    pub async fn has_spatial_map(&self, room: &Room) -> bool {
        tokio::fs::metadata(room.spatial_map_in(self.root()))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Registers a new room and creates its (empty) directory. Blobs are
    /// written on first save.
    pub async fn create(&self, name: &str) -> Result<Room> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock().await;

        let current = self.list();
        if current.iter().any(|r| r.name == name) {
            return Err(StoreError::NameTaken(name));
        }

        let dir_name = self.allocate_dir_name(&name, &current).await;
        let dir = self.root().join(&dir_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| StoreError::io_at(&dir, err))?;

        let room = Room::new(name, &dir_name);
        let mut next = current;
        next.push(room.clone());
        if let Err(err) = self.persist(&next).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Failed to roll back {}: {cleanup}", dir.display());
            }
            return Err(err);
        }

        self.rooms.send_replace(next);
        info!("Created room {:?} in {}", room.name, dir.display());
        Ok(room)
    }

    /// Renames a room in place; its directory keeps the original name.
    pub async fn rename(&self, id: RoomId, new_name: &str) -> Result<Room> {
        let new_name = validate_name(new_name)?;
        let _guard = self.write_lock.lock().await;

        let mut next = self.list();
        if next.iter().any(|r| r.name == new_name && r.id != id) {
            return Err(StoreError::NameTaken(new_name));
        }
        let entry = next
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::UnknownRoom(id))?;
        if entry.name == new_name {
            return Ok(entry.clone());
        }
        let old_name = std::mem::replace(&mut entry.name, new_name);
        let renamed = entry.clone();

        self.persist(&next).await?;
        self.rooms.send_replace(next);
        info!("Renamed room {old_name:?} to {:?}", renamed.name);
        Ok(renamed)
    }

    /// Removes a room and its directory.
    ///
    /// The catalog entry is dropped even when the directory cannot be
    /// removed; an unknown id is a no-op.
    pub async fn delete(&self, id: RoomId) -> Result<DeleteOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.list();
        let Some(position) = next.iter().position(|r| r.id == id) else {
            debug!("Delete of unknown room {id}; nothing to do");
            return Ok(DeleteOutcome::NotInCatalog);
        };
        let room = next.remove(position);

        let outcome = if room.has_consistent_layout() {
            let dir = room.directory_in(self.root());
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => DeleteOutcome::Removed,
                Err(err) if err.kind() == ErrorKind::NotFound => DeleteOutcome::Removed,
                Err(err) => {
                    warn!("Failed to remove {}: {err}", dir.display());
                    DeleteOutcome::RemovedFilesRemain(err.to_string())
                }
            }
        } else {
            warn!(
                "Room {:?} has an inconsistent layout; leaving its files in place",
                room.name
            );
            DeleteOutcome::RemovedFilesRemain("blob paths do not share a room directory".into())
        };

        self.rooms.send_replace(next.clone());
        self.persist(&next).await?;
        info!("Deleted room {:?}", room.name);
        Ok(outcome)
    }

    /// Packages both blobs and a README into a fresh bundle directory.
    pub async fn share_bundle(&self, id: RoomId) -> Result<PathBuf> {
        let room = self.get(id).ok_or(StoreError::UnknownRoom(id))?;
        write_bundle(&self.layout, &room).await
    }

    async fn allocate_dir_name(&self, name: &str, current: &[Room]) -> String {
        let base = room_dir_name(name);
        let taken: HashSet<PathBuf> = current.iter().map(|r| r.directory().to_path_buf()).collect();
        let mut candidate = base.clone();
        let mut suffix = 2;
        loop {
            let in_index = taken.contains(Path::new(&candidate));
            let on_disk = tokio::fs::symlink_metadata(self.root().join(&candidate))
                .await
                .is_ok();
            if !in_index && !on_disk {
                return candidate;
            }
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
    }

    async fn persist(&self, rooms: &[Room]) -> Result<()> {
        let _lock = acquire_index_write_lock(&self.layout.index_lock_path()).await?;
        let path = self.layout.index_path();
        let bytes = serde_json::to_vec_pretty(rooms)?;
        let tmp = path.with_extension("json.tmp");
        if let Err(err) = write_synced(&tmp, &bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {cleanup}", tmp.display());
                }
            }
            return Err(StoreError::io_at(&tmp, err));
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| StoreError::io_at(&path, err))?;
        debug!("Persisted room index with {} entries", rooms.len());
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidName("name is empty".into()));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(
            "name contains control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}

async fn read_index(layout: &StoreLayout) -> (Vec<Room>, CatalogLoadReport) {
    let mut report = CatalogLoadReport::default();
    let path = layout.index_path();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            report.index_missing = true;
            return (Vec::new(), report);
        }
        Err(err) => {
            report.index_error = Some(err.to_string());
            return (Vec::new(), report);
        }
    };

    let entries: Vec<JsonValue> = match serde_json::from_slice(&bytes) {
        Ok(entries) => entries,
        Err(err) => {
            report.index_error = Some(err.to_string());
            return (Vec::new(), report);
        }
    };

    let mut rooms: Vec<Room> = Vec::with_capacity(entries.len());
    for entry in entries {
        let label = entry
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        let mut skip = |reason: String| {
            warn!("Skipping room index entry {label:?}: {reason}");
            report.skipped.push(SkippedEntry {
                name: label.clone(),
                reason,
            });
        };

        let room: Room = match serde_json::from_value(entry) {
            Ok(room) => room,
            Err(err) => {
                skip(format!("unreadable entry: {err}"));
                continue;
            }
        };
        if !room.has_consistent_layout() {
            skip("blob paths do not share a room directory".into());
            continue;
        }
        if rooms.iter().any(|r| r.id == room.id || r.name == room.name) {
            skip("duplicate entry".into());
            continue;
        }
        let dir = room.directory_in(layout.root());
        if !tokio::fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            skip(format!("directory {} is missing", dir.display()));
            continue;
        }
        rooms.push(room);
    }
    (rooms, report)
}
