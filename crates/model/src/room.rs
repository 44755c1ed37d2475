use crate::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SPATIAL_MAP_FILE_NAME: &str = "worldMap.bin";
pub const MARKER_LIST_FILE_NAME: &str = "anchors.bin";

/// Catalog entry for one persisted room.
///
/// Blob paths are relative to the rooms root and always share one parent
/// directory, which is the unit of deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creation_date: DateTime<Utc>,
    pub spatial_map_path: PathBuf,
    pub marker_list_path: PathBuf,
}

impl Room {
    /// New record whose blobs live under `dir_name` (relative to the rooms root).
    #[must_use]
    pub fn new(name: impl Into<String>, dir_name: &str) -> Self {
        let dir = PathBuf::from(dir_name);
        Self {
            id: RoomId::new(),
            name: name.into(),
            creation_date: Utc::now(),
            spatial_map_path: dir.join(SPATIAL_MAP_FILE_NAME),
            marker_list_path: dir.join(MARKER_LIST_FILE_NAME),
        }
    }

    /// Room directory relative to the rooms root.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.spatial_map_path.parent().unwrap_or(Path::new(""))
    }

    #[must_use]
    pub fn directory_in(&self, root: &Path) -> PathBuf {
        root.join(self.directory())
    }

    #[must_use]
    pub fn spatial_map_in(&self, root: &Path) -> PathBuf {
        root.join(&self.spatial_map_path)
    }

    #[must_use]
    pub fn marker_list_in(&self, root: &Path) -> PathBuf {
        root.join(&self.marker_list_path)
    }

    /// Both blobs must share the room directory, and that directory must be a
    /// single plain component below the root.
    #[must_use]
    pub fn has_consistent_layout(&self) -> bool {
        let dir = self.directory();
        let single_component = dir.components().count() == 1
            && matches!(
                dir.components().next(),
                Some(std::path::Component::Normal(_))
            );
        single_component && self.marker_list_path.parent() == Some(dir)
    }
}
