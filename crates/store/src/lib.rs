//! # Spatial Store
//!
//! Durable storage for rooms.
//!
//! ```text
//! Rooms/
//!   rooms.json            RoomCatalog index (whole-file atomic rewrite)
//!   rooms.lock            cross-process index write lock
//!   <room>/
//!     worldMap.bin        optimized spatial map
//!     anchors.bin         marker list
//!     *.backup.bin        present only while a save is in flight
//! ```
//!
//! Blob writes go through [`save_blob`], which keeps the previous version
//! as a backup until the new one is in place and restores it on failure.

mod atomic;
mod blobs;
mod bundle;
mod catalog;
mod error;
mod index_lock;
mod layout;

pub use atomic::{load_blob, save_blob};
pub use blobs::{
    load_marker_list, load_world_map, save_marker_list, save_world_map, BatchProgress,
    LoadedMarkers, MarkerLoadOptions, DEFAULT_BATCH_PAUSE, DEFAULT_MARKER_BATCH_SIZE,
};
pub use catalog::{CatalogLoadReport, DeleteOutcome, RoomCatalog, SkippedEntry};
pub use error::{MissingItem, RestoreOutcome, Result, StoreError};
pub use layout::{
    backup_path_for, room_dir_name, temp_path_for, StoreLayout, BUNDLE_DIR_ENV,
    BUNDLE_EXTENSION, BUNDLE_README_FILE_NAME, INDEX_FILE_NAME, INDEX_LOCK_FILE_NAME,
    ROOMS_DIR_ENV, ROOMS_DIR_NAME,
};
