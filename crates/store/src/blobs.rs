//! Per-room blob I/O: spatial map and marker list.

use crate::atomic::{load_blob, save_blob};
use crate::{MissingItem, Result, StoreError};
use log::{debug, info, warn};
use spatial_codec::{
    decode_world_map, encode_marker_list, encode_world_map, optimize_world_map, DecodeReport,
    MarkerListDecoder, MarkerOutcome, OptimizeStats,
};
use spatial_model::{Marker, Room, WorldMap};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MARKER_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(10);

/// Optimizes and persists a room's spatial map.
pub async fn save_world_map(root: &Path, room: &Room, map: &WorldMap) -> Result<OptimizeStats> {
    let path = room.spatial_map_in(root);
    let (optimized, stats) = optimize_world_map(map).map_err(|source| StoreError::DecodeFailure {
        path: path.clone(),
        source,
    })?;
    save_blob(&path, &encode_world_map(&optimized)).await?;
    info!(
        "Saved spatial map for {:?} ({} bytes, {} markers)",
        room.name, stats.bytes_after, stats.markers_kept
    );
    Ok(stats)
}

pub async fn save_marker_list(root: &Path, room: &Room, markers: &[Marker]) -> Result<()> {
    let path = room.marker_list_in(root);
    save_blob(&path, &encode_marker_list(markers)).await?;
    info!("Saved {} markers for {:?}", markers.len(), room.name);
    Ok(())
}

/// Loads a room's spatial map. A missing directory, a missing file and an
/// undecodable blob are distinct errors.
pub async fn load_world_map(root: &Path, room: &Room) -> Result<WorldMap> {
    let dir = room.directory_in(root);
    if tokio::fs::metadata(&dir).await.is_err() {
        return Err(StoreError::NotFound {
            what: MissingItem::RoomDirectory,
            path: dir,
        });
    }
    let path = room.spatial_map_in(root);
    let raw = load_blob(&path, MissingItem::SpatialMap).await?;
    decode_world_map(raw).map_err(|source| StoreError::DecodeFailure { path, source })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerLoadOptions {
    pub batch_size: usize,
    pub pause: Duration,
}

impl Default for MarkerLoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_MARKER_BATCH_SIZE,
            pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

/// Progress between marker batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub loaded: usize,
    pub total: usize,
}

impl BatchProgress {
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.loaded as f32 / self.total as f32
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedMarkers {
    pub markers: Vec<Marker>,
    pub report: DecodeReport,
    /// No marker list on disk; treated as an empty room.
    pub missing: bool,
}

/// Loads a room's marker list in bounded batches, pausing between batches
/// and reporting progress after each one.
pub async fn load_marker_list<F>(
    root: &Path,
    room: &Room,
    options: MarkerLoadOptions,
    mut on_batch: F,
) -> Result<LoadedMarkers>
where
    F: FnMut(BatchProgress),
{
    let path = room.marker_list_in(root);
    let raw = match load_blob(&path, MissingItem::MarkerList).await {
        Ok(raw) => raw,
        Err(StoreError::NotFound { .. }) => {
            debug!("No marker list for {:?}; starting empty", room.name);
            on_batch(BatchProgress { loaded: 0, total: 0 });
            return Ok(LoadedMarkers {
                missing: true,
                ..LoadedMarkers::default()
            });
        }
        Err(err) => return Err(err),
    };

    let decode_err = |source| StoreError::DecodeFailure {
        path: path.clone(),
        source,
    };
    let mut decoder = MarkerListDecoder::new(raw).map_err(decode_err)?;
    let total = decoder.total();
    let mut loaded = LoadedMarkers {
        markers: Vec::with_capacity(total),
        ..LoadedMarkers::default()
    };

    while !decoder.is_finished() {
        for outcome in decoder.next_batch(options.batch_size).map_err(decode_err)? {
            loaded.report.absorb(&outcome);
            if let MarkerOutcome::Decoded { marker, .. } = outcome {
                loaded.markers.push(marker);
            }
        }
        on_batch(BatchProgress {
            loaded: decoder.consumed(),
            total,
        });
        if decoder.is_finished() {
            break;
        }
        if options.pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(options.pause).await;
        }
    }

    if !loaded.report.is_clean() {
        warn!(
            "Marker list for {:?}: {} fields defaulted, {} records skipped",
            room.name,
            loaded.report.defaulted_fields,
            loaded.report.skipped.len()
        );
    }
    Ok(loaded)
}
