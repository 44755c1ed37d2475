use crate::output::{
    render_inspect, render_room_table, BlobStatus, InspectReport, MapSummary, MarkerListSummary,
};
use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use log::info;
use spatial_codec::{decode_marker_list, decode_world_map};
use spatial_model::{AnchorRecord, Room, RoomId, Transform};
use spatial_session::sim::SimulatedEngine;
use spatial_session::{
    LimitedReason, SaveReason, SessionConfig, SessionController, SessionEvent, SessionState,
};
use spatial_store::{load_blob, DeleteOutcome, MissingItem, RoomCatalog, StoreError, StoreLayout};
use std::sync::Arc;
use std::time::Duration;

const SIMULATION_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn open_catalog(layout: StoreLayout) -> Result<RoomCatalog> {
    let root = layout.root().to_path_buf();
    RoomCatalog::open(layout)
        .await
        .with_context(|| format!("Failed to open rooms at {}", root.display()))
}

/// Accepts a room id or an exact room name.
fn resolve_room(catalog: &RoomCatalog, key: &str) -> Result<Room> {
    if let Ok(id) = key.parse::<RoomId>() {
        if let Some(room) = catalog.get(id) {
            return Ok(room);
        }
    }
    catalog
        .find_by_name(key)
        .ok_or_else(|| anyhow!("No room with id or name {key:?}"))
}

pub fn list(catalog: &RoomCatalog, json: bool) -> Result<()> {
    let rooms = catalog.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&rooms)?);
    } else {
        print!("{}", render_room_table(&rooms));
    }
    Ok(())
}

pub async fn create(catalog: &RoomCatalog, name: &str) -> Result<()> {
    let room = catalog.create(name).await?;
    println!("{}", room.id);
    Ok(())
}

pub async fn rename(catalog: &RoomCatalog, key: &str, new_name: &str) -> Result<()> {
    let room = resolve_room(catalog, key)?;
    let renamed = catalog.rename(room.id, new_name).await?;
    println!("{} {:?}", renamed.id, renamed.name);
    Ok(())
}

pub async fn delete(catalog: &RoomCatalog, key: &str) -> Result<()> {
    let room = resolve_room(catalog, key)?;
    match catalog.delete(room.id).await? {
        DeleteOutcome::Removed => println!("Deleted {:?}", room.name),
        DeleteOutcome::RemovedFilesRemain(reason) => {
            println!("Deleted {:?}; files may remain: {reason}", room.name);
        }
        DeleteOutcome::NotInCatalog => println!("Nothing to delete"),
    }
    Ok(())
}

pub async fn bundle(catalog: &RoomCatalog, key: &str) -> Result<()> {
    let room = resolve_room(catalog, key)?;
    let path = catalog
        .share_bundle(room.id)
        .await
        .with_context(|| format!("Failed to bundle {:?}", room.name))?;
    println!("{}", path.display());
    Ok(())
}

pub async fn inspect(catalog: &RoomCatalog, key: &str, json: bool) -> Result<()> {
    let room = resolve_room(catalog, key)?;
    let root = catalog.root();

    let spatial_map = match load_blob(&room.spatial_map_in(root), MissingItem::SpatialMap).await {
        Ok(raw) => {
            let bytes = raw.len();
            match decode_world_map(raw) {
                Ok(map) => BlobStatus::Ok(MapSummary {
                    bytes,
                    feature_bytes: map.features.len(),
                    markers: map.markers().count(),
                    planes: map.planes().count(),
                    other_anchors: map
                        .anchors
                        .iter()
                        .filter(|a| matches!(a, AnchorRecord::Other { .. }))
                        .count(),
                }),
                Err(err) => BlobStatus::Error {
                    message: err.to_string(),
                },
            }
        }
        Err(StoreError::NotFound { .. }) => BlobStatus::Missing,
        Err(err) => BlobStatus::Error {
            message: err.to_string(),
        },
    };

    let marker_list = match load_blob(&room.marker_list_in(root), MissingItem::MarkerList).await {
        Ok(raw) => {
            let bytes = raw.len();
            match decode_marker_list(raw) {
                Ok((markers, report)) => BlobStatus::Ok(MarkerListSummary {
                    bytes,
                    markers: markers.len(),
                    defaulted_fields: report.defaulted_fields,
                    skipped: report.skipped,
                }),
                Err(err) => BlobStatus::Error {
                    message: err.to_string(),
                },
            }
        }
        Err(StoreError::NotFound { .. }) => BlobStatus::Missing,
        Err(err) => BlobStatus::Error {
            message: err.to_string(),
        },
    };

    let report = InspectReport {
        room,
        spatial_map,
        marker_list,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_inspect(&report));
    }
    Ok(())
}

/// Records `markers` markers into `name`, then reloads the room and waits
/// for them to reappear after relocalization.
pub async fn simulate(
    catalog: RoomCatalog,
    config: SessionConfig,
    name: &str,
    markers: usize,
) -> Result<()> {
    let engine = Arc::new(SimulatedEngine::new());
    let session = SessionController::start(engine.clone(), Arc::new(catalog), config);
    let mut events = session.subscribe_events();

    let room = session.start_recording(name).await?;
    for i in 0..markers {
        engine.set_placement_pose(Some(Transform::from_translation(
            i as f32 * 0.25,
            0.0,
            -1.0,
        )));
        session.place_marker(i, None).await?;
    }
    session.stop_recording().await?;

    tokio::time::timeout(SIMULATION_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SaveFinished {
                    room: saved,
                    reason: SaveReason::Final,
                    error,
                }) if saved == room.id => {
                    return match error {
                        None => Ok(()),
                        Some(err) => Err(anyhow!("Final save failed: {err}")),
                    };
                }
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(err) => return Err(anyhow!("Session event stream ended: {err}")),
            }
        }
    })
    .await
    .context("Timed out waiting for the final save")??;
    info!("Recorded {markers} markers into {:?}", room.name);

    session.load_room(room.id).await?;
    engine.emit_limited(LimitedReason::Relocalizing);
    engine.relocalize();

    let mut state = session.state_stream();
    let mut live = session.live_markers_stream();
    tokio::time::timeout(SIMULATION_TIMEOUT, async {
        state
            .wait_for(|s| matches!(s, SessionState::Viewing { .. }))
            .await
            .map(|_| ())?;
        live.wait_for(|m| m.len() == markers).await.map(|_| ())
    })
    .await
    .context("Timed out waiting for relocalization")?
    .context("Session stopped during relocalization")?;

    let restored = session.live_markers().len();
    session.return_to_idle().await?;
    if restored != markers {
        bail!("Expected {markers} markers after reload, found {restored}");
    }
    println!(
        "Recorded and reloaded {:?}: {restored} markers restored after relocalization",
        room.name
    );
    Ok(())
}
