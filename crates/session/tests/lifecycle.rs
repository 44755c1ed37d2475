use async_trait::async_trait;
use pretty_assertions::assert_eq;
use spatial_model::{Marker, MarkerId, Rgba, Room, Transform, WorldMap, PALETTE};
use spatial_session::sim::{EngineCall, SimulatedEngine};
use spatial_session::{
    EngineEvent, EngineResult, LimitedReason, MappingEngine, MappingStatus, SaveReason,
    SessionConfig, SessionController, SessionError, SessionEvent, SessionState, TrackingQuality,
};
use spatial_store::{
    load_world_map, DeleteOutcome, MissingItem, RoomCatalog, StoreError, StoreLayout,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: TempDir,
    engine: Arc<SimulatedEngine>,
    session: SessionController,
}

/// Simulated engine whose map snapshots take `delay` to arrive.
struct SlowSnapshots {
    inner: Arc<SimulatedEngine>,
    delay: Duration,
}

#[async_trait]
impl MappingEngine for SlowSnapshots {
    async fn reset_session(&self, initial_map: Option<WorldMap>) -> EngineResult<()> {
        self.inner.reset_session(initial_map).await
    }

    async fn pause(&self) {
        self.inner.pause().await;
    }

    async fn add_point(&self, marker: &Marker) {
        self.inner.add_point(marker).await;
    }

    async fn remove_point(&self, id: MarkerId) {
        self.inner.remove_point(id).await;
    }

    async fn placement_pose(&self) -> Option<Transform> {
        self.inner.placement_pose().await
    }

    async fn current_map_snapshot(&self) -> EngineResult<WorldMap> {
        tokio::time::sleep(self.delay).await;
        self.inner.current_map_snapshot().await
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events()
    }
}

async fn harness() -> Harness {
    harness_with_snapshot_delay(Duration::ZERO).await
}

async fn harness_with_snapshot_delay(delay: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path().join("Rooms")).with_bundle_dir(dir.path());
    let catalog = Arc::new(RoomCatalog::open(layout).await.unwrap());
    let engine = Arc::new(SimulatedEngine::new());
    let driver: Arc<dyn MappingEngine> = if delay.is_zero() {
        engine.clone()
    } else {
        Arc::new(SlowSnapshots {
            inner: engine.clone(),
            delay,
        })
    };
    let config = SessionConfig {
        batch_pause: Duration::ZERO,
        failure_reset_delay: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = SessionController::start(driver, catalog, config);
    Harness {
        _dir: dir,
        engine,
        session,
    }
}

async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for feed")
        .expect("feed closed")
        .clone()
}

async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn red_marker_at(x: f32) -> (Transform, f32, Rgba) {
    (Transform::from_translation(x, 0.0, 0.0), 0.05, Rgba::OPAQUE_RED)
}

/// Records `count` markers into a new room and waits for the final save.
async fn record_room(h: &Harness, name: &str, count: usize) -> Room {
    let mut events = h.session.subscribe_events();
    let room = h.session.start_recording(name).await.unwrap();
    for i in 0..count {
        let (pose, radius, color) = red_marker_at(i as f32 * 0.2);
        h.session.add_marker(pose, radius, color).await.unwrap();
    }
    assert!(h.session.stop_recording().await.unwrap());
    let finished = next_event(&mut events, |e| {
        matches!(e, SessionEvent::SaveFinished { reason: SaveReason::Final, .. })
    })
    .await;
    assert_eq!(
        finished,
        SessionEvent::SaveFinished {
            room: room.id,
            reason: SaveReason::Final,
            error: None
        }
    );
    room
}

#[tokio::test]
async fn record_and_reload_restores_the_marker_after_relocalization() {
    let h = harness().await;
    let created = h.session.create_room("Room1").await.unwrap();

    let recording = h.session.start_recording("Room1").await.unwrap();
    assert_eq!(recording.id, created.id);
    assert_eq!(
        h.session.state(),
        SessionState::Recording { room: created.id }
    );

    let placed = h
        .session
        .add_marker(Transform::IDENTITY, 0.05, Rgba::OPAQUE_RED)
        .await
        .unwrap();
    let mut events = h.session.subscribe_events();
    assert!(h.session.stop_recording().await.unwrap());
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.live_markers().is_empty());
    next_event(&mut events, |e| {
        matches!(e, SessionEvent::SaveFinished { reason: SaveReason::Final, error: None, .. })
    })
    .await;

    h.session.load_room(created.id).await.unwrap();
    assert_eq!(h.session.state(), SessionState::Loading { room: created.id });
    h.engine.relocalize();

    let mut live = h.session.live_markers_stream();
    let markers = wait_for(&mut live, |m| !m.is_empty()).await;
    assert_eq!(markers.len(), 1);
    let marker = &markers[0];
    assert_eq!(marker.id(), placed.id());
    assert!((marker.radius() - 0.05).abs() <= 0.001);
    assert!(marker.color().approx_eq(&Rgba::OPAQUE_RED));
    let [x, y, z] = marker.position();
    assert!(x.abs() < 1e-4 && y.abs() < 1e-4 && z.abs() < 1e-4);

    assert_eq!(h.session.state(), SessionState::Viewing { room: created.id });
    assert_eq!(*h.session.loading_progress().borrow(), 1.0);
}

#[tokio::test]
async fn loaded_markers_stay_pending_until_tracking_is_normal() {
    let h = harness().await;
    let room = record_room(&h, "Studio", 3).await;

    let mut events = h.session.subscribe_events();
    h.session.load_room(room.id).await.unwrap();
    let loaded = next_event(&mut events, |e| matches!(e, SessionEvent::MarkersLoaded { .. })).await;
    assert_eq!(
        loaded,
        SessionEvent::MarkersLoaded {
            room: room.id,
            count: 3,
            attached: false
        }
    );

    h.engine.emit_limited(LimitedReason::Relocalizing);
    h.engine
        .emit_tracking(TrackingQuality::NotAvailable, MappingStatus::Extending);
    let mut progress = h.session.loading_progress();
    let value = wait_for(&mut progress, |p| *p >= 0.8).await;
    assert!(value < 1.0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.session.live_markers().is_empty());
    assert_eq!(h.session.state(), SessionState::Loading { room: room.id });
    let adds_after_load = h
        .engine
        .calls()
        .into_iter()
        .skip_while(|c| *c != EngineCall::Reset { with_map: true })
        .filter(|c| matches!(c, EngineCall::AddPoint(_)))
        .count();
    assert_eq!(adds_after_load, 0);

    h.engine.relocalize();
    let mut live = h.session.live_markers_stream();
    assert_eq!(wait_for(&mut live, |m| m.len() == 3).await.len(), 3);
}

#[tokio::test]
async fn rapid_marker_adds_trigger_one_throttled_save_plus_final_save() {
    let h = harness().await;
    let mut events = h.session.subscribe_events();
    h.session.start_recording("Hall").await.unwrap();
    for i in 0..10 {
        let (pose, radius, color) = red_marker_at(i as f32 * 0.1);
        h.session.add_marker(pose, radius, color).await.unwrap();
    }
    assert!(h.session.stop_recording().await.unwrap());

    let mut started = Vec::new();
    let mut finished = 0;
    timeout(WAIT, async {
        while finished < 2 {
            match events.recv().await.unwrap() {
                SessionEvent::SaveStarted { reason, .. } => started.push(reason),
                SessionEvent::SaveFinished { error, .. } => {
                    assert_eq!(error, None);
                    finished += 1;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("saves finished");

    assert_eq!(started, vec![SaveReason::MarkerChange, SaveReason::Final]);
    assert_eq!(h.engine.count(|c| *c == EngineCall::Snapshot), 2);
}

#[tokio::test]
async fn marker_operations_outside_recording_are_rejected_with_status() {
    let h = harness().await;
    let mut status = h.session.status();

    let err = h
        .session
        .add_marker(Transform::IDENTITY, 0.05, Rgba::OPAQUE_RED)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Idle,
            ..
        }
    ));
    let message = wait_for(&mut status, |s| s.contains("while recording")).await;
    assert!(message.contains("idle"));

    assert!(matches!(
        h.session.clear_all().await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(!h.session.stop_recording().await.unwrap());
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn recording_into_a_room_with_a_saved_map_is_name_taken() {
    let h = harness().await;
    record_room(&h, "Garage", 1).await;

    let err = h.session.start_recording("Garage").await.unwrap_err();
    assert!(matches!(err, SessionError::Store(StoreError::NameTaken(_))));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.session.catalog().len(), 1);
}

#[tokio::test]
async fn failed_loads_return_to_idle_with_distinct_causes() {
    let h = harness().await;
    let room = h.session.create_room("Never recorded").await.unwrap();

    let err = h.session.load_room(room.id).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::NotFound {
            what: MissingItem::SpatialMap,
            ..
        })
    ));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.status().borrow().starts_with("Could not load"));

    tokio::fs::remove_dir_all(room.directory_in(h.session.catalog().root()))
        .await
        .unwrap();
    let err = h.session.load_room(room.id).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::NotFound {
            what: MissingItem::RoomDirectory,
            ..
        })
    ));

    let unknown = spatial_model::RoomId::new();
    assert!(matches!(
        h.session.load_room(unknown).await,
        Err(SessionError::UnknownRoom(id)) if id == unknown
    ));
}

#[tokio::test]
async fn interruption_end_reruns_relocalization_against_the_stored_map() {
    let h = harness().await;
    let room = record_room(&h, "Lobby", 2).await;
    h.session.load_room(room.id).await.unwrap();
    h.engine.relocalize();
    let mut live = h.session.live_markers_stream();
    wait_for(&mut live, |m| m.len() == 2).await;

    h.engine.emit(EngineEvent::InterruptionBegan);
    h.engine.emit(EngineEvent::InterruptionEnded);
    let mut status = h.session.status();
    wait_for(&mut status, |s| s == "Relocalizing after interruption").await;

    assert_eq!(h.engine.count(|c| *c == EngineCall::Reset { with_map: true }), 2);
    assert_eq!(h.session.state(), SessionState::Viewing { room: room.id });
    assert_eq!(h.session.live_markers().len(), 2);
}

#[tokio::test]
async fn session_failure_schedules_a_reset_without_changing_state() {
    let h = harness().await;
    let room = record_room(&h, "Cellar", 0).await;
    h.session.load_room(room.id).await.unwrap();

    h.engine
        .emit(EngineEvent::SessionFailed("world tracking failed".into()));
    let mut status = h.session.status();
    wait_for(&mut status, |s| s == "Mapping session restarted").await;

    assert_eq!(h.engine.count(|c| *c == EngineCall::Reset { with_map: true }), 2);
    assert_eq!(h.session.state(), SessionState::Loading { room: room.id });
}

#[tokio::test]
async fn place_marker_uses_palette_and_clamps_radius() {
    let h = harness().await;
    h.session.start_recording("Deck").await.unwrap();

    let marker = h.session.place_marker(9, Some(3.0)).await.unwrap();
    assert_eq!(marker.color(), PALETTE[1]);
    assert_eq!(marker.radius(), 1.0);

    let marker = h.session.place_marker(0, None).await.unwrap();
    assert_eq!(marker.radius(), 0.025);

    h.engine.set_placement_pose(None);
    assert!(matches!(
        h.session.place_marker(0, None).await,
        Err(SessionError::InvalidPose(_))
    ));
    assert_eq!(h.session.live_markers().len(), 2);

    assert_eq!(h.session.clear_all().await.unwrap(), 2);
    assert!(h.session.live_markers().is_empty());
}

#[tokio::test]
async fn remove_marker_only_touches_known_ids() {
    let h = harness().await;
    h.session.start_recording("Porch").await.unwrap();
    let marker = h
        .session
        .add_marker(Transform::IDENTITY, 0.05, Rgba::OPAQUE_RED)
        .await
        .unwrap();

    assert!(!h
        .session
        .remove_marker(spatial_model::MarkerId::new())
        .await
        .unwrap());
    assert!(h.session.remove_marker(marker.id()).await.unwrap());
    assert!(h.session.live_markers().is_empty());
    assert_eq!(
        h.engine.count(|c| *c == EngineCall::RemovePoint(marker.id())),
        1
    );
}

#[tokio::test]
async fn active_room_cannot_be_deleted_but_others_can() {
    let h = harness().await;
    let other = h.session.create_room("Spare").await.unwrap();
    let active = h.session.start_recording("Busy").await.unwrap();

    assert!(matches!(
        h.session.delete_room(active.id).await,
        Err(SessionError::InvalidState { .. })
    ));
    assert_eq!(
        h.session.delete_room(other.id).await.unwrap(),
        DeleteOutcome::Removed
    );
    let rooms = h.session.room_list().borrow().clone();
    assert_eq!(rooms, vec![active]);
}

#[tokio::test]
async fn return_to_idle_from_viewing_clears_the_scene() {
    let h = harness().await;
    let room = record_room(&h, "Atrium", 2).await;
    h.session.load_room(room.id).await.unwrap();
    h.engine.relocalize();
    let mut live = h.session.live_markers_stream();
    wait_for(&mut live, |m| m.len() == 2).await;

    h.session.return_to_idle().await.unwrap();

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.live_markers().is_empty());
    assert_eq!(*h.session.loading_progress().borrow(), 0.0);
    let calls = h.engine.calls();
    let last_reset = calls
        .iter()
        .rposition(|c| *c == EngineCall::Reset { with_map: true })
        .unwrap();
    assert!(calls[last_reset..].contains(&EngineCall::Pause));
}

#[tokio::test]
async fn final_save_keeps_the_recorded_map_when_the_next_room_starts_at_once() {
    let h = harness_with_snapshot_delay(Duration::from_millis(100)).await;
    let mut events = h.session.subscribe_events();

    let first = h.session.start_recording("A").await.unwrap();
    let (pose, radius, color) = red_marker_at(0.0);
    let placed = h.session.add_marker(pose, radius, color).await.unwrap();
    assert!(h.session.stop_recording().await.unwrap());
    let second = h.session.start_recording("B").await.unwrap();

    let finished = next_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::SaveFinished { room, reason: SaveReason::Final, .. } if *room == first.id
        )
    })
    .await;
    assert!(matches!(finished, SessionEvent::SaveFinished { error: None, .. }));

    let saved = load_world_map(h.session.catalog().root(), &first)
        .await
        .unwrap();
    let ids: Vec<MarkerId> = saved.markers().map(Marker::id).collect();
    assert_eq!(ids, vec![placed.id()]);
    assert_eq!(
        h.session.state(),
        SessionState::Recording { room: second.id }
    );
}

#[tokio::test]
async fn save_into_a_room_deleted_mid_recording_reports_the_error() {
    let h = harness().await;
    let mut events = h.session.subscribe_events();
    let room = h.session.start_recording("Cellar").await.unwrap();
    let room_dir = room.directory_in(h.session.catalog().root());
    assert!(room_dir.is_dir());

    let outcome = h.session.catalog().delete(room.id).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Removed);
    assert!(h.session.stop_recording().await.unwrap());

    let finished = next_event(&mut events, |e| {
        matches!(e, SessionEvent::SaveFinished { reason: SaveReason::Final, .. })
    })
    .await;
    let SessionEvent::SaveFinished { room: saved, error, .. } = finished else {
        unreachable!()
    };
    assert_eq!(saved, room.id);
    assert!(error.is_some());
    assert!(!room_dir.exists());
    assert!(h.session.catalog().is_empty());

    let status = wait_for(&mut h.session.status(), |s| s.contains("failed")).await;
    assert!(status.starts_with("Saving"));
}

#[tokio::test]
async fn failed_save_while_recording_is_reported_and_recording_continues() {
    let h = harness().await;
    let mut events = h.session.subscribe_events();
    let mut status = h.session.status();
    let room = h.session.start_recording("Den").await.unwrap();
    h.engine.fail_snapshots(Some("tracking lost"));

    let (pose, radius, color) = red_marker_at(0.0);
    h.session.add_marker(pose, radius, color).await.unwrap();
    let finished = next_event(&mut events, |e| matches!(e, SessionEvent::SaveFinished { .. })).await;
    let SessionEvent::SaveFinished { room: saved, reason, error } = finished else {
        unreachable!()
    };
    assert_eq!(saved, room.id);
    assert_eq!(reason, SaveReason::MarkerChange);
    assert!(error.unwrap().contains("tracking lost"));

    let message = wait_for(&mut status, |s| s.starts_with("Saving")).await;
    assert!(message.contains("failed"), "{message}");
    assert_eq!(h.session.state(), SessionState::Recording { room: room.id });

    let (pose, radius, color) = red_marker_at(0.3);
    h.session.add_marker(pose, radius, color).await.unwrap();
    assert_eq!(h.session.live_markers().len(), 2);

    h.engine.fail_snapshots(None);
    assert!(h.session.stop_recording().await.unwrap());
    let finished = next_event(&mut events, |e| {
        matches!(e, SessionEvent::SaveFinished { reason: SaveReason::Final, .. })
    })
    .await;
    assert!(matches!(finished, SessionEvent::SaveFinished { error: None, .. }));
}

#[tokio::test]
async fn dropping_the_last_handle_stops_the_actor() {
    let Harness {
        _dir: _dir,
        engine: _engine,
        session,
    } = harness().await;
    let catalog = session.catalog().clone();

    let extra = session.clone();
    drop(extra);
    session.start_recording("Loft").await.unwrap();
    assert!(Arc::strong_count(&catalog) > 1);

    drop(session);
    timeout(WAIT, async {
        while Arc::strong_count(&catalog) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("actor and save worker released the catalog");
}
