use crate::engine::{EngineEvent, MappingEngine, MappingStatus, TrackingQuality};
use crate::state::progress;
use crate::throttle::SaveThrottle;
use crate::{Result, SaveReason, SessionConfig, SessionError, SessionEvent, SessionState};
use log::{debug, error, info, warn};
use spatial_model::{Marker, MarkerId, Rgba, Room, RoomId, Transform, WorldMap};
use spatial_store::{
    load_marker_list, load_world_map, save_marker_list, save_world_map, DeleteOutcome,
    LoadedMarkers, RoomCatalog, StoreError,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};

/// Handle to the session actor, which owns the mapping engine, the live
/// marker collection and the current room.
///
/// Intents are queued and applied one at a time. State is observed through
/// the watch feeds and [`SessionController::subscribe_events`].
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    command_tx: mpsc::Sender<Command>,
    feeds: Arc<Feeds>,
}

/// Publishing side shared with the actor. It holds no command sender, so the
/// actor never keeps itself alive.
struct Feeds {
    catalog: Arc<RoomCatalog>,
    state_tx: watch::Sender<SessionState>,
    markers_tx: watch::Sender<Vec<Marker>>,
    progress_tx: watch::Sender<f32>,
    status_tx: watch::Sender<String>,
    event_tx: broadcast::Sender<SessionEvent>,
}

enum Command {
    StartRecording {
        name: String,
        reply: oneshot::Sender<Result<Room>>,
    },
    StopRecording {
        reply: oneshot::Sender<bool>,
    },
    LoadRoom {
        id: RoomId,
        reply: oneshot::Sender<Result<()>>,
    },
    ReturnToIdle {
        reply: oneshot::Sender<()>,
    },
    DeleteRoom {
        id: RoomId,
        reply: oneshot::Sender<Result<DeleteOutcome>>,
    },
    AddMarker {
        transform: Transform,
        radius: f32,
        color: Rgba,
        reply: oneshot::Sender<Result<Marker>>,
    },
    PlaceMarker {
        color_index: usize,
        radius: Option<f32>,
        reply: oneshot::Sender<Result<Marker>>,
    },
    RemoveMarker {
        id: MarkerId,
        reply: oneshot::Sender<Result<bool>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<usize>>,
    },
    Shutdown,
}

/// Results of background work, tagged with the load generation they belong to.
enum Completion {
    MapLoaded {
        generation: u64,
        result: std::result::Result<WorldMap, StoreError>,
    },
    MarkerProgress {
        generation: u64,
        fraction: f32,
    },
    MarkersLoaded {
        generation: u64,
        result: std::result::Result<LoadedMarkers, StoreError>,
    },
    SaveFinished {
        room: RoomId,
        reason: SaveReason,
        error: Option<String>,
    },
}

/// A save whose map snapshot was already taken by the actor.
struct SaveJob {
    room: Room,
    map: WorldMap,
    markers: Vec<Marker>,
    reason: SaveReason,
}

impl SessionController {
    /// Spawns the session actor and its save worker on the current runtime.
    pub fn start(
        engine: Arc<dyn MappingEngine>,
        catalog: Arc<RoomCatalog>,
        config: SessionConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (save_tx, save_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (markers_tx, _) = watch::channel(Vec::new());
        let (progress_tx, _) = watch::channel(0.0);
        let initial_status = catalog
            .load_report()
            .status_message()
            .unwrap_or_else(|| "Ready".to_string());
        let (status_tx, _) = watch::channel(initial_status);
        let (event_tx, _) = broadcast::channel(256);

        let feeds = Arc::new(Feeds {
            catalog: catalog.clone(),
            state_tx,
            markers_tx,
            progress_tx,
            status_tx,
            event_tx,
        });

        spawn_save_worker(catalog.clone(), save_rx, completion_tx.clone());

        let actor = SessionActor {
            engine_events: Some(engine.events()),
            engine,
            catalog,
            config,
            feeds: feeds.clone(),
            phase: Phase::Idle,
            live: Vec::new(),
            generation: 0,
            reset_deadline: None,
            completion_tx,
            save_tx,
        };
        tokio::spawn(actor.run(command_rx, completion_rx));

        Self {
            inner: Arc::new(ControllerInner { command_tx, feeds }),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<RoomCatalog> {
        &self.inner.feeds.catalog
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.feeds.state_tx.borrow()
    }

    #[must_use]
    pub fn state_stream(&self) -> watch::Receiver<SessionState> {
        self.inner.feeds.state_tx.subscribe()
    }

    #[must_use]
    pub fn live_markers(&self) -> Vec<Marker> {
        self.inner.feeds.markers_tx.borrow().clone()
    }

    #[must_use]
    pub fn live_markers_stream(&self) -> watch::Receiver<Vec<Marker>> {
        self.inner.feeds.markers_tx.subscribe()
    }

    #[must_use]
    pub fn loading_progress(&self) -> watch::Receiver<f32> {
        self.inner.feeds.progress_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> watch::Receiver<String> {
        self.inner.feeds.status_tx.subscribe()
    }

    #[must_use]
    pub fn room_list(&self) -> watch::Receiver<Vec<Room>> {
        self.inner.feeds.catalog.subscribe()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.feeds.event_tx.subscribe()
    }

    pub async fn create_room(&self, name: &str) -> Result<Room> {
        Ok(self.inner.feeds.catalog.create(name).await?)
    }

    pub async fn rename_room(&self, id: RoomId, new_name: &str) -> Result<Room> {
        Ok(self.inner.feeds.catalog.rename(id, new_name).await?)
    }

    pub async fn start_recording(&self, name: &str) -> Result<Room> {
        let name = name.to_string();
        self.request(|reply| Command::StartRecording { name, reply })
            .await?
    }

    /// Returns `false` without any effect when not recording.
    pub async fn stop_recording(&self) -> Result<bool> {
        self.request(|reply| Command::StopRecording { reply }).await
    }

    /// Resolves once the spatial map is loaded and the engine has been reset
    /// against it. Relocalization is signalled by the move to `Viewing`.
    pub async fn load_room(&self, id: RoomId) -> Result<()> {
        self.request(|reply| Command::LoadRoom { id, reply }).await?
    }

    pub async fn return_to_idle(&self) -> Result<()> {
        self.request(|reply| Command::ReturnToIdle { reply }).await
    }

    pub async fn delete_room(&self, id: RoomId) -> Result<DeleteOutcome> {
        self.request(|reply| Command::DeleteRoom { id, reply })
            .await?
    }

    pub async fn add_marker(&self, transform: Transform, radius: f32, color: Rgba) -> Result<Marker> {
        self.request(|reply| Command::AddMarker {
            transform,
            radius,
            color,
            reply,
        })
        .await?
    }

    /// Places a marker at the engine's placement pose using a palette color.
    pub async fn place_marker(&self, color_index: usize, radius: Option<f32>) -> Result<Marker> {
        self.request(|reply| Command::PlaceMarker {
            color_index,
            radius,
            reply,
        })
        .await?
    }

    pub async fn remove_marker(&self, id: MarkerId) -> Result<bool> {
        self.request(|reply| Command::RemoveMarker { id, reply })
            .await?
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.request(|reply| Command::ClearAll { reply }).await?
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(Command::Shutdown);
        }
    }
}

enum Phase {
    Idle,
    Recording {
        room: Room,
        markers: Vec<Marker>,
        throttle: SaveThrottle,
    },
    Loading {
        room: Room,
        /// Present once the map has been read and handed to the engine.
        map: Option<WorldMap>,
        /// Markers held back until relocalization.
        pending: Option<Vec<Marker>>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Viewing {
        room: Room,
        map: WorldMap,
        localized: bool,
        pending: Option<Vec<Marker>>,
        markers_loaded: bool,
    },
}

impl Phase {
    fn public(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Recording { room, .. } => SessionState::Recording { room: room.id },
            Self::Loading { room, .. } => SessionState::Loading { room: room.id },
            Self::Viewing { room, .. } => SessionState::Viewing { room: room.id },
        }
    }
}

struct SessionActor {
    engine: Arc<dyn MappingEngine>,
    engine_events: Option<broadcast::Receiver<EngineEvent>>,
    catalog: Arc<RoomCatalog>,
    config: SessionConfig,
    feeds: Arc<Feeds>,
    phase: Phase,
    /// Markers currently attached to the live scene.
    live: Vec<Marker>,
    generation: u64,
    reset_deadline: Option<Instant>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    save_tx: mpsc::UnboundedSender<SaveJob>,
}

async fn next_engine_event(
    rx: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> Option<std::result::Result<EngineEvent, broadcast::error::RecvError>> {
    match rx {
        Some(rx) => Some(rx.recv().await),
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            let reset_deadline = self.reset_deadline;
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(completion) = completion_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                Some(event) = next_engine_event(&mut self.engine_events) => {
                    match event {
                        Ok(event) => self.handle_engine_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Dropped {skipped} mapping engine events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Mapping engine event stream closed");
                            self.engine_events = None;
                        }
                    }
                }
                () = async {
                    if let Some(deadline) = reset_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if reset_deadline.is_some() => {
                    self.reset_deadline = None;
                    self.reset_after_failure().await;
                }
            }
        }
        debug!("Session controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartRecording { name, reply } => {
                let _ = reply.send(self.start_recording(&name).await);
            }
            Command::StopRecording { reply } => {
                let _ = reply.send(self.stop_recording().await);
            }
            Command::LoadRoom { id, reply } => self.load_room(id, reply),
            Command::ReturnToIdle { reply } => {
                self.return_to_idle().await;
                let _ = reply.send(());
            }
            Command::DeleteRoom { id, reply } => {
                let _ = reply.send(self.delete_room(id).await);
            }
            Command::AddMarker {
                transform,
                radius,
                color,
                reply,
            } => {
                let result = match Marker::new(transform, radius, color) {
                    Ok(_) if radius > self.config.max_radius => {
                        Err(SessionError::InvalidRadius(radius))
                    }
                    Ok(marker) => self.add_marker(marker).await,
                    Err(err) => Err(err.into()),
                };
                let _ = reply.send(self.report_marker_result(result));
            }
            Command::PlaceMarker {
                color_index,
                radius,
                reply,
            } => {
                let result = self.place_marker(color_index, radius).await;
                let _ = reply.send(self.report_marker_result(result));
            }
            Command::RemoveMarker { id, reply } => {
                let _ = reply.send(self.remove_marker(id).await);
            }
            Command::ClearAll { reply } => {
                let _ = reply.send(self.clear_all().await);
            }
            Command::Shutdown => {}
        }
    }

    fn report_marker_result(&self, result: Result<Marker>) -> Result<Marker> {
        if let Err(err) = &result {
            if !matches!(err, SessionError::InvalidState { .. }) {
                self.set_status(format!("Marker not placed: {err}"));
            }
        }
        result
    }

    // ---- publishing -------------------------------------------------------

    fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("Status: {message}");
        self.feeds.status_tx.send_replace(message.clone());
        let _ = self.feeds.event_tx.send(SessionEvent::Status(message));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.feeds.event_tx.send(event);
    }

    /// Installs `phase` and publishes the state if it differs from the last
    /// published one.
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let before = *self.feeds.state_tx.borrow();
        let after = self.phase.public();
        if before != after {
            info!("Session {before} -> {after}");
            self.feeds.state_tx.send_replace(after);
            self.emit(SessionEvent::StateChanged(after));
        }
    }

    fn publish_live(&self) {
        self.feeds.markers_tx.send_replace(self.live.clone());
    }

    fn raise_progress(&self, value: f32) {
        self.feeds.progress_tx.send_if_modified(|current| {
            if value > *current {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    fn reset_progress(&self) {
        self.feeds.progress_tx.send_replace(0.0);
    }

    fn reject(&self, op: &'static str) -> SessionError {
        let state = self.phase.public();
        let message = match op {
            "add marker" | "remove marker" | "clear markers" | "place marker" => {
                format!("Markers can only be edited while recording (currently {state})")
            }
            _ => format!("Cannot {op} while {state}"),
        };
        warn!("{message}");
        self.set_status(message);
        SessionError::InvalidState { op, state }
    }

    async fn clear_scene(&mut self) {
        for marker in std::mem::take(&mut self.live) {
            self.engine.remove_point(marker.id()).await;
        }
        self.publish_live();
    }

    // ---- recording --------------------------------------------------------

    async fn start_recording(&mut self, name: &str) -> Result<Room> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.reject("start recording"));
        }

        let room = match self.catalog.find_by_name(name.trim()) {
            Some(existing) if !self.catalog.has_spatial_map(&existing).await => existing,
            _ => match self.catalog.create(name).await {
                Ok(room) => room,
                Err(err) => {
                    self.set_status(format!("Could not create room: {err}"));
                    return Err(err.into());
                }
            },
        };

        self.clear_scene().await;
        if let Err(err) = self.engine.reset_session(None).await {
            self.set_status(format!("Could not start mapping session: {err}"));
            return Err(err.into());
        }

        self.reset_deadline = None;
        self.set_phase(Phase::Recording {
            room: room.clone(),
            markers: Vec::new(),
            throttle: SaveThrottle::new(self.config.save_throttle),
        });
        self.set_status(format!("Recording {:?}", room.name));
        Ok(room)
    }

    async fn stop_recording(&mut self) -> bool {
        if !matches!(self.phase, Phase::Recording { .. }) {
            return false;
        }
        let Phase::Recording { room, markers, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return false;
        };

        let count = markers.len();
        let queued = self
            .submit_save(room.clone(), markers, SaveReason::Final)
            .await;
        self.engine.pause().await;
        self.live.clear();
        self.publish_live();
        self.reset_deadline = None;
        self.set_phase(Phase::Idle);
        if queued {
            self.set_status(format!("Saving {:?} with {count} markers", room.name));
        }
        true
    }

    /// Snapshots the map while the engine is still mapping `room`, then
    /// hands the write to the save worker. Returns whether a write was queued.
    async fn submit_save(&mut self, room: Room, markers: Vec<Marker>, reason: SaveReason) -> bool {
        let room_id = room.id;
        self.emit(SessionEvent::SaveStarted {
            room: room_id,
            reason,
        });
        let map = match self.engine.current_map_snapshot().await {
            Ok(map) => map,
            Err(err) => {
                let error = format!("map snapshot unavailable: {err}");
                error!("Saving room {:?} failed: {error}", room.name);
                self.finish_save(room_id, reason, Some(error));
                return false;
            }
        };
        let job = SaveJob {
            room,
            map,
            markers,
            reason,
        };
        if self.save_tx.send(job).is_err() {
            error!("Save worker is gone; save of room {room_id} dropped");
            return false;
        }
        true
    }

    async fn place_marker(&mut self, color_index: usize, radius: Option<f32>) -> Result<Marker> {
        if !matches!(self.phase, Phase::Recording { .. }) {
            return Err(self.reject("place marker"));
        }
        let Some(pose) = self.engine.placement_pose().await else {
            return Err(SessionError::InvalidPose(
                "no placement pose available".into(),
            ));
        };
        let marker = Marker::new(
            pose,
            self.config.clamp_radius(radius),
            Rgba::from_palette(color_index),
        )?;
        self.add_marker(marker).await
    }

    async fn add_marker(&mut self, marker: Marker) -> Result<Marker> {
        let Phase::Recording { markers, .. } = &mut self.phase else {
            return Err(self.reject("add marker"));
        };
        markers.push(marker.clone());
        self.engine.add_point(&marker).await;
        self.live.push(marker.clone());
        self.publish_live();
        debug!("Added marker {}", marker.id());
        self.maybe_save_after_edit().await;
        Ok(marker)
    }

    async fn remove_marker(&mut self, id: MarkerId) -> Result<bool> {
        let Phase::Recording { markers, .. } = &mut self.phase else {
            return Err(self.reject("remove marker"));
        };
        let before = markers.len();
        markers.retain(|m| m.id() != id);
        if markers.len() == before {
            self.set_status("No such marker");
            return Ok(false);
        }
        self.engine.remove_point(id).await;
        self.live.retain(|m| m.id() != id);
        self.publish_live();
        self.maybe_save_after_edit().await;
        Ok(true)
    }

    async fn clear_all(&mut self) -> Result<usize> {
        let Phase::Recording { markers, .. } = &mut self.phase else {
            return Err(self.reject("clear markers"));
        };
        let removed = std::mem::take(markers);
        for marker in &removed {
            self.engine.remove_point(marker.id()).await;
        }
        self.live.clear();
        self.publish_live();
        if !removed.is_empty() {
            self.maybe_save_after_edit().await;
        }
        Ok(removed.len())
    }

    async fn maybe_save_after_edit(&mut self) {
        let Phase::Recording {
            room,
            markers,
            throttle,
        } = &mut self.phase
        else {
            return;
        };
        if !throttle.try_acquire(Instant::now()) {
            debug!("Marker save throttled");
            return;
        }
        let (room, markers) = (room.clone(), markers.clone());
        self.submit_save(room, markers, SaveReason::MarkerChange)
            .await;
    }

    // ---- loading / viewing ------------------------------------------------

    fn load_room(&mut self, id: RoomId, reply: oneshot::Sender<Result<()>>) {
        if !matches!(self.phase, Phase::Idle) {
            let _ = reply.send(Err(self.reject("load room")));
            return;
        }
        let Some(room) = self.catalog.get(id) else {
            self.set_status("That room no longer exists");
            let _ = reply.send(Err(SessionError::UnknownRoom(id)));
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        self.reset_progress();
        self.set_phase(Phase::Loading {
            room: room.clone(),
            map: None,
            pending: None,
            reply: Some(reply),
        });
        self.set_status(format!("Loading {:?}", room.name));

        let root = self.catalog.root().to_path_buf();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = load_world_map(&root, &room).await;
            let _ = tx.send(Completion::MapLoaded { generation, result });
        });
    }

    async fn on_map_loaded(&mut self, result: std::result::Result<WorldMap, StoreError>) {
        let Phase::Loading { room, reply, .. } = &mut self.phase else {
            return;
        };
        let room = room.clone();
        let reply = reply.take();

        let map = match result {
            Ok(map) => map,
            Err(err) => {
                self.fail_load(&room, SessionError::Store(err), reply);
                return;
            }
        };

        if let Err(err) = self.engine.reset_session(Some(map.clone())).await {
            self.fail_load(&room, SessionError::Engine(err), reply);
            return;
        }

        if let Phase::Loading { map: slot, .. } = &mut self.phase {
            *slot = Some(map);
        }
        self.raise_progress(progress::MAP_LOADED);
        self.set_status(format!(
            "Move around {:?} to relocalize",
            room.name
        ));
        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
        self.spawn_marker_load(room);
    }

    fn fail_load(&mut self, room: &Room, err: SessionError, reply: Option<oneshot::Sender<Result<()>>>) {
        warn!("Loading room {:?} failed: {err}", room.name);
        let message = format!("Could not load {:?}: {err}", room.name);
        self.emit(SessionEvent::LoadFailed {
            room: room.id,
            error: err.to_string(),
        });
        self.generation += 1;
        self.reset_progress();
        self.set_phase(Phase::Idle);
        self.set_status(message);
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    fn spawn_marker_load(&self, room: Room) {
        let generation = self.generation;
        let root = self.catalog.root().to_path_buf();
        let options = self.config.marker_load_options();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let result = load_marker_list(&root, &room, options, move |batch| {
                let _ = progress_tx.send(Completion::MarkerProgress {
                    generation,
                    fraction: batch.fraction(),
                });
            })
            .await;
            let _ = tx.send(Completion::MarkersLoaded { generation, result });
        });
    }

    async fn on_markers_loaded(&mut self, result: std::result::Result<LoadedMarkers, StoreError>) {
        let room = match &self.phase {
            Phase::Loading { room, .. } | Phase::Viewing { room, .. } => room.clone(),
            _ => return,
        };

        let markers = match result {
            Ok(loaded) => {
                if !loaded.report.is_clean() {
                    self.set_status(format!(
                        "Some markers were damaged: {} fields defaulted, {} skipped",
                        loaded.report.defaulted_fields,
                        loaded.report.skipped.len()
                    ));
                }
                loaded.markers
            }
            Err(err) => {
                warn!("Marker list for {:?} unavailable: {err}", room.name);
                self.set_status(format!("Markers could not be loaded: {err}"));
                Vec::new()
            }
        };
        let count = markers.len();
        self.raise_progress(progress::MARKERS_LOADED);

        let attach_now = match &mut self.phase {
            Phase::Loading { pending, .. } => {
                *pending = Some(markers);
                None
            }
            Phase::Viewing {
                localized: true,
                markers_loaded,
                ..
            } => {
                *markers_loaded = true;
                Some(markers)
            }
            Phase::Viewing {
                pending,
                markers_loaded,
                ..
            } => {
                *markers_loaded = true;
                *pending = Some(markers);
                None
            }
            _ => None,
        };

        let attached = attach_now.is_some();
        if let Some(markers) = attach_now {
            self.attach(markers).await;
        }
        self.emit(SessionEvent::MarkersLoaded {
            room: room.id,
            count,
            attached,
        });
    }

    /// Only called once the session is localized.
    async fn attach(&mut self, markers: Vec<Marker>) {
        if markers.is_empty() {
            self.set_status("This room has no markers");
            return;
        }
        for marker in &markers {
            self.engine.add_point(marker).await;
        }
        info!("Attached {} markers", markers.len());
        self.live.extend(markers);
        self.publish_live();
    }

    async fn on_relocalized(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Loading {
                room,
                map: Some(map),
                pending,
                ..
            } => {
                let markers_loaded = pending.is_some();
                self.set_phase(Phase::Viewing {
                    room: room.clone(),
                    map,
                    localized: true,
                    pending: None,
                    markers_loaded,
                });
                self.raise_progress(progress::RELOCALIZED);
                self.emit(SessionEvent::Relocalized { room: room.id });
                self.set_status(format!("Relocalized in {:?}", room.name));
                if let Some(markers) = pending {
                    self.attach(markers).await;
                }
            }
            Phase::Viewing {
                room,
                map,
                localized: false,
                pending,
                markers_loaded,
            } => {
                self.phase = Phase::Viewing {
                    room: room.clone(),
                    map,
                    localized: true,
                    pending: None,
                    markers_loaded,
                };
                self.set_status(format!("Relocalized in {:?}", room.name));
                if let Some(markers) = pending {
                    self.attach(markers).await;
                }
            }
            other => self.phase = other,
        }
    }

    async fn return_to_idle(&mut self) {
        match self.phase {
            Phase::Idle => {}
            Phase::Recording { .. } => {
                self.stop_recording().await;
            }
            Phase::Loading { .. } | Phase::Viewing { .. } => {
                if let Phase::Loading { reply, .. } = &mut self.phase {
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Err(SessionError::InvalidState {
                            op: "load room",
                            state: SessionState::Idle,
                        }));
                    }
                }
                self.generation += 1;
                self.engine.pause().await;
                self.clear_scene().await;
                self.reset_deadline = None;
                self.reset_progress();
                self.set_phase(Phase::Idle);
                self.set_status("Ready");
            }
        }
    }

    async fn delete_room(&mut self, id: RoomId) -> Result<DeleteOutcome> {
        if self.phase.public().room() == Some(id) {
            return Err(self.reject("delete the active room"));
        }
        let name = self.catalog.get(id).map(|room| room.name);
        match self.catalog.delete(id).await {
            Ok(outcome) => {
                match (&outcome, name) {
                    (DeleteOutcome::Removed, Some(name)) => {
                        self.set_status(format!("Deleted {name:?}"));
                    }
                    (DeleteOutcome::RemovedFilesRemain(reason), Some(name)) => {
                        self.set_status(format!("Deleted {name:?}, but files may remain: {reason}"));
                    }
                    _ => {}
                }
                Ok(outcome)
            }
            Err(err) => {
                self.set_status(format!("Delete failed: {err}"));
                Err(err.into())
            }
        }
    }

    // ---- engine events ----------------------------------------------------

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TrackingChanged { quality, mapping } => {
                self.on_tracking(quality, mapping).await;
            }
            EngineEvent::InterruptionBegan => {
                if let Phase::Viewing { localized, .. } = &mut self.phase {
                    *localized = false;
                }
                self.set_status("Session interrupted");
            }
            EngineEvent::InterruptionEnded => self.on_interruption_ended().await,
            EngineEvent::SessionFailed(reason) => {
                error!("Mapping session failed: {reason}");
                if self.phase.public().is_idle() {
                    self.set_status(format!("Mapping session failed: {reason}"));
                    return;
                }
                let delay = self.config.failure_reset_delay;
                self.reset_deadline = Some(Instant::now() + delay);
                self.set_status(format!(
                    "Mapping session failed: {reason}. Restarting in {:.1}s",
                    delay.as_secs_f32()
                ));
            }
        }
    }

    async fn on_tracking(&mut self, quality: TrackingQuality, mapping: MappingStatus) {
        match &self.phase {
            Phase::Idle => {}
            Phase::Recording { .. } => {
                let text = match quality {
                    TrackingQuality::Normal => mapping.status_text(),
                    _ => quality.status_text(),
                };
                self.set_status(text);
            }
            Phase::Loading { map: None, .. } => {}
            Phase::Loading { .. } | Phase::Viewing { .. } => match quality {
                TrackingQuality::Normal => self.on_relocalized().await,
                TrackingQuality::Limited(_) => {
                    if matches!(self.phase, Phase::Loading { .. }) {
                        self.raise_progress(progress::TRACKING_LIMITED);
                    }
                    self.set_status(quality.status_text());
                }
                TrackingQuality::NotAvailable => self.set_status(quality.status_text()),
            },
        }
    }

    async fn on_interruption_ended(&mut self) {
        let map = match &mut self.phase {
            Phase::Loading { map: Some(map), .. } => map.clone(),
            Phase::Viewing { map, localized, .. } => {
                *localized = false;
                map.clone()
            }
            Phase::Recording { .. } => {
                self.set_status("Session resumed");
                return;
            }
            _ => return,
        };
        info!("Interruption ended; relocalizing against the stored map");
        match self.engine.reset_session(Some(map)).await {
            Ok(()) => self.set_status("Relocalizing after interruption"),
            Err(err) => self.set_status(format!("Could not restart session: {err}")),
        }
    }

    async fn reset_after_failure(&mut self) {
        let result = match &mut self.phase {
            Phase::Idle => return,
            Phase::Recording { markers, .. } => {
                let markers = markers.clone();
                let result = self.engine.reset_session(None).await;
                if result.is_ok() {
                    for marker in &markers {
                        self.engine.add_point(marker).await;
                    }
                }
                result
            }
            Phase::Loading { map: None, .. } => return,
            Phase::Loading { map: Some(map), .. } => {
                let map = map.clone();
                self.engine.reset_session(Some(map)).await
            }
            Phase::Viewing { map, localized, .. } => {
                *localized = false;
                let map = map.clone();
                self.engine.reset_session(Some(map)).await
            }
        };
        match result {
            Ok(()) => {
                info!("Mapping session restarted after failure");
                self.set_status("Mapping session restarted");
            }
            Err(err) => {
                error!("Session reset failed: {err}");
                self.set_status(format!("Session reset failed: {err}"));
            }
        }
    }

    // ---- background completions ------------------------------------------

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::MapLoaded { generation, result } if generation == self.generation => {
                self.on_map_loaded(result).await;
            }
            Completion::MarkerProgress {
                generation,
                fraction,
            } if generation == self.generation => {
                if matches!(self.phase, Phase::Loading { .. }) {
                    self.raise_progress(progress::marker_batches(fraction));
                }
            }
            Completion::MarkersLoaded { generation, result } if generation == self.generation => {
                self.on_markers_loaded(result).await;
            }
            Completion::SaveFinished {
                room,
                reason,
                error,
            } => self.finish_save(room, reason, error),
            _ => debug!("Ignoring result of an abandoned load"),
        }
    }

    fn finish_save(&self, room: RoomId, reason: SaveReason, error: Option<String>) {
        let name = self
            .catalog
            .get(room)
            .map_or_else(|| room.to_string(), |r| format!("{:?}", r.name));
        match &error {
            None if reason == SaveReason::Final => self.set_status(format!("Saved {name}")),
            None => {}
            Some(err) => self.set_status(format!("Saving {name} failed: {err}")),
        }
        self.emit(SessionEvent::SaveFinished {
            room,
            reason,
            error,
        });
    }
}

/// Runs saves one at a time in submission order so two saves never race on
/// the same room files. Exits once the actor drops its job sender.
fn spawn_save_worker(
    catalog: Arc<RoomCatalog>,
    mut jobs: mpsc::UnboundedReceiver<SaveJob>,
    completion_tx: mpsc::UnboundedSender<Completion>,
) {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let error = run_save(catalog.root(), &job)
                .await
                .err();
            if let Some(err) = &error {
                error!("Saving room {:?} failed: {err}", job.room.name);
            }
            let _ = completion_tx.send(Completion::SaveFinished {
                room: job.room.id,
                reason: job.reason,
                error,
            });
        }
    });
}

async fn run_save(root: &std::path::Path, job: &SaveJob) -> std::result::Result<(), String> {
    save_world_map(root, &job.room, &job.map)
        .await
        .map_err(|err| err.to_string())?;
    save_marker_list(root, &job.room, &job.markers)
        .await
        .map_err(|err| err.to_string())?;
    Ok(())
}
