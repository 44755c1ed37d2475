//! In-process mapping engine for tests and dry runs.
//!
//! Records every call and lets the caller drive tracking, interruption and
//! failure events by hand.

use crate::engine::{
    EngineEvent, EngineResult, LimitedReason, MappingEngine, MappingStatus, TrackingQuality,
};
use crate::EngineError;
use async_trait::async_trait;
use spatial_model::{AnchorRecord, Marker, MarkerId, Transform, WorldMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

const FRESH_FEATURES: &[u8] = b"simulated-feature-points";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Reset { with_map: bool },
    Pause,
    AddPoint(MarkerId),
    RemovePoint(MarkerId),
    Snapshot,
}

#[derive(Debug)]
struct SimState {
    calls: Vec<EngineCall>,
    map: WorldMap,
    placement: Option<Transform>,
    snapshot_error: Option<String>,
}

pub struct SimulatedEngine {
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<SimState>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            state: Mutex::new(SimState {
                calls: Vec::new(),
                map: WorldMap::new(FRESH_FEATURES.to_vec()),
                placement: Some(Transform::IDENTITY),
                snapshot_error: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_tracking(&self, quality: TrackingQuality, mapping: MappingStatus) {
        self.emit(EngineEvent::TrackingChanged { quality, mapping });
    }

    /// Tracking reaches normal quality against the loaded map.
    pub fn relocalize(&self) {
        self.emit_tracking(TrackingQuality::Normal, MappingStatus::Mapped);
    }

    pub fn emit_limited(&self, reason: LimitedReason) {
        self.emit_tracking(TrackingQuality::Limited(reason), MappingStatus::Limited);
    }

    pub fn set_placement_pose(&self, pose: Option<Transform>) {
        self.state().placement = pose;
    }

    /// Makes every later snapshot request fail with `message`.
    pub fn fail_snapshots(&self, message: Option<&str>) {
        self.state().snapshot_error = message.map(str::to_string);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| pred(call)).count()
    }

    #[must_use]
    pub fn current_map(&self) -> WorldMap {
        self.state().map.clone()
    }
}

#[async_trait]
impl MappingEngine for SimulatedEngine {
    async fn reset_session(&self, initial_map: Option<WorldMap>) -> EngineResult<()> {
        let mut state = self.state();
        state.calls.push(EngineCall::Reset {
            with_map: initial_map.is_some(),
        });
        state.map = initial_map.unwrap_or_else(|| WorldMap::new(FRESH_FEATURES.to_vec()));
        Ok(())
    }

    async fn pause(&self) {
        self.state().calls.push(EngineCall::Pause);
    }

    async fn add_point(&self, marker: &Marker) {
        let mut state = self.state();
        state.calls.push(EngineCall::AddPoint(marker.id()));
        let already_mapped = state.map.markers().any(|m| m.id() == marker.id());
        if !already_mapped {
            state.map.anchors.push(AnchorRecord::Marker(marker.clone()));
        }
    }

    async fn remove_point(&self, id: MarkerId) {
        let mut state = self.state();
        state.calls.push(EngineCall::RemovePoint(id));
        state
            .map
            .anchors
            .retain(|anchor| !matches!(anchor, AnchorRecord::Marker(m) if m.id() == id));
    }

    async fn placement_pose(&self) -> Option<Transform> {
        self.state().placement
    }

    async fn current_map_snapshot(&self) -> EngineResult<WorldMap> {
        let mut state = self.state();
        state.calls.push(EngineCall::Snapshot);
        match &state.snapshot_error {
            Some(message) => Err(EngineError::new(message.clone())),
            None => Ok(state.map.clone()),
        }
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
