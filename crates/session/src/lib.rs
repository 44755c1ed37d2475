//! # Spatial Session
//!
//! Owns the single live mapping session and drives it through
//!
//! ```text
//!            start_recording            stop_recording (final save)
//!   Idle ─────────────────────> Recording ─────────────────────> Idle
//!    │
//!    │ load_room (map read, engine reset against it)
//!    v
//!  Loading ── tracking Normal ──> Viewing ── return_to_idle ──> Idle
//!    │  markers decoded in batches,
//!    │  held back until relocalized
//! ```
//!
//! Loaded markers never reach the live scene before the engine reports
//! normal tracking against the stored map.

mod config;
mod controller;
pub mod engine;
mod error;
pub mod sim;
mod state;
mod throttle;

pub use config::{
    SessionConfig, BATCH_PAUSE_ENV, FAILURE_RESET_DELAY_ENV, MARKER_BATCH_SIZE_ENV,
    SAVE_THROTTLE_ENV,
};
pub use controller::SessionController;
pub use engine::{
    EngineEvent, EngineResult, LimitedReason, MappingEngine, MappingStatus, TrackingQuality,
};
pub use error::{EngineError, Result, SessionError};
pub use state::{SaveReason, SessionEvent, SessionState};
