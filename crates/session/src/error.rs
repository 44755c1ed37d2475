use crate::SessionState;
use spatial_model::{ModelError, RoomId};
use spatial_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{op} is not allowed while {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown room {0}")]
    UnknownRoom(RoomId),

    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Invalid radius: {0}")]
    InvalidRadius(f32),

    #[error("Mapping engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session controller has shut down")]
    Closed,
}

impl From<ModelError> for SessionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidPose(reason) => Self::InvalidPose(reason),
            ModelError::InvalidRadius(radius) => Self::InvalidRadius(radius),
            ModelError::InvalidId(id) => Self::InvalidPose(format!("bad identifier {id}")),
        }
    }
}

/// Failure reported by a mapping engine implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
