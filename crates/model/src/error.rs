use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Invalid radius: {0} (expected 0 < radius <= {max})", max = crate::MAX_RADIUS)]
    InvalidRadius(f32),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}
