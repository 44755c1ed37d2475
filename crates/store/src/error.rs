use spatial_codec::CodecError;
use spatial_model::RoomId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Which persisted item a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingItem {
    RoomDirectory,
    SpatialMap,
    MarkerList,
}

impl fmt::Display for MissingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RoomDirectory => "Room directory",
            Self::SpatialMap => "Spatial map",
            Self::MarkerList => "Marker list",
        })
    }
}

/// Result of trying to put the previous file back after a failed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Failure happened before the destination was touched.
    NotNeeded,
    /// There was no previous version to protect.
    NoBackup,
    Restored,
    RestoreFailed(String),
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNeeded => f.write_str("previous version untouched"),
            Self::NoBackup => f.write_str("no previous version existed"),
            Self::Restored => f.write_str("previous version restored from backup"),
            Self::RestoreFailed(reason) => write!(f, "backup restore failed: {reason}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("A room named {0:?} already exists")]
    NameTaken(String),

    #[error("Invalid room name: {0}")]
    InvalidName(String),

    #[error("Unknown room {0}")]
    UnknownRoom(RoomId),

    #[error("{what} not found: {}", .path.display())]
    NotFound { what: MissingItem, path: PathBuf },

    #[error("Decode failure in {}: {source}", .path.display())]
    DecodeFailure {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("I/O failure at {}: {source} ({restore})", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        restore: RestoreOutcome,
    },

    #[error("Room files missing: {0:?}")]
    MissingFiles(Vec<PathBuf>),

    #[error("Index serialization error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
            restore: RestoreOutcome::NotNeeded,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownRoom(_))
    }
}
