use std::path::{Path, PathBuf};

pub const ROOMS_DIR_NAME: &str = "Rooms";
pub const INDEX_FILE_NAME: &str = "rooms.json";
pub const INDEX_LOCK_FILE_NAME: &str = "rooms.lock";
pub const APP_DATA_DIR_NAME: &str = "spatial-rooms";
pub const BUNDLE_EXTENSION: &str = "spatialroom";
pub const BUNDLE_README_FILE_NAME: &str = "README.txt";

pub const ROOMS_DIR_ENV: &str = "SPATIAL_ROOMS_DIR";
pub const BUNDLE_DIR_ENV: &str = "SPATIAL_BUNDLE_DIR";

/// Where rooms and share bundles live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
    bundle_dir: PathBuf,
}

impl StoreLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bundle_dir: std::env::temp_dir(),
        }
    }

    #[must_use]
    pub fn with_bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = dir.into();
        self
    }

    /// Explicit root, else `SPATIAL_ROOMS_DIR`, else `<data dir>/spatial-rooms/Rooms`.
    #[must_use]
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let root = explicit
            .or_else(|| env_path(ROOMS_DIR_ENV))
            .unwrap_or_else(default_rooms_root);
        let mut layout = Self::new(root);
        if let Some(dir) = env_path(BUNDLE_DIR_ENV) {
            layout.bundle_dir = dir;
        }
        layout
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    #[must_use]
    pub fn index_lock_path(&self) -> PathBuf {
        self.root.join(INDEX_LOCK_FILE_NAME)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn default_rooms_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DATA_DIR_NAME)
        .join(ROOMS_DIR_NAME)
}

/// Directory-safe rendering of a room name.
#[must_use]
pub fn room_dir_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | ' ' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "room".to_string()
    } else {
        cleaned
    }
}

/// `worldMap.bin` → `worldMap.backup.bin`.
#[must_use]
pub fn backup_path_for(dest: &Path) -> PathBuf {
    sibling_with_infix(dest, "backup")
}

/// `worldMap.bin` → `worldMap.tmp.bin`.
#[must_use]
pub fn temp_path_for(dest: &Path) -> PathBuf {
    sibling_with_infix(dest, "tmp")
}

fn sibling_with_infix(dest: &Path, infix: &str) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match dest.extension() {
        Some(ext) => format!("{stem}.{infix}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{infix}"),
    };
    dest.with_file_name(name)
}
