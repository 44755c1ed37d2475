use crate::layout::{StoreLayout, BUNDLE_EXTENSION, BUNDLE_README_FILE_NAME};
use crate::{Result, StoreError};
use log::info;
use sha2::{Digest, Sha256};
use spatial_model::{Room, MARKER_LIST_FILE_NAME, SPATIAL_MAP_FILE_NAME};
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

struct BundledFile {
    name: &'static str,
    purpose: &'static str,
    size: usize,
    sha256: String,
}

/// Copies both blobs of `room` plus a README into
/// `<bundle dir>/<room dir>-<uuid>.spatialroom/`.
pub(crate) async fn write_bundle(layout: &StoreLayout, room: &Room) -> Result<PathBuf> {
    let sources = [
        (
            room.spatial_map_in(layout.root()),
            SPATIAL_MAP_FILE_NAME,
            "Spatial map used to relocalize in the room",
        ),
        (
            room.marker_list_in(layout.root()),
            MARKER_LIST_FILE_NAME,
            "Markers placed in the room",
        ),
    ];

    let missing: Vec<PathBuf> = sources
        .iter()
        .filter(|(path, _, _)| !path.is_file())
        .map(|(path, _, _)| path.clone())
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingFiles(missing));
    }

    let dir_label = room.directory().to_string_lossy().into_owned();
    let bundle = layout
        .bundle_dir()
        .join(format!("{dir_label}-{}.{BUNDLE_EXTENSION}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&bundle)
        .await
        .map_err(|err| StoreError::io_at(&bundle, err))?;

    let mut files = Vec::with_capacity(sources.len());
    for (source, name, purpose) in sources {
        let bytes = tokio::fs::read(&source)
            .await
            .map_err(|err| StoreError::io_at(&source, err))?;
        let dest = bundle.join(name);
        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|err| StoreError::io_at(&dest, err))?;
        files.push(BundledFile {
            name,
            purpose,
            size: bytes.len(),
            sha256: sha256_hex(&bytes),
        });
    }

    let readme = bundle.join(BUNDLE_README_FILE_NAME);
    tokio::fs::write(&readme, render_readme(room, &files))
        .await
        .map_err(|err| StoreError::io_at(&readme, err))?;

    info!("Bundled room {:?} at {}", room.name, bundle.display());
    Ok(bundle)
}

fn render_readme(room: &Room, files: &[BundledFile]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Room: {}", room.name);
    let _ = writeln!(out, "Id: {}", room.id);
    let _ = writeln!(
        out,
        "Created: {}",
        room.creation_date.format("%Y-%m-%d %H:%M:%S UTC")
    );
    out.push('\n');
    out.push_str("Files:\n");
    for file in files {
        let _ = writeln!(out, "  {}", file.name);
        let _ = writeln!(out, "    {}", file.purpose);
        let _ = writeln!(out, "    size: {} bytes", file.size);
        let _ = writeln!(out, "    sha256: {}", file.sha256);
    }
    out.push('\n');
    out.push_str("Copy both files into a room directory to load the room on another device.\n");
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn readme_lists_every_file_with_checksum() {
        let room = Room::new("Garage", "Garage");
        let files = [BundledFile {
            name: SPATIAL_MAP_FILE_NAME,
            purpose: "map",
            size: 3,
            sha256: "abc".into(),
        }];
        let text = render_readme(&room, &files);
        assert!(text.starts_with("Room: Garage\n"));
        assert!(text.contains("  worldMap.bin\n"));
        assert!(text.contains("size: 3 bytes"));
        assert!(text.contains("sha256: abc"));
    }
}
