use serde::Serialize;
use spatial_model::Room;
use std::fmt::Write as _;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlobStatus<T> {
    Ok(T),
    Missing,
    Error { message: String },
}

#[derive(Debug, Serialize)]
pub struct MapSummary {
    pub bytes: usize,
    pub feature_bytes: usize,
    pub markers: usize,
    pub planes: usize,
    pub other_anchors: usize,
}

#[derive(Debug, Serialize)]
pub struct MarkerListSummary {
    pub bytes: usize,
    pub markers: usize,
    pub defaulted_fields: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub room: Room,
    pub spatial_map: BlobStatus<MapSummary>,
    pub marker_list: BlobStatus<MarkerListSummary>,
}

pub fn render_room_table(rooms: &[Room]) -> String {
    if rooms.is_empty() {
        return "No rooms.\n".to_string();
    }
    let name_width = rooms
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let mut out = String::new();
    let _ = writeln!(out, "{:<36}  {:<name_width$}  CREATED", "ID", "NAME");
    for room in rooms {
        let _ = writeln!(
            out,
            "{:<36}  {:<name_width$}  {}",
            room.id.to_string(),
            room.name,
            room.creation_date.format("%Y-%m-%d %H:%M")
        );
    }
    out
}

pub fn render_inspect(report: &InspectReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Room {:?} ({})", report.room.name, report.room.id);
    let _ = writeln!(out, "  directory: {}", report.room.directory().display());

    match &report.spatial_map {
        BlobStatus::Ok(map) => {
            let _ = writeln!(
                out,
                "  spatial map: {} bytes, {} feature bytes, {} markers, {} planes, {} other anchors",
                map.bytes, map.feature_bytes, map.markers, map.planes, map.other_anchors
            );
        }
        BlobStatus::Missing => out.push_str("  spatial map: missing\n"),
        BlobStatus::Error { message } => {
            let _ = writeln!(out, "  spatial map: unreadable ({message})");
        }
    }

    match &report.marker_list {
        BlobStatus::Ok(list) => {
            let _ = writeln!(
                out,
                "  marker list: {} bytes, {} markers",
                list.bytes, list.markers
            );
            if list.defaulted_fields > 0 {
                let _ = writeln!(out, "    {} fields fell back to defaults", list.defaulted_fields);
            }
            for reason in &list.skipped {
                let _ = writeln!(out, "    skipped: {reason}");
            }
        }
        BlobStatus::Missing => out.push_str("  marker list: missing\n"),
        BlobStatus::Error { message } => {
            let _ = writeln!(out, "  marker list: unreadable ({message})");
        }
    }
    out
}
