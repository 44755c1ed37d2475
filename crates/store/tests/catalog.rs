use pretty_assertions::assert_eq;
use spatial_model::{Marker, Rgba, Room, Transform, WorldMap};
use spatial_store::{
    save_marker_list, save_world_map, DeleteOutcome, RoomCatalog, StoreError, StoreLayout,
    BUNDLE_README_FILE_NAME,
};
use tempfile::TempDir;

fn layout(dir: &TempDir) -> StoreLayout {
    StoreLayout::new(dir.path().join("Rooms")).with_bundle_dir(dir.path().join("bundles"))
}

#[tokio::test]
async fn duplicate_name_is_rejected_without_growing_the_catalog() {
    let dir = TempDir::new().unwrap();
    let catalog = RoomCatalog::open(layout(&dir)).await.unwrap();

    catalog.create("Kitchen").await.unwrap();
    let err = catalog.create("Kitchen").await.unwrap_err();

    assert!(matches!(err, StoreError::NameTaken(name) if name == "Kitchen"));
    assert_eq!(catalog.len(), 1);
    // Names are compared case-sensitively.
    catalog.create("kitchen").await.unwrap();
    assert_eq!(catalog.len(), 2);
}

#[tokio::test]
async fn catalog_survives_reopen_in_insertion_order() {
    let dir = TempDir::new().unwrap();
    let names = ["Hall", "Office", "Porch"];
    {
        let catalog = RoomCatalog::open(layout(&dir)).await.unwrap();
        for name in names {
            catalog.create(name).await.unwrap();
        }
    }

    let reopened = RoomCatalog::open(layout(&dir)).await.unwrap();
    let listed: Vec<String> = reopened.list().into_iter().map(|r| r.name).collect();
    assert_eq!(listed, names.map(String::from).to_vec());
    assert_eq!(reopened.load_report().status_message(), None);
}

#[tokio::test]
async fn deleting_unknown_room_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir);
    let catalog = RoomCatalog::open(layout.clone()).await.unwrap();
    catalog.create("Den").await.unwrap();
    let before = tokio::fs::read(layout.index_path()).await.unwrap();

    let outcome = catalog.delete(spatial_model::RoomId::new()).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::NotInCatalog);
    assert_eq!(catalog.len(), 1);
    assert_eq!(tokio::fs::read(layout.index_path()).await.unwrap(), before);
}

#[tokio::test]
async fn delete_removes_directory_and_index_entry() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir);
    let catalog = RoomCatalog::open(layout.clone()).await.unwrap();
    let room = catalog.create("Den").await.unwrap();
    let room_dir = room.directory_in(layout.root());
    assert!(room_dir.is_dir());

    let mut feed = catalog.subscribe();
    let outcome = catalog.delete(room.id).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Removed);
    assert!(!room_dir.exists());
    assert!(feed.has_changed().unwrap());
    assert!(feed.borrow_and_update().is_empty());

    let reopened = RoomCatalog::open(layout).await.unwrap();
    assert!(reopened.is_empty());
}

#[tokio::test]
async fn delete_tolerates_an_already_missing_directory() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir);
    let catalog = RoomCatalog::open(layout.clone()).await.unwrap();
    let room = catalog.create("Shed").await.unwrap();
    tokio::fs::remove_dir_all(room.directory_in(layout.root()))
        .await
        .unwrap();

    assert_eq!(catalog.delete(room.id).await.unwrap(), DeleteOutcome::Removed);
    assert!(catalog.is_empty());
}

#[tokio::test]
async fn index_entries_without_a_directory_are_skipped_and_reported() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir);
    let (kept, lost) = {
        let catalog = RoomCatalog::open(layout.clone()).await.unwrap();
        (
            catalog.create("Kept").await.unwrap(),
            catalog.create("Lost").await.unwrap(),
        )
    };
    tokio::fs::remove_dir_all(lost.directory_in(layout.root()))
        .await
        .unwrap();

    let catalog = RoomCatalog::open(layout).await.unwrap();

    assert_eq!(catalog.list(), vec![kept]);
    let report = catalog.load_report();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "Lost");
    assert!(report.status_message().unwrap().contains("Lost"));
}

#[tokio::test]
async fn rename_keeps_directory_and_enforces_uniqueness() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir);
    let catalog = RoomCatalog::open(layout.clone()).await.unwrap();
    let studio = catalog.create("Studio").await.unwrap();
    catalog.create("Loft").await.unwrap();

    assert!(matches!(
        catalog.rename(studio.id, "Loft").await,
        Err(StoreError::NameTaken(_))
    ));

    let renamed = catalog.rename(studio.id, "Workshop").await.unwrap();
    assert_eq!(renamed.name, "Workshop");
    assert_eq!(renamed.directory(), studio.directory());

    let reopened = RoomCatalog::open(layout).await.unwrap();
    assert_eq!(reopened.get(studio.id).unwrap().name, "Workshop");
    assert!(reopened.find_by_name("Studio").is_none());
}

async fn record_blobs(catalog: &RoomCatalog, room: &Room) {
    let marker = Marker::new(Transform::IDENTITY, 0.05, Rgba::OPAQUE_RED).unwrap();
    save_world_map(catalog.root(), room, &WorldMap::new(vec![7; 16]))
        .await
        .unwrap();
    save_marker_list(catalog.root(), room, &[marker])
        .await
        .unwrap();
}

#[tokio::test]
async fn bundle_requires_both_blobs() {
    let dir = TempDir::new().unwrap();
    let catalog = RoomCatalog::open(layout(&dir)).await.unwrap();
    let room = catalog.create("Bare").await.unwrap();

    match catalog.share_bundle(room.id).await.unwrap_err() {
        StoreError::MissingFiles(paths) => assert_eq!(paths.len(), 2),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn bundle_copies_blobs_and_writes_readme() {
    let dir = TempDir::new().unwrap();
    let catalog = RoomCatalog::open(layout(&dir)).await.unwrap();
    let room = catalog.create("Gallery").await.unwrap();
    record_blobs(&catalog, &room).await;

    let bundle = catalog.share_bundle(room.id).await.unwrap();

    assert!(bundle.starts_with(dir.path().join("bundles")));
    let original = tokio::fs::read(room.marker_list_in(catalog.root()))
        .await
        .unwrap();
    let copied = tokio::fs::read(bundle.join("anchors.bin")).await.unwrap();
    assert_eq!(copied, original);
    assert!(bundle.join("worldMap.bin").is_file());

    let readme = tokio::fs::read_to_string(bundle.join(BUNDLE_README_FILE_NAME))
        .await
        .unwrap();
    assert!(readme.contains("Room: Gallery"));
    assert!(readme.contains("sha256: "));
    assert_eq!(catalog.len(), 1);
}
