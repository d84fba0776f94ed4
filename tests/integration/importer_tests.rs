use std::sync::atomic::Ordering;

use tankobon::db::models::{COUNTER_ALL_ARCHIVES, COUNTER_ALL_SERIES, split_pages};
use tankobon::db::queries::{archives, chapters, counters, history, series};
use tankobon::scanner::identity::{self, ITEM_ATTR};
use tankobon::scanner::{self, ImportRequest, ImportSettings, ImportStats, Progress};

use super::*;

async fn import(lib: &TestLibrary, reimport: bool) -> ImportStats {
    let settings = ImportSettings::from(&lib.config.library);
    let request = ImportRequest::folder(lib.root(), reimport, false);
    let stats = scanner::import_folder(&lib.pool, &settings, &request, &Progress::default())
        .await
        .unwrap();
    scanner::finalize(&lib.pool, &stats.touched_series).await.unwrap();
    stats
}

async fn counter(lib: &TestLibrary, name: &str) -> i64 {
    counters::get(&lib.pool, name)
        .await
        .unwrap()
        .map(|c| c.value)
        .unwrap_or(0)
}

#[tokio::test]
async fn folder_series_with_volumes() {
    let lib = TestLibrary::new().await;
    lib.zip("Berserk/Berserk v01.cbz", &[("01.png", PNG), ("02.png", PNG)]);
    lib.zip("Berserk/Berserk v02.cbz", &[("01.png", PNG)]);

    let stats = import(&lib, false).await;
    assert_eq!(stats.files_found, 2);
    assert_eq!(stats.imported, 2);
    assert_eq!(stats.errors, 0);

    let v1 = lib.archive_at("Berserk/Berserk v01.cbz").await.unwrap();
    let v2 = lib.archive_at("Berserk/Berserk v02.cbz").await.unwrap();
    assert_eq!(v1.volume, 1.0);
    assert_eq!(v2.volume, 2.0);
    assert_eq!(v1.pages_count, 2);
    assert_eq!(v1.series_id, v2.series_id);

    let s = series::get_by_id(&lib.pool, &v1.series_id).await.unwrap().unwrap();
    assert_eq!(s.title, "Berserk");
    assert!(!s.is_single);
    assert_eq!(s.volumes_count, 2);

    assert_eq!(counter(&lib, COUNTER_ALL_ARCHIVES).await, 2);
    assert_eq!(counter(&lib, COUNTER_ALL_SERIES).await, 1);
}

#[tokio::test]
async fn file_in_root_is_single_series() {
    let lib = TestLibrary::new().await;
    let path = lib.zip("Oneshot.cbz", &[("01.png", PNG)]);

    import(&lib, false).await;

    let archive = lib.archive_at("Oneshot.cbz").await.unwrap();
    let s = series::get_by_id(&lib.pool, &archive.series_id).await.unwrap().unwrap();
    assert!(s.is_single);
    assert_eq!(s.folder, path.to_string_lossy());
    assert_eq!(s.title, "Oneshot");
}

#[tokio::test]
async fn unchanged_files_are_skipped() {
    let lib = TestLibrary::new().await;
    lib.zip("S/v1.cbz", &[("01.png", PNG)]);

    assert_eq!(import(&lib, false).await.imported, 1);
    let again = import(&lib, false).await;
    assert_eq!(again.imported, 0);
    assert_eq!(again.unchanged, 1);

    // A size change forces another pass.
    lib.zip("S/v1.cbz", &[("01.png", PNG), ("02.png", PNG)]);
    let changed = import(&lib, false).await;
    assert_eq!(changed.imported, 1);
    assert_eq!(lib.archive_at("S/v1.cbz").await.unwrap().pages_count, 2);
}

#[tokio::test]
async fn vanished_files_and_series_are_removed() {
    let lib = TestLibrary::new().await;
    let a = lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    lib.zip("A/v2.cbz", &[("01.png", PNG)]);
    let b = lib.zip("B/v1.cbz", &[("01.png", PNG)]);
    import(&lib, false).await;
    let series_b = lib.archive_at("B/v1.cbz").await.unwrap().series_id;

    std::fs::remove_file(&a).unwrap();
    std::fs::remove_file(&b).unwrap();
    let stats = import(&lib, false).await;
    assert_eq!(stats.archives_deleted, 2);
    assert_eq!(stats.series_deleted, 1);

    assert!(lib.archive_at("A/v1.cbz").await.is_none());
    assert!(lib.archive_at("A/v2.cbz").await.is_some());
    assert!(series::get_by_id(&lib.pool, &series_b).await.unwrap().is_none());
    assert_eq!(counter(&lib, COUNTER_ALL_ARCHIVES).await, 1);
}

#[tokio::test]
async fn chapters_follow_archive_folders() {
    let lib = TestLibrary::new().await;
    lib.zip(
        "Bleach/Bleach v01.cbz",
        &[
            ("Bleach 2/01.png", PNG),
            ("Bleach 1/01.png", PNG),
            ("Bleach 1/02.png", PNG),
        ],
    );
    import(&lib, false).await;

    let archive = lib.archive_at("Bleach/Bleach v01.cbz").await.unwrap();
    let list = chapters::list_by_archive(&lib.pool, &archive.content_id).await.unwrap();
    let numbers: Vec<f64> = list.iter().map(|c| c.chapter).collect();
    assert_eq!(numbers, vec![1.0, 2.0]);
    assert_eq!(list[0].pages_count, 2);
    assert_eq!(split_pages(&list[0].page_entries), vec!["Bleach 1/01.png", "Bleach 1/02.png"]);

    let s = series::get_by_id(&lib.pool, &archive.series_id).await.unwrap().unwrap();
    assert_eq!(s.chapters_count, 2);
}

#[tokio::test]
async fn series_sidecar_sets_series_fields() {
    let lib = TestLibrary::new().await;
    lib.zip("dir/v1.cbz", &[("01.png", PNG)]);
    std::fs::write(
        lib.path("dir/series.json"),
        br#"{"title":"Vagabond","status":"completed","links":{"mu":"https://example.org/v"}}"#,
    )
    .unwrap();
    import(&lib, false).await;

    let archive = lib.archive_at("dir/v1.cbz").await.unwrap();
    let s = series::get_by_id(&lib.pool, &archive.series_id).await.unwrap().unwrap();
    assert_eq!(s.title, "Vagabond");
    assert_eq!(s.status, "completed");
    assert!(s.links.contains("example.org"));
}

#[tokio::test]
async fn duplicate_explicit_id_is_skipped() {
    let lib = TestLibrary::new().await;
    lib.zip("S/a.cbz", &[("01.png", PNG)]);
    lib.zip("S/b.cbz", &[("01.png", PNG)]);
    for stem in ["a", "b"] {
        std::fs::write(
            lib.path(&format!("S/{stem}.json")),
            br#"{"id":"shared-id","title":"Same Book"}"#,
        )
        .unwrap();
    }

    let stats = import(&lib, false).await;
    assert_eq!(stats.imported, 1);
    assert_eq!(stats.duplicates, 1);

    let first = lib.archive_at("S/a.cbz").await.unwrap();
    assert_eq!(first.content_id, "shared-id");
    assert!(first.is_unique_content_id);
    assert!(lib.archive_at("S/b.cbz").await.is_none());
}

#[tokio::test]
async fn comicinfo_metadata_is_imported() {
    let lib = TestLibrary::new().await;
    let xml = br#"<?xml version="1.0"?>
<ComicInfo>
  <Title>The Black Swordsman</Title>
  <Series>Berserk</Series>
  <Volume>1</Volume>
  <Writer>Kentaro Miura</Writer>
  <Genre>Action, Dark Fantasy</Genre>
</ComicInfo>"#;
    lib.zip("Berserk/book.cbz", &[("ComicInfo.xml", xml), ("01.png", PNG)]);
    import(&lib, false).await;

    let archive = lib.archive_at("Berserk/book.cbz").await.unwrap();
    assert_eq!(archive.title, "The Black Swordsman");
    assert_eq!(archive.volume, 1.0);
    assert!(archive.authors.contains("Kentaro Miura"));
    assert!(!archive.no_metadata);
    assert_eq!(archive.pages_count, 1);
}

#[tokio::test]
async fn reimport_repairs_history() {
    let lib = TestLibrary::new().await;
    lib.zip("S/v1.cbz", &[("01.png", PNG), ("02.png", PNG), ("03.png", PNG)]);
    import(&lib, false).await;
    let archive = lib.archive_at("S/v1.cbz").await.unwrap();
    history::save(&lib.pool, 7, &archive.content_id, 3, 3).await.unwrap();

    // The file loses a page; the reader position is clamped on re-import.
    lib.zip("S/v1.cbz", &[("01.png", PNG), ("02.png", PNG)]);
    let stats = import(&lib, true).await;
    assert_eq!(stats.history_repaired, 1);

    let row = history::get(&lib.pool, 7, &archive.content_id).await.unwrap().unwrap();
    assert_eq!(row.pages_count, 2);
    assert_eq!(row.current_page, 2);

    // Idempotent.
    assert_eq!(import(&lib, true).await.history_repaired, 0);
}

#[tokio::test]
async fn deleted_archive_waits_for_reimport() {
    let lib = TestLibrary::new().await;
    lib.zip("S/v1.cbz", &[("01.png", PNG)]);
    import(&lib, false).await;
    let archive = lib.archive_at("S/v1.cbz").await.unwrap();
    assert!(archives::set_deleted(&lib.pool, &archive.content_id, true).await.unwrap());

    lib.zip("S/v1.cbz", &[("01.png", PNG), ("02.png", PNG)]);
    let stats = import(&lib, false).await;
    assert_eq!(stats.imported, 0);
    assert!(lib.archive_at("S/v1.cbz").await.unwrap().deleted);

    import(&lib, true).await;
    let restored = lib.archive_at("S/v1.cbz").await.unwrap();
    assert!(!restored.deleted);
    assert_eq!(restored.content_id, archive.content_id);
    assert_eq!(restored.pages_count, 2);
}

#[tokio::test]
async fn corrupt_archive_is_counted_and_skipped() {
    let lib = TestLibrary::new().await;
    lib.zip("S/good.cbz", &[("01.png", PNG)]);
    let mut broken = b"PK\x03\x04".to_vec();
    broken.extend_from_slice(&[0u8; 64]);
    std::fs::write(lib.path("S/broken.cbz"), broken).unwrap();

    let settings = ImportSettings::from(&lib.config.library);
    let progress = Progress::default();
    let request = ImportRequest::folder(lib.root(), false, false);
    let stats = scanner::import_folder(&lib.pool, &settings, &request, &progress)
        .await
        .unwrap();

    assert_eq!(stats.imported, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(progress.total.load(Ordering::SeqCst), 2);
    assert_eq!(progress.processed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.failed.load(Ordering::SeqCst), 1);
    assert!(lib.archive_at("S/broken.cbz").await.is_none());
}

#[tokio::test]
async fn target_limits_the_pass() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    let b = lib.zip("B/v1.cbz", &[("01.png", PNG)]);

    let settings = ImportSettings::from(&lib.config.library);
    let mut request = ImportRequest::folder(lib.root(), false, false);
    request.target = Some(b);
    let stats = scanner::import_folder(&lib.pool, &settings, &request, &Progress::default())
        .await
        .unwrap();
    assert_eq!(stats.imported, 1);
    assert!(lib.archive_at("A/v1.cbz").await.is_none());
    assert!(lib.archive_at("B/v1.cbz").await.is_some());
}

#[tokio::test]
async fn cover_is_cached_on_import() {
    let lib = TestLibrary::new().await;
    lib.zip("S/v1.cbz", &[("02.png", PNG), ("cover.jpg", JPEG)]);
    import(&lib, false).await;

    let archive = lib.archive_at("S/v1.cbz").await.unwrap();
    assert_eq!(archive.cover_entry, "cover.jpg");
    let cover = tankobon::covers::find(lib.covers.path(), &archive.content_id).unwrap();
    assert_eq!(cover.mime, "image/jpeg");
    assert_eq!(cover.data, JPEG);
}

/// Whether the library's filesystem kept the cached id attribute on `path`.
fn has_cached_id(path: &Path) -> bool {
    matches!(xattr::get(path, ITEM_ATTR), Ok(Some(_)))
}

#[tokio::test]
async fn copy_with_attributes_gets_its_own_id() {
    let lib = TestLibrary::new().await;
    let source = lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    import(&lib, false).await;
    let original = lib.archive_at("A/v1.cbz").await.unwrap();

    // Same as `cp --preserve=xattr`.
    let copy = lib.path("B/v1.cbz");
    std::fs::create_dir_all(copy.parent().unwrap()).unwrap();
    std::fs::copy(&source, &copy).unwrap();
    if let Ok(Some(value)) = xattr::get(&source, ITEM_ATTR) {
        xattr::set(&copy, ITEM_ATTR, &value).unwrap();
    }

    let mut copy_id = None;
    for _ in 0..3 {
        let stats = import(&lib, false).await;
        assert_eq!(stats.duplicates, 0);
        let a = lib.archive_at("A/v1.cbz").await.unwrap();
        let b = lib.archive_at("B/v1.cbz").await.unwrap();
        assert_eq!(a.content_id, original.content_id);
        assert_ne!(b.content_id, a.content_id);
        assert_eq!(*copy_id.get_or_insert(b.content_id.clone()), b.content_id);
    }
    assert_eq!(counter(&lib, COUNTER_ALL_ARCHIVES).await, 2);
}

#[tokio::test]
async fn moved_file_keeps_its_id() {
    let lib = TestLibrary::new().await;
    let old = lib.zip("S/v1.cbz", &[("01.png", PNG)]);
    import(&lib, false).await;
    let before = lib.archive_at("S/v1.cbz").await.unwrap();

    let new = lib.path("T/Renamed v1.cbz");
    std::fs::create_dir_all(new.parent().unwrap()).unwrap();
    std::fs::rename(&old, &new).unwrap();
    let stats = import(&lib, false).await;
    assert_eq!(stats.imported, 1);
    assert_eq!(stats.archives_deleted, 1);

    let after = lib.archive_at("T/Renamed v1.cbz").await.unwrap();
    assert!(lib.archive_at("S/v1.cbz").await.is_none());
    if has_cached_id(&new) {
        assert_eq!(after.content_id, before.content_id);
    } else {
        assert_eq!(after.content_id, identity::path_hash(identity::ITEM_TAG, &new));
    }
}

#[tokio::test]
async fn unchanged_file_is_not_read_again() {
    let lib = TestLibrary::new().await;
    lib.zip("S/v1.cbz", &[("01.png", PNG)]);
    std::fs::write(lib.path("S/v1.json"), br#"{"title":"First Title"}"#).unwrap();
    import(&lib, false).await;
    assert_eq!(lib.archive_at("S/v1.cbz").await.unwrap().title, "First Title");

    // The file itself is untouched, so its metadata is not extracted again.
    std::fs::write(lib.path("S/v1.json"), br#"{"title":"Second Title"}"#).unwrap();
    let stats = import(&lib, false).await;
    assert_eq!(stats.unchanged, 1);
    assert_eq!(lib.archive_at("S/v1.cbz").await.unwrap().title, "First Title");

    import(&lib, true).await;
    assert_eq!(lib.archive_at("S/v1.cbz").await.unwrap().title, "Second Title");
}
