use tankobon::cache::ItemCache;
use tankobon::db::queries::folders;
use tankobon::scheduler::SchedulerError;

use super::*;

fn start(lib: &TestLibrary) -> (Arc<ImportScheduler>, Arc<ItemCache>) {
    let cache = Arc::new(ItemCache::new());
    let scheduler = ImportScheduler::start(lib.pool.clone(), &lib.config, Arc::clone(&cache));
    (scheduler, cache)
}

#[tokio::test]
async fn batch_runs_to_idle_and_reports() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    lib.zip("B/v1.cbz", &[("01.png", PNG)]);
    let (scheduler, _cache) = start(&lib);
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let queued = scheduler.rescan_all(false, false).await.unwrap();
    assert_eq!(queued, 1);
    assert_ne!(scheduler.state(), SchedulerState::Idle);

    wait_idle(&scheduler).await;
    let status = scheduler.status();
    assert_eq!(status.queued, 0);
    assert_eq!(status.active, 0);
    assert_eq!(status.completed, 1);
    assert_eq!(status.files_total, 2);
    assert_eq!(status.files_processed, 2);
    let last = status.last_batch.unwrap();
    assert_eq!(last.imported, 2);
    assert_eq!(last.errors, 0);

    assert!(lib.archive_at("A/v1.cbz").await.is_some());
    let s = tankobon::db::queries::series::get_by_id(
        &lib.pool,
        &lib.archive_at("B/v1.cbz").await.unwrap().series_id,
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(s.volumes_count, 1);
}

#[tokio::test]
async fn second_batch_is_rejected_while_running() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    let (scheduler, _cache) = start(&lib);

    scheduler.rescan_all(false, false).await.unwrap();
    let second = scheduler.rescan_all(false, false).await;
    assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));

    wait_idle(&scheduler).await;
    assert!(scheduler.rescan_all(false, false).await.is_ok());
    wait_idle(&scheduler).await;
}

#[tokio::test]
async fn empty_batch_stays_idle() {
    let lib = TestLibrary::new().await;
    sqlx::query("DELETE FROM folders").execute(&lib.pool).await.unwrap();
    let (scheduler, _cache) = start(&lib);

    assert_eq!(scheduler.rescan_all(false, false).await.unwrap(), 0);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(scheduler.status().last_batch.is_none());
}

#[tokio::test]
async fn rescan_folder_and_unknown_targets() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    let (scheduler, _cache) = start(&lib);

    let folder = folders::get_all(&lib.pool).await.unwrap().remove(0);
    assert_eq!(scheduler.rescan_folder(folder.id, false, false).await.unwrap(), 1);
    wait_idle(&scheduler).await;
    assert!(lib.archive_at("A/v1.cbz").await.is_some());

    assert!(matches!(
        scheduler.rescan_folder(9999, false, false).await,
        Err(SchedulerError::NotFound(_))
    ));
    assert!(matches!(
        scheduler.rescan_item("missing").await,
        Err(SchedulerError::NotFound(_))
    ));
    assert!(matches!(
        scheduler.rescan_path(Path::new("/definitely/elsewhere.cbz")).await,
        Err(SchedulerError::OutsideLibrary(_))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn rescan_item_rereads_the_file() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    let (scheduler, _cache) = start(&lib);
    scheduler.rescan_all(false, false).await.unwrap();
    wait_idle(&scheduler).await;
    let before = lib.archive_at("A/v1.cbz").await.unwrap();

    lib.zip("A/v1.cbz", &[("01.png", PNG), ("02.png", PNG)]);
    scheduler.rescan_item(&before.content_id).await.unwrap();
    wait_idle(&scheduler).await;

    let after = lib.archive_at("A/v1.cbz").await.unwrap();
    assert_eq!(after.content_id, before.content_id);
    assert_eq!(after.pages_count, 2);
}

#[tokio::test]
async fn drain_invalidates_item_cache() {
    let lib = TestLibrary::new().await;
    lib.zip("A/v1.cbz", &[("01.png", PNG)]);
    let (scheduler, cache) = start(&lib);
    scheduler.rescan_all(false, false).await.unwrap();
    wait_idle(&scheduler).await;

    let archive = lib.archive_at("A/v1.cbz").await.unwrap();
    assert!(cache.resolve(&lib.pool, &archive.content_id).await.unwrap().is_some());
    assert_eq!(cache.len(), 1);

    scheduler.rescan_path(&lib.path("A/v1.cbz")).await.unwrap();
    wait_idle(&scheduler).await;
    assert!(cache.is_empty());
}
