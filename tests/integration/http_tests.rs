use axum::http::StatusCode;

use tankobon::db::queries::{chapters, history};
use tankobon::scanner;

use super::*;

/// Library with one two-chapter archive, imported before the app starts.
async fn setup() -> (TestLibrary, AppState, Archive) {
    let lib = TestLibrary::new().await;
    lib.zip(
        "Naruto/Naruto v01.cbz",
        &[
            ("Naruto 1/01.png", PNG),
            ("Naruto 1/02.jpg", JPEG),
            ("Naruto 2/01.png", PNG),
        ],
    );
    scanner::run_scan(&lib.pool, &lib.config).await.unwrap();
    let archive = lib.archive_at("Naruto/Naruto v01.cbz").await.unwrap();
    let state = AppState::new(lib.config.clone(), lib.pool.clone());
    (lib, state, archive)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_lib, state, _archive) = setup().await;
    let resp = get(test_router(state), "/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["import"], "idle");
}

#[tokio::test]
async fn item_details_include_chapters() {
    let (_lib, state, archive) = setup().await;
    let app = test_router(state);

    let resp = get(app.clone(), &format!("/items/{}", archive.content_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["content_id"], archive.content_id.as_str());
    assert_eq!(json["volume"], 1.0);
    assert_eq!(json["pages_count"], 3);
    assert_eq!(json["series"]["title"], "Naruto");
    assert_eq!(json["chapters"].as_array().unwrap().len(), 2);
    assert!(json.get("page_entries").is_none());

    let missing = get(app, "/items/nope").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pages_are_served_by_archive_and_chapter() {
    let (lib, state, archive) = setup().await;
    let app = test_router(state);

    let resp = get(app.clone(), &format!("/items/{}/page/2", archive.content_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(body_bytes(resp).await, JPEG);

    let list = chapters::list_by_archive(&lib.pool, &archive.content_id).await.unwrap();
    let second = &list[1];
    let resp = get(app.clone(), &format!("/items/{}/page/1?convert=true", second.chapter_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");

    let out_of_range = get(app.clone(), &format!("/items/{}/page/4", archive.content_id)).await;
    assert_eq!(out_of_range.status(), StatusCode::NOT_FOUND);
    let zero = get(app, &format!("/items/{}/page/0", archive.content_id)).await;
    assert_eq!(zero.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cover_is_served() {
    let (_lib, state, archive) = setup().await;
    let resp = get(test_router(state), &format!("/items/{}/cover", archive.content_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(body_bytes(resp).await, PNG);
}

#[tokio::test]
async fn delete_hides_the_item() {
    let (_lib, state, archive) = setup().await;
    let app = test_router(state.clone());
    let id = archive.content_id.as_str();

    // Warm the cache so eviction is observable.
    assert_eq!(get(app.clone(), &format!("/items/{id}/page/1")).await.status(), StatusCode::OK);
    assert!(!state.cache.is_empty());

    let resp = send(app.clone(), "DELETE", &format!("/items/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(state.cache.is_empty());

    assert_eq!(get(app.clone(), &format!("/items/{id}")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        get(app.clone(), &format!("/items/{id}/page/1")).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        send(app, "DELETE", "/items/nope", None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn history_is_saved_with_page_count() {
    let (lib, state, archive) = setup().await;
    let app = test_router(state);
    let id = archive.content_id.as_str();

    let resp = send(
        app.clone(),
        "POST",
        &format!("/items/{id}/history"),
        Some(serde_json::json!({ "user_id": 3, "current_page": 2 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let row = history::get(&lib.pool, 3, id).await.unwrap().unwrap();
    assert_eq!(row.pages_count, 3);
    assert_eq!(row.current_page, 2);

    let bad = send(
        app,
        "POST",
        &format!("/items/{id}/history"),
        Some(serde_json::json!({ "user_id": 3, "current_page": 9 })),
    )
    .await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn library_rescan_and_status() {
    let (lib, state, archive) = setup().await;
    let scheduler = Arc::clone(&state.scheduler);
    let app = test_router(state);

    let resp = send(app.clone(), "POST", "/library/rescan?reimport=true", None).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(resp).await["queued"], 1);

    let busy = send(app.clone(), "POST", "/library/rescan", None).await;
    assert_eq!(busy.status(), StatusCode::CONFLICT);

    wait_idle(&scheduler).await;
    let status = body_json(get(app.clone(), "/library/status").await).await;
    assert_eq!(status["scheduler"]["state"], "idle");
    assert_eq!(status["scheduler"]["last_batch"]["imported"], 1);
    assert_eq!(status["counters"]["allarchives"], 1);

    let item = send(
        app.clone(),
        "POST",
        &format!("/library/items/{}/rescan", archive.content_id),
        None,
    )
    .await;
    assert_eq!(item.status(), StatusCode::ACCEPTED);
    wait_idle(&scheduler).await;

    let folder_id = tankobon::db::queries::folders::get_all(&lib.pool).await.unwrap()[0].id;
    let folder = send(app.clone(), "POST", &format!("/library/folders/{folder_id}/rescan"), None).await;
    assert_eq!(folder.status(), StatusCode::ACCEPTED);
    wait_idle(&scheduler).await;

    let missing = send(app, "POST", "/library/folders/999/rescan", None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

fn multipart_body(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn upload(app: Router, filename: &str, data: &[u8]) -> axum::response::Response {
    let boundary = "tankobon-test-boundary";
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/uploader/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(multipart_body(boundary, filename, data)))
        .unwrap();
    app.oneshot(req).await.unwrap()
}

#[tokio::test]
async fn upload_lands_in_library_and_is_imported() {
    let lib = TestLibrary::new().await;
    let upload_dir = lib.path("uploads");
    let config = test_config_with_upload(lib.root(), lib.covers.path(), &upload_dir);
    let state = AppState::new(config, lib.pool.clone());
    let scheduler = Arc::clone(&state.scheduler);
    let app = test_router(state);

    let tmp = tempfile::tempdir().unwrap();
    let zip_path = tmp.path().join("x.cbz");
    write_zip(&zip_path, &[("01.png", PNG)]);
    let data = std::fs::read(&zip_path).unwrap();

    let resp = upload(app.clone(), "Dorohedoro v01.cbz", &data).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["queued"], true);
    assert!(upload_dir.join("Dorohedoro v01.cbz").exists());

    wait_idle(&scheduler).await;
    let archive = lib.archive_at("uploads/Dorohedoro v01.cbz").await.unwrap();
    assert_eq!(archive.volume, 1.0);

    let rejected = upload(app, "notes.txt", b"hello").await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_is_forbidden_when_disabled() {
    let (_lib, state, _archive) = setup().await;
    let resp = upload(test_router(state), "a.cbz", b"PK").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
