use std::path::Path;

use bytes::Bytes;
use poem::http::StatusCode;
use poem::test::{TestClient, TestResponse};
use poem::Route;
use poem_openapi::OpenApiService;

use crate::config::RuntimeConfig;
use crate::controller::ImageController;
use crate::test_utils::png_bytes;

const MEMORY_CONFIG: &str = include_str!("../tests/configs/memory.yaml");
const LAZY_CONFIG: &str = include_str!("../tests/configs/memory-lazy.yaml");
const PERSISTENT_CONFIG: &str = include_str!("../tests/configs/persistent.yaml");

async fn setup_environment(cfg: &str) -> anyhow::Result<TestClient<Route>> {
    let cfg = RuntimeConfig::from_yaml(cfg)?;
    let controller = ImageController::from_config(&cfg).await?;

    let app = OpenApiService::new(
        crate::routes::ImageApi::new(controller),
        "Image Host API",
        env!("CARGO_PKG_VERSION"),
    );

    let app = Route::new().nest("/v1", app);
    Ok(TestClient::new(app))
}

fn persistent_config(data_dir: &Path) -> String {
    PERSISTENT_CONFIG.replace("{data_dir}", &data_dir.display().to_string())
}

async fn upload(app: &TestClient<Route>, file_name: &str, data: Bytes) -> String {
    let res = app
        .post("/v1/images")
        .body(data)
        .content_type("application/octet-stream")
        .query("file_name", &file_name)
        .send()
        .await;

    res.assert_status_is_ok();
    let info = res.json().await;
    info.value().object().get("id").string().to_string()
}

async fn body_of(res: TestResponse) -> Bytes {
    res.0.into_body().into_bytes().await.unwrap()
}

fn dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

#[tokio::test]
async fn test_upload_and_fetch_metadata() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let data = png_bytes(800, 600);

    let res = app
        .post("/v1/images")
        .body(data.clone())
        .content_type("application/octet-stream")
        .query("file_name", &"beach.png")
        .send()
        .await;

    res.assert_status_is_ok();
    let info = res.json().await;
    let info = info.value().object();
    info.get("width").assert_i64(800);
    info.get("height").assert_i64(600);
    info.get("checksum").assert_i64(crc32fast::hash(&data) as i64);
    let file_id = info.get("id").string().to_string();
    info.get("storedPath")
        .assert_string(&format!("original/{}.png", file_id));

    let res = app.get(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    let record = res.json().await;
    let record = record.value().object();
    record.get("originalFileName").assert_string("beach.png");
    record.get("contentType").assert_string("image/png");
    record.get("width").assert_i64(800);
    record.get("isCompressed").assert_bool(false);

    let res = app.get("/v1/images").send().await;
    res.assert_status_is_ok();
    res.json().await.value().array().assert_len(1);

    let res = app.get(format!("/v1/images/{}/original", file_id)).send().await;
    res.assert_status_is_ok();
    res.assert_content_type("image/png");
    res.assert_header("content-disposition", "inline; filename=\"beach.png\"");
    assert_eq!(body_of(res).await, data);

    Ok(())
}

#[tokio::test]
async fn test_bad_uploads_are_rejected() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;

    let res = app
        .post("/v1/images")
        .body(Bytes::new())
        .content_type("application/octet-stream")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let res = app
        .post("/v1/images")
        .body("this is not an image")
        .content_type("application/octet-stream")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let res = app
        .post("/v1/images")
        .body(vec![0u8; 4 * 1024 * 1024 + 1])
        .content_type("application/octet-stream")
        .send()
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);

    let res = app.get("/v1/images").send().await;
    res.assert_status_is_ok();
    res.json().await.value().array().assert_is_empty();

    Ok(())
}

#[tokio::test]
async fn test_unknown_images_are_not_found() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let missing = uuid::Uuid::new_v4();

    for path in [
        format!("/v1/images/{}", missing),
        format!("/v1/images/{}/original", missing),
        format!("/v1/images/{}/resolutions", missing),
        format!("/v1/images/{}/resolutions/thumbnail", missing),
    ] {
        app.get(&path).send().await.assert_status(StatusCode::NOT_FOUND);
    }

    app.get(format!("/v1/images/{}/resize", missing))
        .query("width", &10)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.post(format!("/v1/images/{}/resolutions", missing))
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.put(format!("/v1/images/{}", missing))
        .body(png_bytes(10, 10))
        .content_type("application/octet-stream")
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let res = app.delete(format!("/v1/images/{}", missing)).send().await;
    res.assert_status_is_ok();
    res.json().await.value().object().get("deleted").assert_bool(false);

    Ok(())
}

#[tokio::test]
async fn test_resize_preserves_aspect_ratio() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let file_id = upload(&app, "landscape.png", png_bytes(800, 600)).await;

    let res = app
        .get(format!("/v1/images/{}/resize", file_id))
        .query("height", &300)
        .send()
        .await;
    res.assert_status_is_ok();
    res.assert_content_type("image/jpeg");
    res.assert_header("content-disposition", "inline; filename=\"landscape_300h.jpeg\"");
    assert_eq!(dimensions(&body_of(res).await), (400, 300));

    let res = app
        .get(format!("/v1/images/{}/resize", file_id))
        .query("width", &100)
        .query("height", &250)
        .send()
        .await;
    res.assert_status_is_ok();
    assert_eq!(dimensions(&body_of(res).await), (100, 250));

    Ok(())
}

#[tokio::test]
async fn test_resize_rejections() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let file_id = upload(&app, "landscape.png", png_bytes(800, 600)).await;

    app.get(format!("/v1/images/{}/resize", file_id))
        .send()
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("height", &900)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &0)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &-20)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_named_resolutions() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let file_id = upload(&app, "small.png", png_bytes(200, 170)).await;

    let res = app.get(format!("/v1/images/{}/resolutions", file_id)).send().await;
    res.assert_status_is_ok();
    let names = res.json().await;
    let names = names.value().array();
    names.assert_len(2);
    names.get(0).assert_string("original");
    names.get(1).assert_string("thumbnail");

    let res = app
        .get(format!("/v1/images/{}/resolutions/Thumbnail", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    res.assert_content_type("image/jpeg");
    res.assert_header("content-disposition", "inline; filename=\"small_160w.jpeg\"");
    assert_eq!(dimensions(&body_of(res).await), (160, 136));

    let res = app
        .get(format!("/v1/images/{}/resolutions/original", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    res.assert_content_type("image/png");

    app.get(format!("/v1/images/{}/resolutions/medium", file_id))
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.get(format!("/v1/images/{}/resolutions/gigantic", file_id))
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_bulk_generation() -> anyhow::Result<()> {
    let app = setup_environment(LAZY_CONFIG).await?;
    let file_id = upload(&app, "huge.png", png_bytes(2000, 1500)).await;

    let res = app
        .post(format!("/v1/images/{}/resolutions", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    let report = res.json().await;
    let report = report.value().object();
    report.get("skipped").array().assert_is_empty();

    let generated = report.get("generated").array();
    generated.assert_len(5);
    for (idx, name) in ["thumbnail", "small", "medium", "large", "xlarge"].iter().enumerate() {
        generated.get(idx).assert_string(name);
    }

    let res = app
        .post(format!("/v1/images/{}/resolutions", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    let report = res.json().await;
    let report = report.value().object();
    report.get("generated").array().assert_is_empty();

    let skipped = report.get("skipped").array();
    skipped.assert_len(5);
    for (idx, name) in ["thumbnail", "small", "medium", "large", "xlarge"].iter().enumerate() {
        let entry = skipped.get(idx).object();
        entry.get("name").assert_string(name);
        entry.get("reason").assert_string("already exists");
    }

    let res = app
        .get(format!("/v1/images/{}/resolutions/xlarge", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    assert_eq!(dimensions(&body_of(res).await), (1920, 1440));

    Ok(())
}

#[tokio::test]
async fn test_update_replaces_the_image() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let file_id = upload(&app, "before.png", png_bytes(800, 600)).await;

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &600)
        .send()
        .await
        .assert_status_is_ok();

    let replacement = png_bytes(300, 300);
    let res = app
        .put(format!("/v1/images/{}", file_id))
        .body(replacement.clone())
        .content_type("application/octet-stream")
        .query("file_name", &"after.png")
        .send()
        .await;
    res.assert_status_is_ok();
    let info = res.json().await;
    info.value().object().get("id").assert_string(&file_id);
    info.value().object().get("width").assert_i64(300);

    let res = app.get(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    let record = res.json().await;
    record.value().object().get("width").assert_i64(300);
    record.value().object().get("originalFileName").assert_string("after.png");

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &600)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let res = app.get(format!("/v1/images/{}/original", file_id)).send().await;
    res.assert_status_is_ok();
    assert_eq!(body_of(res).await, replacement);

    app.put(format!("/v1/images/{}", file_id))
        .body("garbage")
        .content_type("application/octet-stream")
        .send()
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_delete_removes_the_image() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;
    let file_id = upload(&app, "doomed.png", png_bytes(400, 400)).await;

    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &123)
        .send()
        .await
        .assert_status_is_ok();

    let res = app.delete(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    res.json().await.value().object().get("deleted").assert_bool(true);

    app.get(format!("/v1/images/{}", file_id))
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.get(format!("/v1/images/{}/resize", file_id))
        .query("width", &123)
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let res = app.delete(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    res.json().await.value().object().get("deleted").assert_bool(false);

    let new_id = upload(&app, "doomed.png", png_bytes(400, 400)).await;
    assert_ne!(new_id, file_id);

    Ok(())
}

#[tokio::test]
async fn test_invalid_ids_are_rejected() -> anyhow::Result<()> {
    let app = setup_environment(MEMORY_CONFIG).await?;

    app.get("/v1/images/not-a-uuid")
        .send()
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_persistent_backends_survive_restarts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = persistent_config(dir.path());

    let file_id = {
        let app = setup_environment(&cfg).await?;
        let file_id = upload(&app, "kept.png", png_bytes(640, 480)).await;

        let res = app
            .get(format!("/v1/images/{}/resize", file_id))
            .query("width", &320)
            .send()
            .await;
        res.assert_status_is_ok();
        res.assert_content_type("image/png");

        file_id
    };

    let app = setup_environment(&cfg).await?;

    let res = app.get(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    res.json().await.value().object().get("width").assert_i64(640);

    let res = app
        .post(format!("/v1/images/{}/resolutions", file_id))
        .send()
        .await;
    res.assert_status_is_ok();
    let report = res.json().await;
    let report = report.value().object();
    let generated = report.get("generated").array();
    generated.assert_len(2);
    generated.get(0).assert_string("thumbnail");
    generated.get(1).assert_string("medium");

    let skipped = report.get("skipped").array();
    skipped.assert_len(3);
    skipped.get(0).object().get("name").assert_string("small");
    skipped.get(0).object().get("reason").assert_string("already exists");

    let res = app.delete(format!("/v1/images/{}", file_id)).send().await;
    res.assert_status_is_ok();
    res.json().await.value().object().get("deleted").assert_bool(true);

    assert!(!dir.path().join(format!("blobs/original/{}.png", file_id)).exists());

    Ok(())
}
