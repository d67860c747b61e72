//! End-to-end tests for newsletter-store.
//!
//! The local-storage and conversion tests run everywhere: storage uses a
//! temp directory and the screenshot service is a wiremock server that
//! returns a generated PNG.
//!
//! The Cloudinary round trip makes live API calls and is gated behind
//! `E2E_ENABLED` plus the usual `CLOUDINARY_*` variables:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use chrono::Utc;
use lopdf::Document;
use newsletter_store::storage::month_partition;
use newsletter_store::{
    conversion_config_from_options, convert_file, html_to_pdf, ConversionConfig, DownloadPayload,
    NewsletterError, ScreenshotClient, ScreenshotConfig, StorageConfig, StorageKind,
    StorageManager,
};
use serde_json::json;
use std::io::Cursor;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set and Cloudinary is configured.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run live e2e tests");
            return;
        }
        match StorageConfig::from_env() {
            Ok(c) if c.kind == StorageKind::Cloudinary => c,
            _ => {
                println!("SKIP: STORAGE_TYPE=cloudinary and CLOUDINARY_* credentials required");
                return;
            }
        }
    }};
}

fn local_manager(dir: &TempDir) -> StorageManager {
    let config = StorageConfig::builder()
        .kind(StorageKind::Local)
        .local_path(dir.path())
        .cache_ttl_secs(120)
        .build()
        .unwrap();
    StorageManager::new(&config).unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn screenshot_server(png_bytes: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/screenshot"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_bytes),
        )
        .mount(&server)
        .await;
    server
}

fn screenshot_client(server: &MockServer) -> ScreenshotClient {
    ScreenshotClient::new(ScreenshotConfig {
        token: Some("test-token".into()),
        endpoint: format!("{}/screenshot", server.uri()),
        timeout_secs: 10,
        ..Default::default()
    })
    .unwrap()
}

/// `(width, height)` of the single page's MediaBox, in points.
fn single_page_size(pdf: &[u8]) -> (f32, f32) {
    let doc = Document::load_mem(pdf).expect("valid PDF");
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1, "expected exactly one page");

    let page_id = *pages.values().next().unwrap();
    let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
    let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
    (
        media_box[2].as_float().unwrap(),
        media_box[3].as_float().unwrap(),
    )
}

// ── Local storage ────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_lifecycle_upload_list_save_download_delete() {
    let dir = TempDir::new().unwrap();
    let storage = local_manager(&dir);

    let stored = storage
        .upload(b"<h1>Spring</h1>", "Report%202024.html")
        .await
        .into_result()
        .unwrap();
    let partition = month_partition("newsletters", Utc::now());
    assert_eq!(stored.file_id, format!("{partition}/Report 2024.html"));
    assert!(dir.path().join(&stored.file_id).is_file());

    let files = storage.list_files(&format!("{partition}/")).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].display_name, "Report 2024.html");
    assert_eq!(files[0].public_id, stored.file_id);
    assert_eq!(files[0].format, "html");

    // Editor round trip: save through the encoded id, read through the clean one.
    let encoded_id = format!("{partition}/Report%202024.html");
    assert!(storage.save(&encoded_id, b"<h1>Summer</h1>").await);
    let payload = DownloadPayload::fetch(&storage, &stored.file_id).await.unwrap();
    assert_eq!(payload.bytes, b"<h1>Summer</h1>");
    assert_eq!(payload.filename, "Report 2024.html");
    assert_eq!(payload.content_type, "text/html");

    // Still one file after the save; the cache was invalidated.
    assert_eq!(storage.list_files(&format!("{partition}/")).await.len(), 1);

    assert!(storage.delete(&stored.file_id).await);
    assert!(storage.list_files("").await.is_empty());
    let err = storage.download(&stored.file_id).await.unwrap_err();
    assert!(matches!(err, NewsletterError::NotFound { .. }));
    // Empty month and year folders are pruned; the storage root survives.
    assert!(!dir.path().join(&partition).exists());
    assert!(dir.path().exists());
}

#[tokio::test]
async fn local_rejects_traversal_everywhere() {
    let dir = TempDir::new().unwrap();
    let storage = local_manager(&dir);

    assert!(storage.download("../../etc/passwd").await.is_err());
    assert!(!storage.save("../escape.html", b"x").await);
    assert!(!storage.delete("../escape.html").await);
    assert!(storage.list_files("../").await.is_empty());
    assert!(!dir.path().parent().unwrap().join("escape.html").exists());
}

#[tokio::test]
async fn local_file_url_is_percent_encoded() {
    let dir = TempDir::new().unwrap();
    let storage = local_manager(&dir);
    assert_eq!(
        storage.file_url("newsletters/2026/October/Report 2024.html"),
        "/static/files/newsletters/2026/October/Report%202024.html"
    );
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn tall_screenshot_becomes_one_tall_page() {
    let server = screenshot_server(png(1000, 2000)).await;
    let client = screenshot_client(&server);

    let converted = html_to_pdf("<html><body><h1>Issue</h1></body></html>", &ConversionConfig::default(), &client)
        .await
        .unwrap();

    assert_eq!(converted.layout.page_width, 1275);
    assert_eq!(converted.layout.page_height, 2074);

    let (width, height) = single_page_size(&converted.pdf);
    assert!((width - 612.0).abs() < 0.5, "width {width}");
    assert!(height > 11.0 * 72.0, "page should grow past letter height, got {height}");
}

#[tokio::test]
async fn options_object_drives_the_layout() {
    let server = screenshot_server(png(400, 300)).await;
    let client = screenshot_client(&server);

    let options = json!({"pageWidth": 4, "pageHeight": 4, "DPI": 100, "margin": 0, "allowScaleUp": "no"});
    let config = conversion_config_from_options(options.as_object().unwrap());
    let converted = html_to_pdf("<p>x</p>", &config, &client).await.unwrap();

    // 4 in at 100 dpi; no upscaling, so the image keeps its size.
    assert_eq!(converted.layout.page_width, 400);
    assert_eq!(converted.layout.page_height, 400);
    assert!((converted.layout.scale - 1.0).abs() < 1e-9);
    assert_eq!(converted.layout.image_width, 400);

    let (width, height) = single_page_size(&converted.pdf);
    assert!((width - 288.0).abs() < 0.5, "width {width}");
    assert!((height - 288.0).abs() < 0.5, "height {height}");
}

#[tokio::test]
async fn convert_file_writes_pdf_atomically() {
    let server = screenshot_server(png(800, 600)).await;
    let client = screenshot_client(&server);

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("issue.html");
    std::fs::write(&input, "<p>hello</p>").unwrap();
    let output = dir.path().join("out/issue.pdf");

    convert_file(&input, &output, &ConversionConfig::default(), &client)
        .await
        .unwrap();

    let pdf = std::fs::read(&output).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    single_page_size(&pdf);
    assert!(!dir.path().join("out/issue.pdf.tmp").exists());
}

#[tokio::test]
async fn screenshot_failure_is_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let err = html_to_pdf("<p/>", &ConversionConfig::default(), &screenshot_client(&server))
        .await
        .unwrap_err();
    match err {
        NewsletterError::ScreenshotFailed { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_image_response_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a png</html>"))
        .mount(&server)
        .await;

    let err = html_to_pdf("<p/>", &ConversionConfig::default(), &screenshot_client(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, NewsletterError::ImageDecode(_)));
}

// ── Live Cloudinary ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cloudinary_round_trip() {
    let config = e2e_skip_unless_ready!();
    let storage = StorageManager::new(&config).unwrap();

    let name = format!("e2e {}.html", Utc::now().timestamp_millis());
    let stored = storage
        .upload(b"<p>e2e</p>", &name)
        .await
        .into_result()
        .expect("upload");
    println!("uploaded {} → {}", stored.file_id, stored.url);

    let files = storage.list_files(&config.upload_folder).await;
    assert!(files.iter().any(|f| f.public_id == stored.file_id));

    assert!(storage.save(&stored.file_id, b"<p>edited</p>").await);
    assert!(storage.delete(&stored.file_id).await);
}
