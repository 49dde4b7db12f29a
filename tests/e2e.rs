//! End-to-end tests against the real pdfium library.
//!
//! Gated behind `E2E_ENABLED` because pdfium is loaded at runtime and is not
//! installed everywhere. The library is found through `PDFIUM_LIB_PATH`, the
//! working directory, or the system search path.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=./libpdfium.so cargo test --test e2e -- --nocapture

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use ezread::pipeline::inspect::{inspect, PageSize};
use ezread::pipeline::recolor::{DARK_BACKGROUND, LIGHT_FOREGROUND};
use ezread::server::{router, AppState};
use ezread::{
    convert_document, CancelFlag, ConversionRequest, ConversionService, ConvertResponse,
    MemoryArtifactStore, NoopProgressCallback, PdfiumRasterizer, PipelineConfig, ServiceConfig,
};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Skip unless `E2E_ENABLED` is set and pdfium can be bound.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        match PdfiumRasterizer::bind(None) {
            Ok(r) => r,
            Err(e) => {
                println!("SKIP — {e}");
                return;
            }
        }
    }};
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A 2 × 1 inch page whose left half is filled black.
fn half_black_pdf(pages: usize) -> bytes::Bytes {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(
        Dictionary::new(),
        b"0 0 0 rg\n0 0 72 72 re\nf\n".to_vec(),
    ));
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(144),
                    Object::Integer(72),
                ],
                "Contents" => content_id,
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialise test PDF");
    bytes::Bytes::from(out)
}

fn request(quality: &str, pages: usize) -> ConversionRequest {
    ConversionRequest::validate(half_black_pdf(pages), Some(quality), None, usize::MAX)
        .expect("valid request")
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[test]
fn test_real_page_is_recolored() {
    let rasterizer = e2e_skip_unless_ready!();

    let out = convert_document(
        &request("low", 1),
        &PipelineConfig::default(),
        &rasterizer,
        &CancelFlag::new(),
        &NoopProgressCallback,
    )
    .expect("conversion should succeed");

    let preview = image::load_from_memory(&out.preview_png)
        .expect("preview is a PNG")
        .to_rgb8();
    // 2 × 1 inch at 300 DPI.
    assert_eq!(preview.dimensions(), (600, 300));
    // Interior of the black half, interior of the white half.
    assert_eq!(*preview.get_pixel(150, 150), LIGHT_FOREGROUND);
    assert_eq!(*preview.get_pixel(450, 150), DARK_BACKGROUND);

    println!(
        "✓ preview {} bytes, pdf {} bytes",
        out.preview_png.len(),
        out.output_pdf.len()
    );
}

#[test]
fn test_output_keeps_page_count_and_sizes() {
    let rasterizer = e2e_skip_unless_ready!();

    let out = convert_document(
        &request("medium", 3),
        &PipelineConfig::default(),
        &rasterizer,
        &CancelFlag::new(),
        &NoopProgressCallback,
    )
    .expect("conversion should succeed");

    let info = inspect(&out.output_pdf, 10).expect("output parses");
    assert_eq!(info.page_count(), 3);
    for page in &info.pages {
        assert_eq!(
            *page,
            PageSize {
                width_pt: 144.0,
                height_pt: 72.0
            }
        );
    }
}

#[test]
fn test_real_renders_are_deterministic() {
    let rasterizer = e2e_skip_unless_ready!();
    let config = PipelineConfig::default();

    let run = || {
        convert_document(
            &request("medium", 2),
            &config,
            &rasterizer,
            &CancelFlag::new(),
            &NoopProgressCallback,
        )
        .expect("conversion should succeed")
    };
    let (a, b) = (run(), run());
    assert_eq!(a.preview_png, b.preview_png);
    assert_eq!(a.output_pdf, b.output_pdf);
}

#[test]
fn test_size_grows_with_quality() {
    let rasterizer = e2e_skip_unless_ready!();

    let sizes: Vec<usize> = ["low", "medium", "high"]
        .iter()
        .map(|q| {
            convert_document(
                &request(q, 1),
                &PipelineConfig::default(),
                &rasterizer,
                &CancelFlag::new(),
                &NoopProgressCallback,
            )
            .expect("conversion should succeed")
            .output_pdf
            .len()
        })
        .collect();
    println!("sizes: {sizes:?}");
    assert!(sizes[0] <= sizes[1] && sizes[1] <= sizes[2]);
}

// ── Service ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_through_http_with_pdfium() {
    let rasterizer = e2e_skip_unless_ready!();

    let config = ServiceConfig::builder()
        .max_concurrent(1)
        .build()
        .expect("valid config");
    let store = Arc::new(MemoryArtifactStore::new(Duration::from_secs(60)));
    let service = ConversionService::new(config, store, Arc::new(rasterizer));
    let app = router(AppState::new(service));

    let boundary = "ezread-e2e";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"quality\"\r\n\r\nmedium\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"half.pdf\"\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&half_black_pdf(1));
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert-pdf/")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    let out: ConvertResponse = serde_json::from_slice(&bytes).expect("json");

    let image = app
        .oneshot(
            Request::builder()
                .uri(&out.image_url)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");
    let png = axum::body::to_bytes(image.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(!png.is_empty());
}
