//! Shared helpers for the integration tests.
//!
//! [`PatternRasterizer`] stands in for pdfium: it paints a deterministic
//! black-and-white pattern at the requested size, so the whole service can
//! be exercised without the native library.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request};
use bytes::Bytes;
use ezread::pipeline::render::{PageRasterizer, RenderPlan, RenderedPage};
use ezread::{
    ArtifactStore, ConversionService, MemoryArtifactStore, ServiceConfig, ServiceError,
};
use image::{Rgb, RgbImage};
use lopdf::{dictionary, Document, Object};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "ezread-test-boundary-7MA4YWxkTrZu0gW";

/// Paints 8 px black squares on white, optionally sleeping per page.
#[derive(Default)]
pub struct PatternRasterizer {
    pub page_delay: Duration,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl PatternRasterizer {
    pub fn slow(page_delay: Duration) -> Self {
        Self {
            page_delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl PageRasterizer for PatternRasterizer {
    fn rasterize(
        &self,
        _source: &[u8],
        plan: &RenderPlan,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), ServiceError>,
    ) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = (0..plan.pages.len()).try_for_each(|index| {
            if !self.page_delay.is_zero() {
                std::thread::sleep(self.page_delay);
            }
            let (w, h) = plan.target(index);
            let image = RgbImage::from_fn(w, h, |x, y| {
                if ((x / 8) + (y / 8) + index as u32) % 2 == 0 {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                }
            });
            sink(RenderedPage { index, image })
        });

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A PDF with `pages` pages of `width_pt` × `height_pt` points.
pub fn pdf_with_pages(pages: usize, width_pt: i64, height_pt: i64) -> Bytes {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let media_box = vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width_pt),
                Object::Integer(height_pt),
            ];
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => media_box,
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
    Bytes::from(out)
}

/// One-page, one-inch-square PDF.
pub fn small_pdf() -> Bytes {
    pdf_with_pages(1, 72, 72)
}

pub fn memory_store() -> Arc<dyn ArtifactStore> {
    Arc::new(MemoryArtifactStore::new(Duration::from_secs(3600)))
}

pub fn service_with(
    config: ServiceConfig,
    store: Arc<dyn ArtifactStore>,
    rasterizer: Arc<PatternRasterizer>,
) -> ConversionService {
    ConversionService::new(config, store, rasterizer)
}

/// A multipart body with optional `file` and `quality` parts.
pub fn multipart_body(file: Option<(&str, &[u8])>, quality: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(q) = quality {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"quality\"\r\n\r\n{q}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST /convert-pdf/ with a `file` part.
pub fn upload_request(filename: &str, pdf: &[u8], quality: Option<&str>) -> Request<Body> {
    multipart_request(Some((filename, pdf)), quality)
}

/// POST /convert-pdf/ with no `file` part.
pub fn upload_request_without_file(quality: Option<&str>) -> Request<Body> {
    multipart_request(None, quality)
}

fn multipart_request(file: Option<(&str, &[u8])>, quality: Option<&str>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/convert-pdf/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(file, quality)))
        .expect("build request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}
