//! Pipeline stages for dark-mode PDF conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets the
//! rendering backend be swapped (pdfium in production, a synthetic
//! rasteriser in tests) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ inspect ──▶ render ──▶ recolor ──▶ encode ──▶ assemble
//! (upload)  (lopdf)     (pdfium)   (dark mode) (PNG/JPEG) (lopdf)
//! ```
//!
//! 1. [`input`]    validate the upload and quality into a [`ConversionRequest`]
//! 2. [`inspect`]  parse the page tree, reject encrypted or oversize documents
//! 3. [`render`]   rasterise one page at a time at the profile DPI
//! 4. [`recolor`]  white → dark grey, black → white
//! 5. [`encode`]   page 1 → PNG preview; every page → JPEG
//! 6. [`assemble`] repack the JPEGs into a new PDF at the source page sizes
//!
//! [`convert_document`] drives all six synchronously; callers run it on a
//! blocking thread (see [`crate::pool`]).

pub mod assemble;
pub mod encode;
pub mod input;
pub mod inspect;
pub mod recolor;
pub mod render;

pub use input::ConversionRequest;

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::progress::ConversionProgressCallback;
use assemble::PdfAssembler;
use render::{PageRasterizer, RenderPlan};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The two outputs of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    /// Recoloured first page, PNG.
    pub preview_png: Vec<u8>,
    /// Recoloured document, PDF.
    pub output_pdf: Vec<u8>,
    pub page_count: usize,
}

/// Cooperative cancellation shared between a waiting caller and the
/// conversion it started. Checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.is_cancelled() {
            Err(ServiceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run the full pipeline over a validated request.
///
/// Deterministic: equal request bytes, quality and `config` produce
/// byte-identical outputs for a deterministic rasteriser.
///
/// # Errors
/// Any stage failure aborts the conversion; nothing partial is returned.
pub fn convert_document(
    request: &ConversionRequest,
    config: &PipelineConfig,
    rasterizer: &dyn PageRasterizer,
    cancel: &CancelFlag,
    progress: &dyn ConversionProgressCallback,
) -> Result<ConvertedDocument, ServiceError> {
    let started = Instant::now();
    cancel.check()?;

    let profile = request.quality().profile();
    let info = inspect::inspect(request.source(), config.max_pages)?;
    let total = info.page_count();
    progress.on_conversion_start(total);

    let plan = RenderPlan {
        pages: info.pages,
        dpi: profile.dpi,
        max_rendered_pixels: config.max_rendered_pixels,
    };

    let mut assembler = PdfAssembler::new();
    let mut preview_png = None;

    rasterizer.rasterize(request.source(), &plan, &mut |page| {
        cancel.check()?;

        if page.index != assembler.page_count() || page.index >= total {
            return Err(ServiceError::Rasterizer(format!(
                "page {} arrived out of order",
                page.index + 1
            )));
        }
        let expected = plan.target(page.index);
        if page.image.dimensions() != expected {
            return Err(ServiceError::Rasterizer(format!(
                "page {} rendered at {:?} px, expected {:?}",
                page.index + 1,
                page.image.dimensions(),
                expected
            )));
        }

        let mut image = page.image;
        if config.dark_mode {
            recolor::apply_dark_mode(&mut image);
        }
        if page.index == 0 {
            preview_png = Some(encode::encode_png(&image, profile)?);
        }
        let jpeg = encode::encode_jpeg(&image, profile)?;
        debug!(page = page.index + 1, jpeg_bytes = jpeg.len(), "Encoded page");
        assembler.add_page(jpeg, image.dimensions(), plan.pages[page.index])?;

        progress.on_page_complete(page.index + 1, total);
        Ok(())
    })?;

    if assembler.page_count() != total {
        return Err(ServiceError::Rasterizer(format!(
            "rendered {} of {} pages",
            assembler.page_count(),
            total
        )));
    }
    let preview_png = preview_png
        .ok_or_else(|| ServiceError::Internal("first page produced no preview".into()))?;
    let output_pdf = assembler.finish()?;
    progress.on_conversion_complete(total, output_pdf.len());

    info!(
        pages = total,
        quality = %request.quality(),
        dpi = profile.dpi,
        preview_bytes = preview_png.len(),
        pdf_bytes = output_pdf.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Converted document"
    );

    Ok(ConvertedDocument {
        preview_png,
        output_pdf,
        page_count: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::inspect::PageSize;
    use crate::pipeline::recolor::DARK_BACKGROUND;
    use crate::progress::NoopProgressCallback;
    use crate::quality::Quality;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};
    use lopdf::{dictionary, Document, Object};
    use render::RenderedPage;
    use std::sync::atomic::AtomicUsize;

    /// Paints every page pure white.
    struct BlankRasterizer {
        calls: AtomicUsize,
    }

    impl PageRasterizer for BlankRasterizer {
        fn rasterize(
            &self,
            _source: &[u8],
            plan: &RenderPlan,
            sink: &mut dyn FnMut(RenderedPage) -> Result<(), ServiceError>,
        ) -> Result<(), ServiceError> {
            for index in 0..plan.pages.len() {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let (w, h) = plan.target(index);
                sink(RenderedPage {
                    index,
                    image: RgbImage::from_pixel(w, h, Rgb([255, 255, 255])),
                })?;
            }
            Ok(())
        }
    }

    fn blank() -> BlankRasterizer {
        BlankRasterizer {
            calls: AtomicUsize::new(0),
        }
    }

    fn pdf_with_pages(n: usize) -> Bytes {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..n)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(72), Object::Integer(36)],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => n as i64,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        Bytes::from(out)
    }

    fn request(bytes: Bytes, quality: &str) -> ConversionRequest {
        ConversionRequest::validate(bytes, Some(quality), None, usize::MAX).unwrap()
    }

    #[test]
    fn converts_every_page_and_recolors_preview() {
        let req = request(pdf_with_pages(3), "low");
        let out = convert_document(
            &req,
            &PipelineConfig::default(),
            &blank(),
            &CancelFlag::new(),
            &NoopProgressCallback,
        )
        .unwrap();

        assert_eq!(out.page_count, 3);
        let preview = image::load_from_memory(&out.preview_png).unwrap().to_rgb8();
        // 72 × 36 pt at 300 DPI.
        assert_eq!(preview.dimensions(), (300, 150));
        assert!(preview.pixels().all(|p| *p == DARK_BACKGROUND));

        let info = inspect::inspect(&out.output_pdf, 10).unwrap();
        assert_eq!(info.page_count(), 3);
        assert_eq!(info.pages[0], PageSize { width_pt: 72.0, height_pt: 36.0 });
    }

    #[test]
    fn dark_mode_off_keeps_pixels() {
        let req = request(pdf_with_pages(1), "low");
        let config = PipelineConfig {
            dark_mode: false,
            ..PipelineConfig::default()
        };
        let out =
            convert_document(&req, &config, &blank(), &CancelFlag::new(), &NoopProgressCallback)
                .unwrap();
        let preview = image::load_from_memory(&out.preview_png).unwrap().to_rgb8();
        assert!(preview.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn cancelled_before_start_renders_nothing() {
        let req = request(pdf_with_pages(2), "medium");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let raster = blank();
        let err = convert_document(
            &req,
            &PipelineConfig::default(),
            &raster,
            &cancel,
            &NoopProgressCallback,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
        assert_eq!(raster.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn page_limit_is_enforced_before_rendering() {
        let req = request(pdf_with_pages(4), "low");
        let config = PipelineConfig {
            max_pages: 3,
            ..PipelineConfig::default()
        };
        let raster = blank();
        let err = convert_document(&req, &config, &raster, &CancelFlag::new(), &NoopProgressCallback)
            .unwrap_err();
        assert!(matches!(err, ServiceError::ResourceExhausted { .. }));
        assert_eq!(raster.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn higher_quality_is_not_smaller() {
        let bytes = pdf_with_pages(1);
        let sizes: Vec<usize> = Quality::ALL
            .iter()
            .map(|q| {
                let req = request(bytes.clone(), q.as_str());
                convert_document(
                    &req,
                    &PipelineConfig::default(),
                    &blank(),
                    &CancelFlag::new(),
                    &NoopProgressCallback,
                )
                .unwrap()
                .output_pdf
                .len()
            })
            .collect();
        assert!(sizes[0] <= sizes[1] && sizes[1] <= sizes[2], "{sizes:?}");
    }
}
