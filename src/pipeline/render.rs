//! Page rasterisation.
//!
//! ## Why a trait?
//!
//! The production rasteriser wraps the pdfium C++ library, which is loaded at
//! runtime and is not present on every build machine. [`PageRasterizer`] is
//! the seam the rest of the pipeline is written against, so everything from
//! recolouring to the HTTP layer can be exercised without the native library.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 900 DPI would be a
//! 29,800 × 42,100 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size and scales the other edge with it, so memory
//! per page stays bounded and the aspect ratio is preserved.
//!
//! ## Why a sink callback?
//!
//! Pages are handed to the caller one at a time and dropped before the next
//! is rendered. A 200-page document never holds more than one bitmap.

use super::inspect::PageSize;
use crate::error::ServiceError;
use image::RgbImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Points per inch in PDF user space.
const POINTS_PER_INCH: f64 = 72.0;

/// What to render.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    /// Page sizes, in page order, as reported by inspection.
    pub pages: Vec<PageSize>,
    pub dpi: u32,
    pub max_rendered_pixels: u32,
}

impl RenderPlan {
    /// Pixel dimensions for page `index`.
    pub fn target(&self, index: usize) -> (u32, u32) {
        render_target(self.pages[index], self.dpi, self.max_rendered_pixels)
    }
}

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 0-based page index.
    pub index: usize,
    pub image: RgbImage,
}

/// Renders PDF pages to RGB bitmaps.
///
/// Implementations must call `sink` once per page, in page order, with an
/// image of exactly [`RenderPlan::target`] pixels. Returning an error from
/// `sink` stops rendering and that error is returned.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(
        &self,
        source: &[u8],
        plan: &RenderPlan,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), ServiceError>,
    ) -> Result<(), ServiceError>;
}

/// Pixel size of a page rendered at `dpi`, longest edge capped at `max_edge`.
///
/// Both edges are at least one pixel.
pub fn render_target(size: PageSize, dpi: u32, max_edge: u32) -> (u32, u32) {
    let scale = f64::from(dpi) / POINTS_PER_INCH;
    let mut w = f64::from(size.width_pt) * scale;
    let mut h = f64::from(size.height_pt) * scale;

    let longest = w.max(h);
    let cap = f64::from(max_edge.max(1));
    if longest > cap {
        let shrink = cap / longest;
        w *= shrink;
        h *= shrink;
    }

    let px = |v: f64| (v.round() as u32).clamp(1, max_edge.max(1));
    (px(w), px(h))
}

/// Where the pdfium shared library was found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PdfiumLibrary {
    Path(PathBuf),
    System,
}

impl PdfiumLibrary {
    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match self {
            Self::Path(path) => Pdfium::bind_to_library(path)?,
            Self::System => Pdfium::bind_to_system_library()?,
        };
        Ok(Pdfium::new(bindings))
    }
}

/// [`PageRasterizer`] backed by pdfium.
///
/// Only the library location is shared between threads. Each
/// [`rasterize`](PageRasterizer::rasterize) call binds its own [`Pdfium`]
/// inside the blocking worker that runs it.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library: PdfiumLibrary,
}

impl PdfiumRasterizer {
    /// Locate pdfium, trying in order: `explicit`, `$PDFIUM_LIB_PATH`, the
    /// working directory, then the system library search path.
    ///
    /// The library is bound once here so a missing or broken install fails
    /// at startup rather than on the first upload.
    pub fn bind(explicit: Option<&Path>) -> Result<Self, ServiceError> {
        let env_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
        let configured = explicit.map(Path::to_path_buf).or(env_path);

        let library = match configured {
            Some(path) => {
                let library = PdfiumLibrary::Path(path);
                library.bind().map_err(|e| {
                    ServiceError::Rasterizer(format!(
                        "Failed to bind pdfium from '{}': {:?}",
                        library_display(&library),
                        e
                    ))
                })?;
                library
            }
            None => {
                let local =
                    PdfiumLibrary::Path(Pdfium::pdfium_platform_library_name_at_path("./"));
                match local.bind() {
                    Ok(_) => local,
                    Err(_) => {
                        PdfiumLibrary::System.bind().map_err(|e| {
                            ServiceError::Rasterizer(format!(
                                "pdfium library not found (set PDFIUM_LIB_PATH): {:?}",
                                e
                            ))
                        })?;
                        PdfiumLibrary::System
                    }
                }
            }
        };

        info!(library = %library_display(&library), "pdfium bound");
        Ok(Self { library })
    }
}

fn library_display(library: &PdfiumLibrary) -> String {
    match library {
        PdfiumLibrary::Path(path) => path.display().to_string(),
        PdfiumLibrary::System => "system".to_string(),
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        source: &[u8],
        plan: &RenderPlan,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), ServiceError>,
    ) -> Result<(), ServiceError> {
        let pdfium = self
            .library
            .bind()
            .map_err(|e| ServiceError::Rasterizer(format!("Failed to bind pdfium: {:?}", e)))?;
        let document = pdfium
            .load_pdf_from_byte_slice(source, None)
            .map_err(|e| match e {
                PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                    ServiceError::UnsupportedDocument {
                        reason: "document is password protected".into(),
                    }
                }
                other => ServiceError::corrupt(format!("{:?}", other)),
            })?;

        let pages = document.pages();
        if pages.len() as usize != plan.pages.len() {
            return Err(ServiceError::corrupt(format!(
                "page tree reports {} pages, renderer found {}",
                plan.pages.len(),
                pages.len()
            )));
        }

        for index in 0..plan.pages.len() {
            let (width, height) = plan.target(index);
            let page = pages.get(index as u16).map_err(|e| {
                ServiceError::Rasterizer(format!("page {}: {:?}", index + 1, e))
            })?;

            let config = PdfRenderConfig::new()
                .set_target_size(width as i32, height as i32)
                .render_form_data(true);
            let bitmap = page.render_with_config(&config).map_err(|e| {
                ServiceError::Rasterizer(format!("page {}: {:?}", index + 1, e))
            })?;

            let mut image = bitmap.as_image().to_rgb8();
            if image.dimensions() != (width, height) {
                image = image::imageops::resize(
                    &image,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
            }
            debug!(page = index + 1, width, height, "Rendered page");

            sink(RenderedPage { index, image })?;
        }

        Ok(())
    }
}
