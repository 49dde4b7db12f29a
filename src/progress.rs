//! Progress-callback trait for per-page conversion events.
//!
//! [`crate::pipeline::convert_document`] reports each finished page through a
//! [`ConversionProgressCallback`]. The HTTP service passes
//! [`NoopProgressCallback`]; the `render` subcommand drives a terminal
//! progress bar from it.
//!
//! # Example
//!
//! ```rust
//! use ezread::ConversionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done", page_num, total_pages);
//!     }
//! }
//! ```

/// Called by the conversion pipeline as it processes each page.
///
/// Pages are rendered sequentially, so calls never overlap for one
/// conversion, but the callback runs on a blocking worker thread and must be
/// `Send + Sync`. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is rendered.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after a page has been rendered, recoloured and encoded.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called once after the output PDF has been assembled.
    ///
    /// `output_bytes` is the size of the finished PDF.
    fn on_conversion_complete(&self, total_pages: usize, output_bytes: usize) {
        let _ = (total_pages, output_bytes);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}
