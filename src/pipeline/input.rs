//! Upload validation: turn raw form data into a [`ConversionRequest`].
//!
//! Everything cheap to reject is rejected here, before the request is queued
//! for a conversion slot: missing or empty payloads, oversize uploads, bytes
//! that do not look like a PDF, and a missing or unknown quality. The
//! structural checks that need a parser live in [`super::inspect`].

use crate::error::ServiceError;
use crate::quality::Quality;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// The PDF header may be preceded by junk; readers accept it within 1 KiB.
const HEADER_WINDOW: usize = 1024;
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Longest stem kept in a filename hint.
const MAX_STEM_LEN: usize = 100;

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// A validated conversion request.
///
/// Only [`ConversionRequest::validate`] constructs one, so holding a value
/// means the bytes are non-empty, within the size limit and carry a PDF
/// header, and the quality is one of the three known levels.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    source: Bytes,
    quality: Quality,
    filename: Option<String>,
}

impl ConversionRequest {
    /// Validate an upload.
    ///
    /// Quality is checked first so a request without one never has its
    /// payload inspected.
    pub fn validate(
        source: Bytes,
        quality: Option<&str>,
        filename: Option<String>,
        max_upload_bytes: usize,
    ) -> Result<Self, ServiceError> {
        let quality = Quality::from_form(quality)?;

        if source.is_empty() {
            return Err(ServiceError::invalid_input("uploaded file is empty"));
        }
        if source.len() > max_upload_bytes {
            return Err(ServiceError::PayloadTooLarge {
                max: max_upload_bytes,
            });
        }
        if !has_pdf_header(&source) {
            return Err(ServiceError::invalid_input(
                "uploaded file is not a PDF (no %PDF- header)",
            ));
        }

        debug!(
            size = source.len(),
            %quality,
            filename = filename.as_deref().unwrap_or("-"),
            "Validated upload"
        );
        Ok(Self {
            source,
            quality,
            filename,
        })
    }

    pub fn source(&self) -> &Bytes {
        &self.source
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Download name for the output PDF: `<stem>_converted.pdf`.
    pub fn pdf_filename(&self) -> String {
        format!("{}_converted.pdf", self.stem())
    }

    /// Download name for the preview image: `<stem>_page_000_converted.png`.
    pub fn preview_filename(&self) -> String {
        format!("{}_page_000_converted.png", self.stem())
    }

    fn stem(&self) -> String {
        self.filename
            .as_deref()
            .map(sanitize_stem)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Whether `%PDF-` appears within the first kilobyte.
pub fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
    window
        .windows(PDF_MAGIC.len())
        .any(|w| w == PDF_MAGIC)
}

/// Reduce a client-supplied filename to a safe stem.
///
/// Directory components and the extension are dropped, runs of characters
/// outside `[A-Za-z0-9._-]` collapse to `_`, and edge underscores and leading
/// dots are removed. The hint can never name a hidden file or a directory.
pub fn sanitize_stem(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    let cleaned = RE_UNSAFE_CHARS.replace_all(stem, "_");
    cleaned
        .trim_matches('_')
        .trim_start_matches('.')
        .chars()
        .take(MAX_STEM_LEN)
        .collect()
}
