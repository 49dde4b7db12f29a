//! Structural inspection of an uploaded PDF with `lopdf`.
//!
//! This stage answers three questions before any pixels are rendered: does
//! the document parse, can it be opened without a password, and how many
//! pages of what size does it have. A 200-page limit is cheap to enforce
//! here and expensive to discover halfway through a 900 DPI render.

use crate::error::ServiceError;
use lopdf::encryption::get_encryption_key;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// US Letter, used when a page carries no usable `/MediaBox`.
const DEFAULT_PAGE_SIZE: PageSize = PageSize {
    width_pt: 612.0,
    height_pt: 792.0,
};

/// Guards against `/Parent` cycles in malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

/// Page dimensions in PDF points (1/72 inch), rotation applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// What the pipeline needs to know about a document before rendering it.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    /// Page sizes in page order.
    pub pages: Vec<PageSize>,
    /// The document was encrypted with an empty user password.
    pub encrypted: bool,
    pub version: String,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Parse `bytes` and collect page geometry.
///
/// # Errors
/// * [`ServiceError::CorruptDocument`] when the structure cannot be parsed or
///   the document has no pages.
/// * [`ServiceError::UnsupportedDocument`] when it is encrypted and the empty
///   user password does not open it.
/// * [`ServiceError::ResourceExhausted`] when it has more than `max_pages` pages.
pub fn inspect(bytes: &[u8], max_pages: usize) -> Result<DocumentInfo, ServiceError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        if looks_encrypted(bytes) {
            password_protected()
        } else {
            ServiceError::corrupt(e.to_string())
        }
    })?;

    // Page geometry is never encrypted; only the password needs checking.
    let encrypted = doc.is_encrypted();
    if encrypted {
        if let Err(e) = get_encryption_key(&doc, "", true) {
            debug!(error = %e, "Empty user password rejected");
            return Err(password_protected());
        }
    }

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(ServiceError::corrupt("document has no pages"));
    }
    if page_ids.len() > max_pages {
        return Err(ServiceError::ResourceExhausted {
            detail: format!(
                "document has {} pages, the limit is {}",
                page_ids.len(),
                max_pages
            ),
        });
    }

    let pages = page_ids
        .iter()
        .map(|&id| page_size(&doc, id))
        .collect::<Vec<_>>();

    debug!(
        pages = pages.len(),
        encrypted,
        version = %doc.version,
        "Inspected PDF"
    );

    Ok(DocumentInfo {
        pages,
        encrypted,
        version: doc.version.clone(),
    })
}

fn password_protected() -> ServiceError {
    ServiceError::UnsupportedDocument {
        reason: "document is password protected".into(),
    }
}

/// Byte-level fallback for encrypted files `lopdf` refuses to load at all.
fn looks_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

/// Effective page size: the first `/CropBox` or `/MediaBox` found walking up
/// the page tree, swapped for `/Rotate` 90 or 270.
fn page_size(doc: &Document, page_id: ObjectId) -> PageSize {
    let size = inherited(doc, page_id, b"CropBox")
        .or_else(|| inherited(doc, page_id, b"MediaBox"))
        .and_then(|obj| rect_size(doc, &obj))
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(|obj| number(doc, &obj))
        .map(|r| (r as i64).rem_euclid(360))
        .unwrap_or(0);

    if rotate == 90 || rotate == 270 {
        PageSize {
            width_pt: size.height_pt,
            height_pt: size.width_pt,
        }
    } else {
        size
    }
}

/// Look `key` up on the page, then on each `/Parent` in turn.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node: &Dictionary = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn rect_size(doc: &Document, obj: &Object) -> Option<PageSize> {
    let obj = resolve(doc, obj)?;
    let arr = obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let coords = arr
        .iter()
        .map(|o| number(doc, o))
        .collect::<Option<Vec<f32>>>()?;
    let width_pt = (coords[2] - coords[0]).abs();
    let height_pt = (coords[3] - coords[1]).abs();
    let usable = |v: f32| v.is_finite() && v >= 1.0;
    (usable(width_pt) && usable(height_pt)).then_some(PageSize {
        width_pt,
        height_pt,
    })
}

fn number(doc: &Document, obj: &Object) -> Option<f32> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}
