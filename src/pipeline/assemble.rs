//! Output PDF assembly with `lopdf`.
//!
//! Each page of the output is a single full-page JPEG image XObject drawn at
//! the source page's size in points, so the converted document prints at the
//! same physical size as the upload. Nothing time- or randomness-dependent is
//! written (no `/CreationDate`, no `/ID`), which keeps the output
//! byte-for-byte reproducible.

use super::inspect::PageSize;
use crate::error::ServiceError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

const PDF_VERSION: &str = "1.5";
const IMAGE_NAME: &str = "Im0";

/// Builds the output PDF one page at a time.
pub struct PdfAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfAssembler {
    pub fn new() -> Self {
        let mut doc = Document::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append a page showing `jpeg` (of `pixels` width × height) stretched
    /// over a `size` page.
    pub fn add_page(
        &mut self,
        jpeg: Vec<u8>,
        pixels: (u32, u32),
        size: PageSize,
    ) -> Result<(), ServiceError> {
        let (px_w, px_h) = pixels;
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_w as i64,
                "Height" => px_h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = self.doc.add_object(image);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        size.width_pt.into(),
                        0.into(),
                        0.into(),
                        size.height_pt.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| ServiceError::Internal(format!("Content stream encoding failed: {e}")))?;
        let content_id = self.doc.add_object(Stream::new(Dictionary::new(), encoded));

        let media_box: Vec<Object> = vec![
            0.into(),
            0.into(),
            size.width_pt.into(),
            size.height_pt.into(),
        ];
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => media_box,
            "Resources" => dictionary! {
                "XObject" => dictionary! { IMAGE_NAME => image_id },
            },
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    /// Write the page tree and catalog and serialise the document.
    pub fn finish(mut self) -> Result<Vec<u8>, ServiceError> {
        if self.kids.is_empty() {
            return Err(ServiceError::Internal("no pages to assemble".into()));
        }
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| ServiceError::Internal(format!("PDF serialisation failed: {e}")))?;
        Ok(out)
    }
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_jpeg;
    use crate::quality::Quality;
    use image::{Rgb, RgbImage};

    fn page_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([40, 40, 40]));
        encode_jpeg(&img, Quality::Low.profile()).unwrap()
    }

    fn build(sizes: &[PageSize]) -> Vec<u8> {
        let mut asm = PdfAssembler::new();
        for s in sizes {
            asm.add_page(page_jpeg(20, 30), (20, 30), *s).unwrap();
        }
        asm.finish().unwrap()
    }

    #[test]
    fn output_reloads_with_page_sizes() {
        let sizes = [
            PageSize { width_pt: 612.0, height_pt: 792.0 },
            PageSize { width_pt: 200.0, height_pt: 100.0 },
        ];
        let bytes = build(&sizes);
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let info = crate::pipeline::inspect::inspect(&bytes, 10).unwrap();
        assert_eq!(info.pages, sizes.to_vec());
    }

    #[test]
    fn output_is_reproducible() {
        let sizes = [PageSize { width_pt: 72.0, height_pt: 72.0 }];
        assert_eq!(build(&sizes), build(&sizes));
    }

    #[test]
    fn no_pages_is_an_error() {
        assert!(PdfAssembler::new().finish().is_err());
    }
}
