//! PDF encoding: one RGB canvas → one-page PDF.
//!
//! The canvas becomes a Flate-compressed DeviceRGB image XObject drawn over
//! the full MediaBox. Pixel sizes convert to points at the conversion DPI,
//! so the printed size matches the configured page in inches.

use crate::error::NewsletterError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use tracing::debug;

const POINTS_PER_INCH: f32 = 72.0;

/// Encode `canvas` as a single-page PDF at `dpi`.
pub fn encode_pdf(canvas: &RgbImage, dpi: u32) -> Result<Vec<u8>, NewsletterError> {
    let (width_px, height_px) = canvas.dimensions();
    let points = |px: u32| px as f32 * POINTS_PER_INCH / dpi.max(1) as f32;
    let (width_pt, height_pt) = (points(width_px), points(height_px));

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let pixels = deflate(canvas.as_raw()).map_err(|e| NewsletterError::PdfEncode(e.to_string()))?;
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width_px),
            "Height" => i64::from(height_px),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        pixels,
    );
    let image_id = document.add_object(image);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width_pt.into(),
                    0.into(),
                    0.into(),
                    height_pt.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content
        .encode()
        .map_err(|e| NewsletterError::PdfEncode(e.to_string()))?;
    let compressed = deflate(&encoded).map_err(|e| NewsletterError::PdfEncode(e.to_string()))?;
    let content_id = document.add_object(Stream::new(
        dictionary! { "Filter" => "FlateDecode" },
        compressed,
    ));

    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    document
        .save_to(&mut out)
        .map_err(|e| NewsletterError::PdfEncode(e.to_string()))?;

    debug!(
        "Encoded {}x{} px page ({:.1}x{:.1} pt) → {} bytes",
        width_px,
        height_px,
        width_pt,
        height_pt,
        out.len()
    );
    Ok(out)
}

fn deflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}
