//! Image encoding: rendered pages → PNG bytes → base64 request parts.
//!
//! PNG is lossless; JPEG artefacts around small print (dosages, NPI and DEA
//! numbers) measurably hurt vision-model accuracy.

use crate::pipeline::content::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// PNG-encode a rasterised page.
pub fn encode_png(page_num: usize, img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Page {} → {} PNG bytes", page_num, buf.len());

    Ok(PageImage {
        page_num,
        width: img.width(),
        height: img.height(),
        png: buf,
    })
}

/// Base64 body of a page image.
pub fn to_base64(page: &PageImage) -> String {
    STANDARD.encode(&page.png)
}

/// Wrap a page as an edgequake-llm image part.
///
/// `detail: "high"` lets GPT-4-class models tile the page instead of reading
/// a single 512 px overview, which loses fine print.
pub fn to_image_data(page: &PageImage) -> ImageData {
    ImageData::new(to_base64(page), PNG_MIME).with_detail("high")
}
