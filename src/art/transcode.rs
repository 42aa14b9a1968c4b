use std::io::Cursor;

use image::{GenericImageView, ImageOutputFormat};

use super::{ArtError, EncodedImage};

/// Decodes whatever the CDN served (JPEG/PNG) and re-encodes it as PNG so the
/// presentation layer only ever sees one format.
pub fn transcode_to_png(bytes: &[u8]) -> Result<EncodedImage, ArtError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| ArtError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .map_err(|e| ArtError::Decode(e.to_string()))?;

    Ok(EncodedImage { png, width, height })
}

#[cfg(test)]
pub(crate) fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(90))
        .expect("encode test jpeg");
    out
}
