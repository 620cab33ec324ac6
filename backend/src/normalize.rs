use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, RgbImage};
use tempfile::TempPath;

pub const JPEG_QUALITY: u8 = 95;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Cannot identify image file: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Image format {0} is not allowed")]
    FormatNotAllowed(String),
    #[error("Failed to encode normalized image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Failed to write transient image: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded upload, always 3-channel RGB.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> [u32; 2] {
        [self.width(), self.height()]
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Writes the image as a high quality JPEG into a temp file owned by the
    /// returned guard.
    pub fn materialize(&self) -> Result<TransientImage, NormalizeError> {
        let file = tempfile::Builder::new()
            .prefix("caption-")
            .suffix(".jpg")
            .tempfile()?;
        {
            let mut writer = BufWriter::new(file.as_file());
            JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
                .encode_image(&self.pixels)
                .map_err(NormalizeError::Encode)?;
            writer.flush()?;
        }
        Ok(TransientImage {
            path: file.into_temp_path(),
        })
    }
}

/// Scoped handle to a normalized JPEG on disk. The file is removed when the
/// guard drops; removal errors are ignored.
#[derive(Debug)]
pub struct TransientImage {
    path: TempPath,
}

impl TransientImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientImage {
    fn drop(&mut self) {
        log::debug!("Removing transient image {}", self.path.display());
    }
}

pub fn normalize(bytes: &[u8], allowed_extensions: &[String]) -> Result<NormalizedImage, NormalizeError> {
    let format = image::guess_format(bytes).map_err(NormalizeError::Decode)?;
    if !format_allowed(format, allowed_extensions) {
        return Err(NormalizeError::FormatNotAllowed(format!("{:?}", format)));
    }

    let decoded = image::load_from_memory_with_format(bytes, format).map_err(NormalizeError::Decode)?;
    Ok(NormalizedImage {
        pixels: to_rgb(decoded),
    })
}

fn format_allowed(format: ImageFormat, allowed_extensions: &[String]) -> bool {
    format
        .extensions_str()
        .iter()
        .any(|ext| allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

fn to_rgb(image: DynamicImage) -> RgbImage {
    if let DynamicImage::ImageRgb8(rgb) = image {
        return rgb;
    }
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    // Alpha acts as the paste mask over a white canvas.
    let (width, height) = (image.width(), image.height());
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};
    use std::io::Cursor;

    fn allowed() -> Vec<String> {
        ["jpg", "jpeg", "png", "bmp", "gif"].iter().map(|s| s.to_string()).collect()
    }

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn transparent_regions_become_white() {
        let mut rgba = RgbaImage::from_pixel(8, 4, Rgba([10, 200, 30, 255]));
        for x in 0..4 {
            for y in 0..4 {
                rgba.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let bytes = encode(&DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

        let normalized = normalize(&bytes, &allowed()).unwrap();
        assert_eq!(normalized.dimensions(), [8, 4]);
        assert_eq!(normalized.pixels().get_pixel(1, 1), &Rgb([255, 255, 255]));
        assert_eq!(normalized.pixels().get_pixel(6, 2), &Rgb([10, 200, 30]));
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let gray = GrayImage::from_pixel(3, 5, Luma([77]));
        let bytes = encode(&DynamicImage::ImageLuma8(gray), ImageFormat::Png);

        let normalized = normalize(&bytes, &allowed()).unwrap();
        assert_eq!(normalized.dimensions(), [3, 5]);
        assert_eq!(normalized.pixels().get_pixel(2, 4), &Rgb([77, 77, 77]));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = normalize(b"definitely not an image", &allowed()).unwrap_err();
        assert!(matches!(err, NormalizeError::Decode(_)));
    }

    #[test]
    fn truncated_png_fails_to_decode() {
        let rgb = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let bytes = encode(&DynamicImage::ImageRgb8(rgb), ImageFormat::Png);
        assert!(normalize(&bytes[..bytes.len() / 2], &allowed()).is_err());
    }

    #[test]
    fn formats_outside_the_allowed_set_are_rejected() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let bytes = encode(&DynamicImage::ImageRgb8(rgb), ImageFormat::Bmp);
        let err = normalize(&bytes, &["png".to_string()]).unwrap_err();
        assert!(matches!(err, NormalizeError::FormatNotAllowed(_)));
    }

    #[test]
    fn transient_jpeg_is_removed_on_drop() {
        let rgb = RgbImage::from_pixel(12, 7, Rgb([120, 60, 30]));
        let bytes = encode(&DynamicImage::ImageRgb8(rgb), ImageFormat::Png);
        let normalized = normalize(&bytes, &allowed()).unwrap();

        let transient = normalized.materialize().unwrap();
        let path = transient.path().to_path_buf();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert_eq!(image::image_dimensions(&path).unwrap(), (12, 7));
        assert_eq!(image::ImageFormat::from_path(&path).unwrap(), ImageFormat::Jpeg);

        drop(transient);
        assert!(!path.exists());
    }
}
