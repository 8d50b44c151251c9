//! Image loading and resizing shared by the analysis stages

use crate::error::{MediaError, Result};
use crate::ffmpeg::FfmpegCommand;
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;
use tracing::debug;

/// Decode a still image from disk.
///
/// The image crate handles JPEG/PNG in-process. Formats it cannot decode
/// (HEIC in particular) are handed to ffmpeg, which emits a PNG on stdout.
pub fn load_image(path: &Path, ffmpeg: &Path) -> Result<DynamicImage> {
    match image::open(path) {
        Ok(img) => Ok(img),
        Err(primary) => {
            debug!("image crate could not decode {}: {}, trying ffmpeg", path.display(), primary);
            let png = FfmpegCommand::with_program(ffmpeg)
                .input(path)
                .single_png_frame()
                .execute_to_bytes()
                .map_err(|e| {
                    MediaError::ProcessingError(format!(
                        "Failed to decode {}: {} (ffmpeg fallback: {})",
                        path.display(),
                        primary,
                        e
                    ))
                })?;
            Ok(image::load_from_memory(&png)?)
        }
    }
}

/// Dimensions that fit inside `max_w` x `max_h` keeping the aspect ratio.
/// Images already inside the box are never enlarged.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// Resize an RGB buffer using fast_image_resize (SIMD-optimized)
pub fn resize_rgb(img: &RgbImage, dst_w: u32, dst_h: u32) -> Result<RgbImage> {
    use fast_image_resize as fr;
    use fr::images::Image as FrImage;

    if img.width() == dst_w && img.height() == dst_h {
        return Ok(img.clone());
    }

    let src_image = FrImage::from_vec_u8(
        img.width(),
        img.height(),
        img.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| MediaError::ProcessingError(format!("Failed to create source image: {:?}", e)))?;

    let mut dst_image = FrImage::new(dst_w, dst_h, src_image.pixel_type());

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, None)
        .map_err(|e| MediaError::ProcessingError(format!("Resize failed: {:?}", e)))?;

    RgbImage::from_raw(dst_w, dst_h, dst_image.into_vec())
        .ok_or_else(|| MediaError::ProcessingError("Resized buffer has wrong length".to_string()))
}

/// Convert to RGB and shrink so the longer side is at most `max_dim`
pub fn downscale_to_max(img: &DynamicImage, max_dim: u32) -> Result<RgbImage> {
    let rgb = img.to_rgb8();
    let (w, h) = fit_within(rgb.width(), rgb.height(), max_dim, max_dim);
    resize_rgb(&rgb, w, h)
}

/// BT.601 luma, the weighting OpenCV uses for grayscale conversion
pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        image::Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(800, 600, 128, 128), (128, 96));
        assert_eq!(fit_within(600, 800, 128, 128), (96, 128));
        assert_eq!(fit_within(1000, 10, 400, 400), (400, 4));
    }

    #[test]
    fn test_fit_within_never_enlarges() {
        assert_eq!(fit_within(50, 20, 128, 128), (50, 20));
        assert_eq!(fit_within(400, 300, 400, 400), (400, 300));
    }

    #[test]
    fn test_downscale_to_max() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1200, 600, image::Rgb([10, 20, 30])));
        let small = downscale_to_max(&img, 400).unwrap();
        assert_eq!(small.dimensions(), (400, 200));
    }

    #[test]
    fn test_gray_weights() {
        let rgb = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([255, 0, 0]),
            1 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let gray = to_gray(&rgb);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_load_image_reports_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(load_image(&path, Path::new("/nonexistent/ffmpeg")).is_err());
    }
}
