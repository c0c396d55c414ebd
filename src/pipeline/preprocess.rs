//! Image preparation before OCR.
//!
//! Steps (applied in order):
//! 1. Grayscale
//! 2. 3×3 median filter (speckle noise from scanners)
//! 3. Contrast boost (+50 %)
//! 4. Unsharp mask
//! 5. Binarise at the mean intensity
//! 6. Lanczos3 upscale when a side is below 1000 px, so that both sides
//!    reach at least 2000 px

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

const MIN_SIDE: u32 = 1000;
const UPSCALE_TARGET: u32 = 2000;

/// Run every preprocessing step on a rendered page.
pub fn prepare_for_ocr(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let denoised = median_3x3(&gray);
    let contrasted = imageops::contrast(&denoised, 50.0);
    let sharpened = imageops::unsharpen(&contrasted, 1.0, 2);
    let binary = binarise_mean(&sharpened);
    upscale_small(binary)
}

/// 3×3 median filter with edge pixels clamped.
pub fn median_3x3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return img.clone();
    }
    GrayImage::from_fn(w, h, |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                window[i] = img.get_pixel(sx, sy)[0];
                i += 1;
            }
        }
        window.sort_unstable();
        Luma([window[4]])
    })
}

/// Pixels brighter than the mean become white, the rest black.
pub fn binarise_mean(img: &GrayImage) -> GrayImage {
    let count = (img.width() as u64 * img.height() as u64).max(1);
    let sum: u64 = img.pixels().map(|p| p[0] as u64).sum();
    let mean = (sum / count) as u8;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y)[0] > mean {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Upscaled size for an image with a side under [`MIN_SIDE`], else `None`.
///
/// The shorter side is scaled to [`UPSCALE_TARGET`], keeping the aspect
/// ratio, even when the longer side is already past it.
pub fn upscale_size(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (width >= MIN_SIDE && height >= MIN_SIDE) {
        return None;
    }
    let scale = UPSCALE_TARGET as f64 / width.min(height) as f64;
    Some((
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    ))
}

fn upscale_small(img: GrayImage) -> GrayImage {
    match upscale_size(img.width(), img.height()) {
        Some((w, h)) => imageops::resize(&img, w, h, FilterType::Lanczos3),
        None => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_removes_salt_noise() {
        let mut img = GrayImage::from_pixel(5, 5, Luma([0]));
        img.put_pixel(2, 2, Luma([255]));
        let out = median_3x3(&img);
        assert_eq!(out.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn binarise_splits_at_mean() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([(x * 60) as u8]));
        let out = binarise_mean(&img);
        let values: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn small_images_are_upscaled_on_shorter_side() {
        assert_eq!(upscale_size(500, 250), Some((4000, 2000)));
        assert_eq!(upscale_size(1200, 800), Some((3000, 2000)));
        assert_eq!(upscale_size(3306, 4678), None);
    }

    #[test]
    fn narrow_tall_image_is_upscaled_past_the_longer_side() {
        assert_eq!(upscale_size(900, 2400), Some((2000, 5333)));
    }

    #[test]
    fn prepare_returns_binary_image() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                image::Rgb([10, 10, 10])
            } else {
                image::Rgb([240, 240, 240])
            }
        }));
        let out = prepare_for_ocr(&img);
        assert_eq!(out.dimensions(), (4000, 2000));
        assert!(out.get_pixel(400, 1000)[0] < 64);
        assert!(out.get_pixel(3600, 1000)[0] > 192);
    }
}
