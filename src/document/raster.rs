//! Raster decoding and the grayscale / ink-mask helpers shared by the grid
//! strategies.

use image::{DynamicImage, GrayImage, ImageFormat};
use kornia::{
    image::{Image, ImageError, ImageSize, allocator::CpuAllocator},
    imgproc,
};

use super::{DocumentOpenError, Page};

type CpuImage<T, const C: usize> = Image<T, C, CpuAllocator>;

/// Decodes a scanned page. Scans carry no vector content or text.
pub(super) fn load_image(bytes: &[u8], format: ImageFormat) -> Result<Page, DocumentOpenError> {
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    Ok(Page::new(to_gray(&decoded)?))
}

/// Luminance conversion through kornia.
pub(crate) fn to_gray(source: &DynamicImage) -> Result<GrayImage, DocumentOpenError> {
    let rgb = source.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(DocumentOpenError::Empty);
    }

    let image = CpuImage::<u8, 3>::new(
        ImageSize {
            width: width as usize,
            height: height as usize,
        },
        rgb.into_raw(),
        CpuAllocator,
    )?;
    let mut gray = CpuImage::<u8, 1>::from_size_val(image.size(), 0u8, CpuAllocator)?;
    imgproc::color::gray_from_rgb_u8(&image, &mut gray)?;

    GrayImage::from_raw(width, height, gray.as_slice().to_vec()).ok_or(DocumentOpenError::Empty)
}

/// Binary mask with 255 where the pixel is ink (at or below `threshold`).
pub(crate) fn ink_mask(gray: &GrayImage, threshold: u8) -> Result<Vec<u8>, ImageError> {
    let size = ImageSize {
        width: gray.width() as usize,
        height: gray.height() as usize,
    };
    let source = CpuImage::<u8, 1>::new(size, gray.as_raw().clone(), CpuAllocator)?;
    let mut binary = CpuImage::<u8, 1>::from_size_val(size, 0u8, CpuAllocator)?;
    imgproc::threshold::threshold_binary(&source, &mut binary, threshold, 255)?;

    Ok(binary.as_slice().iter().map(|&px| 255 - px).collect())
}

/// Otsu's method: the level that maximises the between-class variance of
/// the sample's histogram. `None` for an empty sample.
pub(crate) fn otsu_threshold(pixels: &[u8]) -> Option<u8> {
    if pixels.is_empty() {
        return None;
    }
    let histogram = pixels.iter().fold([0u64; 256], |mut h, &v| {
        h[v as usize] += 1;
        h
    });
    let total = pixels.len() as f64;
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &n)| level as f64 * n as f64)
        .sum();

    let (mut below, mut below_sum) = (0f64, 0f64);
    let mut best = (f64::MIN, 0u8);
    for (level, &n) in histogram.iter().enumerate() {
        below += n as f64;
        below_sum += level as f64 * n as f64;
        let above = total - below;
        if below == 0.0 {
            continue;
        }
        if above == 0.0 {
            break;
        }
        let spread = below_sum / below - (weighted_total - below_sum) / above;
        let variance = below * above * spread * spread;
        if variance > best.0 {
            best = (variance, level as u8);
        }
    }
    Some(best.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn otsu_splits_two_levels() {
        let mut pixels = vec![20u8; 100];
        pixels.extend(vec![230u8; 300]);
        let t = otsu_threshold(&pixels).expect("threshold");
        assert!((20..230).contains(&t));
    }

    #[test]
    fn otsu_needs_pixels() {
        assert_eq!(otsu_threshold(&[]), None);
        assert_eq!(otsu_threshold(&[90; 16]), Some(0));
    }

    #[test]
    fn ink_mask_marks_dark_pixels() {
        let mut gray = GrayImage::from_pixel(4, 1, Luma([255u8]));
        gray.put_pixel(1, 0, Luma([10u8]));
        gray.put_pixel(2, 0, Luma([128u8]));
        let mask = ink_mask(&gray, 128).expect("mask");
        assert_eq!(mask, vec![0, 255, 255, 0]);
    }

    #[test]
    fn grayscale_keeps_dimensions() {
        let rgb = RgbImage::from_pixel(7, 5, Rgb([200, 200, 200]));
        let gray = to_gray(&DynamicImage::ImageRgb8(rgb)).expect("gray");
        assert_eq!(gray.dimensions(), (7, 5));
        assert!(gray.pixels().all(|p| p.0[0] >= 195 && p.0[0] <= 205));
    }
}
