//! Edge-map preprocessing shared by frames and reference patterns.
//!
//! The round-start caption is mostly large glyph outlines over a busy
//! background, so matching runs on Canny edges of a heavily blurred
//! grayscale image instead of raw intensities.

use image::{imageops, GrayImage, RgbImage};
use imageproc::{edges, filter};

/// Binary edge map (0 or 255 per pixel).
pub type EdgeMap = GrayImage;

/// Sigma of the overall smoothing, equivalent to a 17x17 Gaussian kernel.
pub const BLUR_SIGMA: f32 = 2.9;

/// Canny hysteresis thresholds.
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

// imageproc's canny blurs with sigma 1.4 before taking gradients. Gaussian
// variances add, so pre-blurring with this sigma gives BLUR_SIGMA overall.
const CANNY_INTERNAL_SIGMA: f32 = 1.4;

fn pre_blur_sigma() -> f32 {
    (BLUR_SIGMA * BLUR_SIGMA - CANNY_INTERNAL_SIGMA * CANNY_INTERNAL_SIGMA).sqrt()
}

/// Grayscale, blur, Canny.
pub fn prepare(region: &RgbImage) -> EdgeMap {
    let gray = imageops::grayscale(region);
    prepare_gray(&gray)
}

/// Same as [`prepare`] for an already-gray image.
pub fn prepare_gray(gray: &GrayImage) -> EdgeMap {
    let blurred = filter::gaussian_blur_f32(gray, pre_blur_sigma());
    edges::canny(&blurred, CANNY_LOW, CANNY_HIGH)
}

/// Standard deviation of grayscale intensity, used as a contrast measure.
pub fn gray_std_dev(region: &RgbImage) -> f64 {
    let gray = imageops::grayscale(region);
    let n = gray.as_raw().len();
    if n == 0 {
        return 0.0;
    }

    let (sum, sum_sq) = gray.as_raw().iter().fold((0.0f64, 0.0f64), |(s, sq), &p| {
        let v = p as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0).sqrt()
}
