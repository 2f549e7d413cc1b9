//! Zero-mean normalized cross-correlation.
//!
//! Scores follow OpenCV's `TM_CCOEFF_NORMED`: for every placement of the
//! template inside the image,
//!
//! ```text
//! R(x, y) = sum(T' * I') / sqrt(sum(T'^2) * sum(I'^2))
//! ```
//!
//! where `T'` and `I'` are the template and the covered window minus their
//! means. Windows with zero variance score 0.
//!
//! Window sums come from integral images and the template is stored as a
//! list of its non-zero pixels, which is cheap for sparse edge maps. Rows of
//! placements are scored in parallel with rayon.

use image::GrayImage;
use rayon::prelude::*;

/// Best placement of a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub score: f64,
    pub x: u32,
    pub y: u32,
}

impl MatchScore {
    const NONE: MatchScore = MatchScore {
        score: f64::NEG_INFINITY,
        x: 0,
        y: 0,
    };

    fn better(self, other: MatchScore) -> MatchScore {
        // Ties keep the earliest placement in row-major order.
        if other.score > self.score
            || (other.score == self.score && (other.y, other.x) < (self.y, self.x))
        {
            other
        } else {
            self
        }
    }
}

/// Template prepared for repeated correlation.
#[derive(Debug, Clone)]
pub struct PreparedTemplate {
    width: u32,
    height: u32,
    /// Non-zero pixels as (dx, dy, value)
    nonzero: Vec<(u32, u32, f64)>,
    mean: f64,
    /// sqrt(sum(T'^2))
    norm: f64,
}

impl PreparedTemplate {
    pub fn new(template: &GrayImage) -> Self {
        let (width, height) = template.dimensions();
        let n = (width as f64) * (height as f64);

        let mut nonzero = Vec::new();
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (x, y, p) in template.enumerate_pixels() {
            let v = p[0] as f64;
            if v != 0.0 {
                nonzero.push((x, y, v));
                sum += v;
                sum_sq += v * v;
            }
        }

        let (mean, norm) = if n > 0.0 {
            let mean = sum / n;
            (mean, (sum_sq - sum * mean).max(0.0).sqrt())
        } else {
            (0.0, 0.0)
        };

        Self {
            width,
            height,
            nonzero,
            mean,
            norm,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.width <= width && self.height <= height
    }

    /// Best `TM_CCOEFF_NORMED` score over all placements inside `image`.
    ///
    /// Returns `None` when the template does not fit.
    pub fn best_match(&self, image: &GrayImage) -> Option<MatchScore> {
        let (iw, ih) = image.dimensions();
        if !self.fits_in(iw, ih) {
            return None;
        }

        let integral = Integral::new(image);
        let n = (self.width as f64) * (self.height as f64);
        let out_w = iw - self.width + 1;
        let out_h = ih - self.height + 1;
        let raw = image.as_raw();
        let stride = iw as usize;

        let best = (0..out_h)
            .into_par_iter()
            .map(|y| {
                let mut row_best = MatchScore::NONE;
                for x in 0..out_w {
                    let (win_sum, win_sum_sq) =
                        integral.window(x, y, self.width, self.height);

                    let mut cross = 0.0;
                    for &(dx, dy, tv) in &self.nonzero {
                        let idx = (y + dy) as usize * stride + (x + dx) as usize;
                        cross += tv * raw[idx] as f64;
                    }

                    // sum(T' * I') == sum(T * I) - mean(T) * sum(I)
                    let numerator = cross - self.mean * win_sum;
                    let win_var = (win_sum_sq - win_sum * win_sum / n).max(0.0);
                    let score = normalized(numerator, self.norm * win_var.sqrt());

                    row_best = row_best.better(MatchScore { score, x, y });
                }
                row_best
            })
            .reduce(|| MatchScore::NONE, MatchScore::better);

        Some(best)
    }
}

fn normalized(numerator: f64, denominator: f64) -> f64 {
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    (numerator / denominator).clamp(-1.0, 1.0)
}

/// Summed-area tables of pixel values and squared values.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let width = w + 1;
        let mut sum = vec![0.0; width * (h + 1)];
        let mut sum_sq = vec![0.0; width * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * width + (x + 1);
                sum[i] = sum[i - width] + row;
                sum_sq[i] = sum_sq[i - width] + row_sq;
            }
        }

        Self { width, sum, sum_sq }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[f64], x: usize, y: usize| table[y * self.width + x];
        let rect = |table: &[f64]| {
            at(table, x1, y1) - at(table, x0, y1) - at(table, x1, y0) + at(table, x0, y0)
        };
        (rect(&self.sum), rect(&self.sum_sq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn pattern(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x + 2 * y) % 5 == 0 || x == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn embed(template: &GrayImage, w: u32, h: u32, at: (u32, u32)) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        image::imageops::replace(&mut img, template, at.0 as i64, at.1 as i64);
        img
    }

    /// Direct evaluation of the formula for cross-checking.
    fn naive_score(template: &GrayImage, image: &GrayImage, x: u32, y: u32) -> f64 {
        let (tw, th) = template.dimensions();
        let n = (tw * th) as f64;
        let t_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        let mut w_sum = 0.0;
        for dy in 0..th {
            for dx in 0..tw {
                w_sum += image.get_pixel(x + dx, y + dy)[0] as f64;
            }
        }
        let w_mean = w_sum / n;
        let (mut num, mut tt, mut ii) = (0.0, 0.0, 0.0);
        for dy in 0..th {
            for dx in 0..tw {
                let t = template.get_pixel(dx, dy)[0] as f64 - t_mean;
                let i = image.get_pixel(x + dx, y + dy)[0] as f64 - w_mean;
                num += t * i;
                tt += t * t;
                ii += i * i;
            }
        }
        normalized(num, (tt * ii).sqrt())
    }

    #[test]
    fn test_exact_match_scores_one_at_location() {
        let t = pattern(12, 9);
        let img = embed(&t, 40, 30, (17, 8));
        let best = PreparedTemplate::new(&t).best_match(&img).unwrap();
        assert!((best.score - 1.0).abs() < 1e-9, "score {}", best.score);
        assert_eq!((best.x, best.y), (17, 8));
    }

    #[test]
    fn test_matches_naive_formula() {
        let t = pattern(7, 5);
        let img = GrayImage::from_fn(20, 14, |x, y| Luma([((x * 31 + y * 17) % 7 * 40) as u8]));
        let prepared = PreparedTemplate::new(&t);
        let best = prepared.best_match(&img).unwrap();

        let mut expected = f64::NEG_INFINITY;
        for y in 0..=(14 - 5) {
            for x in 0..=(20 - 7) {
                expected = expected.max(naive_score(&t, &img, x, y));
            }
        }
        assert!((best.score - expected).abs() < 1e-9);
        assert!((naive_score(&t, &img, best.x, best.y) - best.score).abs() < 1e-9);
    }

    #[test]
    fn test_flat_image_scores_zero() {
        let t = pattern(6, 6);
        let img = GrayImage::from_pixel(20, 20, Luma([0]));
        let best = PreparedTemplate::new(&t).best_match(&img).unwrap();
        assert_eq!(best.score, 0.0);
    }

    #[test]
    fn test_template_larger_than_image() {
        let t = pattern(30, 10);
        let img = GrayImage::new(20, 20);
        assert!(PreparedTemplate::new(&t).best_match(&img).is_none());
    }

    #[test]
    fn test_same_size_template_has_single_placement() {
        let t = pattern(10, 10);
        let best = PreparedTemplate::new(&t).best_match(&t).unwrap();
        assert_eq!((best.x, best.y), (0, 0));
        assert!((best.score - 1.0).abs() < 1e-9);
    }
}
