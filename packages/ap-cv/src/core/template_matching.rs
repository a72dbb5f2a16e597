//! Template matching on grayscale `f32` images.
//!
//! Window sums of the image come from summed-area tables, so every method
//! costs one cross-correlation pass over the template footprint per position.
//! Result rows are scored in parallel on the rayon pool.
use std::fmt::Display;

use image::{ImageBuffer, Luma, math::Rect};
use rayon::prelude::*;

pub use imageproc::template_matching::find_extremes;

pub type LumaImage = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub rect: Rect,
    pub value: f32,
}

impl Match {
    /// Center of the matched footprint, with integer truncation.
    pub fn center(&self) -> (u32, u32) {
        (
            self.rect.x + self.rect.width / 2,
            self.rect.y + self.rect.height / 2,
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchTemplateMethod {
    SumOfSquaredDifference,
    SumOfSquaredDifferenceNormed,
    CrossCorrelation,
    CrossCorrelationNormed,
    CorrelationCoefficient,
    CorrelationCoefficientNormed,
}

impl MatchTemplateMethod {
    pub const ALL: [MatchTemplateMethod; 6] = [
        MatchTemplateMethod::SumOfSquaredDifference,
        MatchTemplateMethod::SumOfSquaredDifferenceNormed,
        MatchTemplateMethod::CrossCorrelation,
        MatchTemplateMethod::CrossCorrelationNormed,
        MatchTemplateMethod::CorrelationCoefficient,
        MatchTemplateMethod::CorrelationCoefficientNormed,
    ];

    /// Whether the best match is the minimum of the result surface.
    pub fn lower_is_better(self) -> bool {
        matches!(
            self,
            MatchTemplateMethod::SumOfSquaredDifference
                | MatchTemplateMethod::SumOfSquaredDifferenceNormed
        )
    }
}

impl Display for MatchTemplateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchTemplateMethod::SumOfSquaredDifference => "sqdiff",
            MatchTemplateMethod::SumOfSquaredDifferenceNormed => "sqdiff_normed",
            MatchTemplateMethod::CrossCorrelation => "ccorr",
            MatchTemplateMethod::CrossCorrelationNormed => "ccorr_normed",
            MatchTemplateMethod::CorrelationCoefficient => "ccoeff",
            MatchTemplateMethod::CorrelationCoefficientNormed => "ccoeff_normed",
        };
        f.write_str(s)
    }
}

pub fn is_a_more_match_than_b(a: f32, b: f32, method: MatchTemplateMethod) -> bool {
    if method.lower_is_better() { a < b } else { a > b }
}

/// Summed-area table with one row and column of zero padding.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(image: &LumaImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let pixels = image.as_raw();
        let width = w + 1;
        let mut sum = vec![0.0; width * (h + 1)];
        let mut sum_sq = vec![0.0; width * (h + 1)];
        for y in 0..h {
            let (mut row, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = pixels[y * w + x] as f64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * width + x + 1;
                sum[i] = sum[i - width] + row;
                sum_sq[i] = sum_sq[i - width] + row_sq;
            }
        }
        Self { width, sum, sum_sq }
    }

    /// (Σv, Σv²) over the `w`x`h` window at (x, y).
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let at = |table: &[f64], x: usize, y: usize| table[y * self.width + x];
        let rect = |table: &[f64]| {
            at(table, x + w, y + h) - at(table, x, y + h) - at(table, x + w, y) + at(table, x, y)
        };
        (rect(&self.sum), rect(&self.sum_sq))
    }
}

/// Slides `template` over `image` and scores every position with `method`.
///
/// The result is `(W - w + 1) x (H - h + 1)`, and empty when the template
/// does not fit inside the image. Normalized scores of windows with no
/// energy (or no variance for [`MatchTemplateMethod::CorrelationCoefficientNormed`])
/// are the worst possible value instead of NaN.
pub fn match_template(
    image: &LumaImage,
    template: &LumaImage,
    method: MatchTemplateMethod,
) -> LumaImage {
    use MatchTemplateMethod::*;

    let (iw, ih) = (image.width(), image.height());
    let (tw, th) = (template.width(), template.height());
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return LumaImage::new(0, 0);
    }
    let (out_w, out_h) = (iw - tw + 1, ih - th + 1);
    let (iw, tw, th) = (iw as usize, tw as usize, th as usize);

    let integral = Integral::new(image);
    let pixels = image.as_raw();
    let t = template.as_raw();
    let n = (tw * th) as f64;
    let t_sum: f64 = t.iter().map(|&v| v as f64).sum();
    let t_sum_sq: f64 = t.iter().map(|&v| v as f64 * v as f64).sum();
    let t_mean = t_sum / n;
    let t_var = t_sum_sq - t_sum * t_sum / n;
    // Below this a window is flat, the rest is rounding noise of the tables
    let min_var = n * 1e-8;

    let score = |x: usize, y: usize| -> f32 {
        let mut ccorr = 0.0;
        for (ty, t_row) in t.chunks_exact(tw).enumerate() {
            let start = (y + ty) * iw + x;
            let i_row = &pixels[start..start + tw];
            ccorr += i_row
                .iter()
                .zip(t_row)
                .map(|(&iv, &tv)| iv as f64 * tv as f64)
                .sum::<f64>();
        }
        let (i_sum, i_sum_sq) = integral.window(x, y, tw, th);

        let value = match method {
            CrossCorrelation => ccorr,
            CrossCorrelationNormed => {
                let denom = (i_sum_sq * t_sum_sq).sqrt();
                if denom > f64::EPSILON { ccorr / denom } else { 0.0 }
            }
            SumOfSquaredDifference => (i_sum_sq - 2.0 * ccorr + t_sum_sq).max(0.0),
            SumOfSquaredDifferenceNormed => {
                let sqdiff = (i_sum_sq - 2.0 * ccorr + t_sum_sq).max(0.0);
                let denom = (i_sum_sq * t_sum_sq).sqrt();
                if denom > f64::EPSILON {
                    sqdiff / denom
                } else if sqdiff <= f64::EPSILON {
                    0.0
                } else {
                    1.0
                }
            }
            CorrelationCoefficient => ccorr - t_mean * i_sum,
            CorrelationCoefficientNormed => {
                let i_var = (i_sum_sq - i_sum * i_sum / n).max(0.0);
                if i_var > min_var && t_var > min_var {
                    ((ccorr - t_mean * i_sum) / (i_var * t_var).sqrt()).clamp(-1.0, 1.0)
                } else {
                    0.0
                }
            }
        };
        value as f32
    };

    let mut scores = vec![0.0f32; out_w as usize * out_h as usize];
    scores
        .par_chunks_mut(out_w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                *value = score(x, y);
            }
        });
    LumaImage::from_raw(out_w, out_h, scores).unwrap_or_else(|| LumaImage::new(0, 0))
}
