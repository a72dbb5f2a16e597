//! Image matching based on template matching
//!
//! [`SingleMatcher`]: Match one template on an image to get one result.

use image::{DynamicImage, ImageBuffer, Luma, math::Rect};
use tracing::debug;

use crate::core::template_matching::{
    LumaImage, Match, MatchTemplateMethod, find_extremes, match_template,
};

/// Rounding slack for thresholds at the ideal score (`1.0`, or `0.0` for the
/// difference methods), so an exact copy still passes a threshold of `1.0`.
pub const SCORE_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy)]
pub struct MatcherOptions {
    pub method: MatchTemplateMethod,
    pub threshold: f32,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            method: MatchTemplateMethod::CorrelationCoefficientNormed,
            threshold: 0.8,
        }
    }
}

impl MatcherOptions {
    pub fn method_default(method: MatchTemplateMethod) -> Self {
        let threshold = match method {
            MatchTemplateMethod::SumOfSquaredDifference
            | MatchTemplateMethod::CrossCorrelation
            | MatchTemplateMethod::CorrelationCoefficient => 30.0,
            MatchTemplateMethod::SumOfSquaredDifferenceNormed => 0.2,
            MatchTemplateMethod::CrossCorrelationNormed
            | MatchTemplateMethod::CorrelationCoefficientNormed => 0.8,
        };
        Self { method, threshold }
    }
    pub fn with_method(mut self, method: MatchTemplateMethod) -> Self {
        self.method = method;
        self
    }
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whether `value` is good enough to count as a match.
    ///
    /// The comparison is exact, except for thresholds within [`SCORE_TOLERANCE`]
    /// of the ideal score, which accept values up to the tolerance beyond it.
    pub fn accepts(&self, value: f32) -> bool {
        if self.method.lower_is_better() {
            if self.threshold < SCORE_TOLERANCE {
                value <= self.threshold + SCORE_TOLERANCE
            } else {
                value <= self.threshold
            }
        } else if self.threshold > 1.0 - SCORE_TOLERANCE {
            value + SCORE_TOLERANCE >= self.threshold
        } else {
            value >= self.threshold
        }
    }
}

/// Match one template on an image to get one result.
///
/// The best position is the first extreme in row-major order, so when several
/// positions score exactly the same the top-most, then left-most one wins.
/// Which of several pixel-identical occurrences is reported is therefore a
/// property of the scan, not of the screen.
pub struct SingleMatcher;

pub struct SingleMatcherResult {
    /// The best match, if it passed the threshold.
    pub result: Option<Match>,
    /// The best match regardless of the threshold, `None` if the template does not fit.
    pub best: Option<Match>,
    pub matched_image: ImageBuffer<Luma<f32>, Vec<f32>>,
}

impl SingleMatcher {
    pub fn match_template(
        image: &LumaImage,
        template: &LumaImage,
        options: &MatcherOptions,
    ) -> SingleMatcherResult {
        let matched_image = match_template(image, template, options.method);
        if matched_image.width() == 0 || matched_image.height() == 0 {
            debug!(
                "template {}x{} does not fit in image {}x{}",
                template.width(),
                template.height(),
                image.width(),
                image.height()
            );
            return SingleMatcherResult {
                result: None,
                best: None,
                matched_image,
            };
        }

        let extremes = find_extremes(&matched_image);
        let (location, value) = if options.method.lower_is_better() {
            (extremes.min_value_location, extremes.min_value)
        } else {
            (extremes.max_value_location, extremes.max_value)
        };
        let best = Match {
            rect: Rect {
                x: location.0,
                y: location.1,
                width: template.width(),
                height: template.height(),
            },
            value,
        };
        debug!(
            "{} best {:.4} at {:?}, threshold {}",
            options.method, value, location, options.threshold
        );

        SingleMatcherResult {
            result: options.accepts(value).then_some(best),
            best: Some(best),
            matched_image,
        }
    }

    /// Convert both images to one intensity channel and locate `template` on `screen`.
    ///
    /// Returns the center of the best-aligned footprint, or `None` below the threshold.
    pub fn locate(
        screen: &DynamicImage,
        template: &DynamicImage,
        options: &MatcherOptions,
    ) -> Option<(u32, u32)> {
        let screen = screen.to_luma32f();
        let template = template.to_luma32f();
        Self::match_template(&screen, &template, options)
            .result
            .map(|m| m.center())
    }
}
