//! Reading text out of a rectangular region of a screen.

use std::{
    fmt::Display,
    path::PathBuf,
    process::Command,
};

use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("invalid region {region} for a {width}x{height} screen")]
    InvalidRegion {
        region: Region,
        width: u32,
        height: u32,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The recognition engine failed, carries its diagnostic output
    #[error("OCR engine failed: {0}")]
    Engine(String),
}

/// An axis-aligned rectangle `(x1, y1)..(x2, y2)` in screen pixels, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// `(x, y, width, height)` if the region is non-empty and lies inside a `width`x`height` image.
    pub fn bounds_within(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let inside = self.x1 >= 0
            && self.y1 >= 0
            && self.x2 > self.x1
            && self.y2 > self.y1
            && i64::from(self.x2) <= i64::from(width)
            && i64::from(self.y2) <= i64::from(height);
        inside.then(|| {
            (
                self.x1 as u32,
                self.y1 as u32,
                (self.x2 - self.x1) as u32,
                (self.y2 - self.y1) as u32,
            )
        })
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})..({}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Crop `region` out of `screen`.
///
/// Empty, inverted or out of bounds regions are an [`OcrError::InvalidRegion`]
/// instead of an empty crop.
pub fn crop_region(screen: &DynamicImage, region: Region) -> Result<DynamicImage, OcrError> {
    let (x, y, w, h) = region
        .bounds_within(screen.width(), screen.height())
        .ok_or(OcrError::InvalidRegion {
            region,
            width: screen.width(),
            height: screen.height(),
        })?;
    Ok(screen.crop_imm(x, y, w, h))
}

/// An optical character recognition engine.
pub trait TextRecognizer {
    /// Recognize the text in `image`. The text is returned as the engine produced it, untrimmed.
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for &T {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        (**self).recognize(image)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        (**self).recognize(image)
    }
}

/// Crop `region` out of `screen` and recognize its text.
pub fn read_text<R: TextRecognizer + ?Sized>(
    recognizer: &R,
    screen: &DynamicImage,
    region: Region,
) -> Result<String, OcrError> {
    let crop = crop_region(screen, region)?;
    debug!("recognizing {}x{} crop of {}", crop.width(), crop.height(), region);
    recognizer.recognize(&crop)
}

/// The `tesseract` command line engine.
///
/// The crop is written to a temporary png and passed as
/// `tesseract <png> stdout -l <language> --psm <psm>`.
#[derive(Debug, Clone)]
pub struct Tesseract {
    pub binary: PathBuf,
    pub language: String,
    /// Page segmentation mode
    pub psm: u8,
}

impl Default for Tesseract {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            psm: 3,
        }
    }
}

impl Tesseract {
    fn args(&self, input: &std::path::Path) -> Vec<std::ffi::OsString> {
        vec![
            input.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            self.language.clone().into(),
            "--psm".into(),
            self.psm.to_string().into(),
        ]
    }
}

impl TextRecognizer for Tesseract {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let input = tempfile::Builder::new()
            .prefix("ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let args = self.args(input.path());
        trace!("running {:?} {:?}", self.binary, args);
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|err| OcrError::Engine(format!("failed to run {:?}: {err}", self.binary)))?;
        if !output.status.success() {
            return Err(OcrError::Engine(format!(
                "{:?} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
