use std::path::PathBuf;

use ap_cv::{Region, ocr::OcrError};
use thiserror::Error;

/// Errors raised while parsing or running a script
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// The device channel is unusable, ends the run
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A template image could not be read, skips the instruction
    #[error("template not found: {}: {reason}", path.display())]
    TemplateNotFound { path: PathBuf, reason: String },

    /// A `read_text` region that is empty or outside the screen, skips the instruction
    #[error("invalid region {region} for a {width}x{height} screen")]
    InvalidRegion {
        region: Region,
        width: u32,
        height: u32,
    },

    /// A script line that could not be parsed, the line is skipped
    #[error("malformed instruction at line {line_no}: {line:?}: {reason}")]
    MalformedInstruction {
        line_no: usize,
        line: String,
        reason: String,
    },

    /// Text recognition failed, skips the instruction
    #[error("text recognition failed: {0}")]
    Ocr(String),
}

impl ScriptError {
    /// Whether the error ends the whole run rather than a single instruction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScriptError::DeviceUnavailable(_))
    }

    /// Line number the error is attached to, if any.
    pub fn line_no(&self) -> Option<usize> {
        match self {
            ScriptError::MalformedInstruction { line_no, .. } => Some(*line_no),
            _ => None,
        }
    }
}

impl From<OcrError> for ScriptError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::InvalidRegion {
                region,
                width,
                height,
            } => ScriptError::InvalidRegion {
                region,
                width,
                height,
            },
            other => ScriptError::Ocr(other.to_string()),
        }
    }
}
