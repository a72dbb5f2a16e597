use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use ap_cv::{matcher::MatcherOptions, ocr::Tesseract};
use serde::{Deserialize, Serialize};

/// Runner configuration, usually read from `auto-script.toml`.
///
/// Every field is optional, command line flags override the values here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Template paths in scripts are relative to this directory
    pub templates_dir: PathBuf,
    /// Minimum `ccoeff_normed` score of a template match, in `(0, 1]`
    pub threshold: f32,
    pub device: DeviceConfig,
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Adb,
    Desktop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub backend: Backend,
    /// adb serial, the first emulator if unset
    pub serial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub binary: PathBuf,
    pub language: String,
    /// Tesseract page segmentation mode
    pub psm: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            threshold: MatcherOptions::default().threshold,
            device: DeviceConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        let tesseract = Tesseract::default();
        Self {
            binary: tesseract.binary,
            language: tesseract.language,
            psm: tesseract.psm,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config = toml::from_str::<Config>(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            bail!("threshold must be in (0, 1], got {}", self.threshold);
        }
        if self.ocr.language.is_empty() {
            bail!("ocr.language must not be empty");
        }
        Ok(())
    }

    pub fn matcher_options(&self) -> MatcherOptions {
        MatcherOptions::default().with_threshold(self.threshold)
    }

    pub fn tesseract(&self) -> Tesseract {
        Tesseract {
            binary: self.ocr.binary.clone(),
            language: self.ocr.language.clone(),
            psm: self.ocr.psm,
        }
    }
}
