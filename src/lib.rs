pub use ap_adb as adb;
pub use ap_controller as controller;
pub use ap_cv as cv;

pub mod config;
pub mod error;
pub mod interpreter;
pub mod script;

// Re-export the Controller trait and concrete implementations
pub use controller::AndroidController;
pub use controller::Controller;
#[cfg(feature = "desktop")]
pub use controller::DesktopController;

pub use adb::Device;
pub use image::DynamicImage;

pub use cv::core::template_matching::MatchTemplateMethod;
pub use cv::matcher::MatcherOptions;
pub use cv::ocr::{Region, Tesseract, TextRecognizer};

pub use config::Config;
pub use error::ScriptError;
pub use interpreter::{Interpreter, RunReport, RunState, StepOutcome, StepReport};
pub use script::{Instruction, Script, Step};

use anyhow::bail;
use cv::matcher::SingleMatcher;
use tracing::info;

/// The main entry point for automation scripts.
///
/// `AutoPlay` binds one device controller (via `ap-controller`) to the computer vision
/// pieces (via `ap-cv`), the backend is picked once when it is constructed.
///
/// # Example
/// ```ignore
/// let controller = AndroidController::connect("emulator-5554")?;
/// let auto_play = AutoPlay::new(controller);
///
/// let script = Script::parse("click_at 10 20\nsleep 0.5\nwrite_text hello\n");
/// let report = auto_play.run_script(&script, &Tesseract::default()).await;
/// ```
pub struct AutoPlay<T: Controller> {
    controller: T,
    config: Config,
}

impl<T: Controller> AutoPlay<T> {
    pub fn new(controller: T) -> Self {
        Self::with_config(controller, Config::default())
    }

    pub fn with_config(controller: T, config: Config) -> Self {
        Self { controller, config }
    }

    /// Access the underlying controller for low-level operations.
    pub fn controller(&self) -> &T {
        &self.controller
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the screen size from the controller.
    pub fn screen_size(&self) -> (u32, u32) {
        self.controller.screen_size()
    }

    /// Take a screenshot.
    pub fn screencap(&self) -> anyhow::Result<DynamicImage> {
        self.controller.screencap()
    }

    /// Click at the specified coordinates.
    pub fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        self.controller.click(x, y)
    }

    /// Searches for a template image on the current screen.
    ///
    /// Returns the bounding rectangle of the match if found, or `None`.
    pub fn find_image(
        &self,
        template: &DynamicImage,
    ) -> anyhow::Result<Option<image::math::Rect>> {
        let screen = self.controller.screencap()?;

        let screen_luma = screen.to_luma32f();
        let template_luma = template.to_luma32f();

        let res = SingleMatcher::match_template(
            &screen_luma,
            &template_luma,
            &self.config.matcher_options(),
        );

        Ok(res.result.map(|m| m.rect))
    }

    /// Crop `width`x`height` at `(x, y)` out of a fresh screenshot, to be saved as a template.
    pub fn capture_region(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> anyhow::Result<DynamicImage> {
        let screen = self.controller.screencap()?;
        let fits = x
            .checked_add(width)
            .is_some_and(|x2| x2 <= screen.width())
            && y.checked_add(height).is_some_and(|y2| y2 <= screen.height());
        if width == 0 || height == 0 || !fits {
            bail!(
                "region {width}x{height} at ({x}, {y}) is outside the {}x{} screen",
                screen.width(),
                screen.height()
            );
        }
        Ok(screen.crop_imm(x, y, width, height))
    }

    /// An interpreter over this controller, set up from the config.
    pub fn interpreter<'a, R: TextRecognizer + ?Sized>(
        &'a self,
        recognizer: &'a R,
    ) -> Interpreter<'a, T, R> {
        Interpreter::new(&self.controller, recognizer)
            .with_templates_dir(&self.config.templates_dir)
            .with_matcher_options(self.config.matcher_options())
    }

    /// Run `script` to completion.
    pub async fn run_script<R: TextRecognizer + ?Sized>(
        &self,
        script: &Script,
        recognizer: &R,
    ) -> RunReport {
        info!(
            "[AutoPlay]: running script on a {:?} screen",
            self.controller.screen_size()
        );
        self.interpreter(recognizer).run(script).await
    }
}
