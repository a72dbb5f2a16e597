//! Device control: screencap, click and text input over one capability surface.
//!
//! [`AndroidController`] drives a device through the adb server by serial,
//! `DesktopController` (feature `desktop`) drives the local display and input devices.

use image::DynamicImage;

pub mod android;
#[cfg(feature = "desktop")]
pub mod desktop;

pub use android::AndroidController;
#[cfg(feature = "desktop")]
pub use desktop::DesktopController;

/// A controller, responsible for the device operations like click, text input, screencap, etc.
///
/// Implementations are used through `&self` and serialize access internally if they need to.
pub trait Controller {
    /// Screen size in pixels, as `(width, height)`.
    fn screen_size(&self) -> (u32, u32);

    /// Capture the full screen.
    ///
    /// An error means the device channel itself is unusable.
    fn screencap(&self) -> anyhow::Result<DynamicImage>;

    /// Tap at the screen coordinate.
    ///
    /// Best effort: the channels do not report whether the event was delivered,
    /// an error only means the channel could not be reached.
    fn click(&self, x: u32, y: u32) -> anyhow::Result<()>;

    /// Enter `text` literally. Best effort, like [`Controller::click`].
    fn input_text(&self, text: &str) -> anyhow::Result<()>;
}

impl<T: Controller + ?Sized> Controller for &T {
    fn screen_size(&self) -> (u32, u32) {
        (**self).screen_size()
    }
    fn screencap(&self) -> anyhow::Result<DynamicImage> {
        (**self).screencap()
    }
    fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        (**self).click(x, y)
    }
    fn input_text(&self, text: &str) -> anyhow::Result<()> {
        (**self).input_text(text)
    }
}

impl<T: Controller + ?Sized> Controller for Box<T> {
    fn screen_size(&self) -> (u32, u32) {
        (**self).screen_size()
    }
    fn screencap(&self) -> anyhow::Result<DynamicImage> {
        (**self).screencap()
    }
    fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        (**self).click(x, y)
    }
    fn input_text(&self, text: &str) -> anyhow::Result<()> {
        (**self).input_text(text)
    }
}
