use std::{thread, time::Duration};

use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
use parking_lot::Mutex;
use tracing::info;
use xcap::Monitor;

use crate::Controller;

/// A controller for the local display, capturing one monitor and injecting
/// mouse and keyboard events through the OS input devices.
///
/// Captures are in physical pixels while the mouse moves in logical
/// coordinates, so every point is divided by the monitor's scale factor.
pub struct DesktopController {
    monitor: Monitor,
    origin: (i32, i32),
    /// Capture size in physical pixels
    size: (u32, u32),
    scale_factor: f32,
    enigo: Mutex<Enigo>,
}

/// Map a point of a capture taken at `scale_factor` to logical screen
/// coordinates of a monitor whose top-left corner is at `origin`.
fn capture_to_screen(origin: (i32, i32), scale_factor: f32, x: u32, y: u32) -> (i32, i32) {
    let scale = if scale_factor > 0.0 { scale_factor } else { 1.0 };
    let logical = |v: u32| (v as f32 / scale).round() as i32;
    (origin.0 + logical(x), origin.1 + logical(y))
}

impl DesktopController {
    /// Bind to the primary monitor.
    pub fn primary() -> anyhow::Result<Self> {
        let monitors =
            Monitor::all().map_err(|e| anyhow::anyhow!("Failed to enumerate monitors: {e}"))?;
        let monitor = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("No primary monitor found"))?;
        Self::from_monitor(monitor)
    }

    pub fn from_monitor(monitor: Monitor) -> anyhow::Result<Self> {
        let map_err = |e: xcap::XCapError| anyhow::anyhow!("Failed to query monitor: {e}");
        let origin = (monitor.x().map_err(map_err)?, monitor.y().map_err(map_err)?);
        let scale_factor = Some(monitor.scale_factor().map_err(map_err)?)
            .filter(|scale| *scale > 0.0)
            .unwrap_or(1.0);
        let physical = |v: u32| (v as f32 * scale_factor).round() as u32;
        let size = (
            physical(monitor.width().map_err(map_err)?),
            physical(monitor.height().map_err(map_err)?),
        );

        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("Failed to create enigo instance: {e}"))?;

        info!(
            "[DesktopController]: bound to monitor at {:?} ({}x{}, scale {})",
            origin, size.0, size.1, scale_factor
        );
        Ok(Self {
            monitor,
            origin,
            size,
            scale_factor,
            enigo: Mutex::new(enigo),
        })
    }

    /// Convert capture coordinates to screen coordinates
    fn local_to_screen(&self, x: u32, y: u32) -> (i32, i32) {
        capture_to_screen(self.origin, self.scale_factor, x, y)
    }
}

impl Controller for DesktopController {
    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn screencap(&self) -> anyhow::Result<image::DynamicImage> {
        let image = self
            .monitor
            .capture_image()
            .map_err(|e| anyhow::anyhow!("Capture error: {e}"))?;
        Ok(image::DynamicImage::ImageRgba8(image))
    }

    fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        let (screen_x, screen_y) = self.local_to_screen(x, y);

        let mut enigo = self.enigo.lock();
        enigo
            .move_mouse(screen_x, screen_y, Coordinate::Abs)
            .map_err(|e| anyhow::anyhow!("Failed to move mouse: {e}"))?;

        thread::sleep(Duration::from_millis(10));

        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| anyhow::anyhow!("Failed to click: {e}"))?;

        Ok(())
    }

    fn input_text(&self, text: &str) -> anyhow::Result<()> {
        self.enigo
            .lock()
            .text(text)
            .map_err(|e| anyhow::anyhow!("Failed to type text: {e}"))
    }
}
