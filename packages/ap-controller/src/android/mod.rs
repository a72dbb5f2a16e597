use ap_adb::command::local_service::Input;
use tracing::info;

use crate::Controller;

/// Android controller structure, bound to one device serial
pub struct AndroidController {
    device: ap_adb::Device,
    width: u32,
    height: u32,
}

impl AndroidController {
    pub fn connect(serial: &str) -> anyhow::Result<Self> {
        let device = ap_adb::connect(serial)
            .map_err(|err| anyhow::anyhow!("failed to connect to {serial}: {err}"))?;
        Self::from_device(device)
    }

    pub fn from_device(device: ap_adb::Device) -> anyhow::Result<Self> {
        let screen = device
            .screencap()
            .map_err(|err| anyhow::anyhow!("failed to get screencap: {err}"))?;
        let (width, height) = (screen.width(), screen.height());
        info!(
            "[AndroidController]: connected to {} ({}x{})",
            device.serial(),
            width,
            height
        );
        Ok(Self {
            device,
            width,
            height,
        })
    }

    /// Get the underlying ADB device
    pub fn device(&self) -> &ap_adb::Device {
        &self.device
    }
}

impl Controller for AndroidController {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn screencap(&self) -> anyhow::Result<image::DynamicImage> {
        self.device
            .screencap()
            .map_err(|err| anyhow::anyhow!("failed to get screencap: {err}"))
    }

    fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        self.device
            .input(Input::Tap { x, y })
            .map_err(|err| anyhow::anyhow!("failed to tap ({x}, {y}): {err}"))
    }

    fn input_text(&self, text: &str) -> anyhow::Result<()> {
        self.device
            .input(Input::Text(text.to_string()))
            .map_err(|err| anyhow::anyhow!("failed to input text: {err}"))
    }
}
