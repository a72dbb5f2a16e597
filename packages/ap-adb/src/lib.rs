//! ADB (Android Debug Bridge) Rust implementation
//!
//! Provides functionality for communicating with Android devices
use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Write},
    net::{SocketAddrV4, TcpStream},
    time::Duration,
};

use image::{DynamicImage, codecs::png::PngDecoder};
use tracing::{debug, trace};

use self::{
    command::{AdbCommand, local_service},
    host::Host,
    utils::{execute_adb, write_request},
};

pub mod command;
pub mod error;
pub mod host;
pub mod utils;

// Re-export commonly used types
pub use error::{AdbError, AdbResult};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
    pub info: BTreeMap<String, String>,
}

impl DeviceInfo {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

impl TryFrom<&str> for DeviceInfo {
    type Error = AdbError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Turn "serial\tstate key1:value1 key2:value2 ..." into a `DeviceInfo`.
        let mut pairs = value.split_whitespace();
        let serial = pairs.next();
        let state = pairs.next();
        if let (Some(serial), Some(state)) = (serial, state) {
            let info: BTreeMap<String, String> = pairs
                .filter_map(|pair| {
                    let mut kv = pair.split(':');
                    if let (Some(k), Some(v), None) = (kv.next(), kv.next(), kv.next()) {
                        Some((k.to_owned(), v.to_owned()))
                    } else {
                        None
                    }
                })
                .collect();

            Ok(DeviceInfo {
                serial: serial.to_owned(),
                state: state.to_owned(),
                info,
            })
        } else {
            Err(AdbError::DeviceInfoParseError(format!(
                "failed to parse device info from {}",
                value
            )))
        }
    }
}

pub struct AdbTcpStream {
    inner: TcpStream,
}

impl AdbTcpStream {
    pub fn connect(socket_addr: SocketAddrV4) -> AdbResult<Self> {
        trace!("connecting to {:?}...", socket_addr);
        let stream = TcpStream::connect(socket_addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        trace!("connected");
        Ok(Self { inner: stream })
    }

    pub fn execute_command<T>(&mut self, command: impl AdbCommand<Output = T>) -> AdbResult<T> {
        let raw = command.raw_command();
        trace!("executing command: {:?}...", raw);
        write_request(self, &raw)?;

        command.handle_response(self)
    }
}

impl Read for AdbTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for AdbTcpStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// List the devices known by the local adb server.
pub fn devices() -> AdbResult<Vec<DeviceInfo>> {
    host::connect_default()?.devices_long()
}

/// Serial of the `index`th local emulator, `emulator-5554`, `emulator-5556`, ...
pub fn emulator_serial(index: u32) -> String {
    format!("emulator-{}", 5554 + index * 2)
}

/// Connect to a device using its serial number
///
/// Network serials (`host:port`) are `adb connect`ed first.
/// Returns [`AdbError::DeviceNotFound`] if the serial is not listed as online afterwards.
pub fn connect<S: AsRef<str>>(serial: S) -> AdbResult<Device> {
    let serial = serial.as_ref();

    if serial.contains(':') {
        let output = execute_adb(&["connect", serial])?;
        debug!("adb connect {serial}: {}", String::from_utf8_lossy(&output).trim());
    }

    let host = host::connect_default()?;
    let online = host
        .devices_long()?
        .iter()
        .any(|device_info| device_info.serial == serial && device_info.is_online());

    if !online {
        Err(AdbError::DeviceNotFound(serial.to_string()))
    } else {
        Ok(Device::new(host, serial.to_string()))
    }
}

/// A device that can be used to execute ADB commands
pub struct Device {
    /// The ADB host used to access this device
    host: Host,

    /// ADB device serial number
    serial: String,
}

impl Device {
    pub fn new(host: Host, serial: String) -> Self {
        Self { host, serial }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn input(&self, input: local_service::Input) -> AdbResult<()> {
        self.execute_command_by_socket(input)
    }

    pub fn shell(&self, command: impl Into<String>) -> AdbResult<String> {
        self.execute_command_by_socket(local_service::ShellCommand::new(command.into()))
    }

    /// Get the png encoded screencap data in bytes
    pub fn raw_screencap(&self) -> AdbResult<Vec<u8>> {
        // INFO: Using tcp stream to communicate with adb server directly
        // INFO: is about 100ms faster than using process
        self.execute_command_by_socket(local_service::ScreenCapPng)
    }

    /// Get the decoded screencap image
    pub fn screencap(&self) -> AdbResult<DynamicImage> {
        let bytes = self.raw_screencap()?;

        let decoder = PngDecoder::new(Cursor::new(bytes))?;
        let image = DynamicImage::from_decoder(decoder)?;
        Ok(image)
    }

    /// `adb -s <self.serial> <command>`
    pub fn execute_command_by_process(&self, command: &str) -> AdbResult<Vec<u8>> {
        utils::execute_adb_command(&self.serial, command)
    }

    pub fn execute_command_by_socket<T>(
        &self,
        command: impl AdbCommand<Output = T>,
    ) -> AdbResult<T> {
        self.host.execute_local_command(&self.serial, command)
    }
}
