//! Requests served by the adb server itself (`host:*`).

use std::io::Read;

use crate::{
    DeviceInfo,
    error::AdbResult,
    utils::{check_response_status, read_payload_to_string},
};

use super::AdbCommand;

/// host:version
pub struct Version;

impl AdbCommand for Version {
    type Output = u32;

    fn raw_command(&self) -> String {
        "host:version".to_string()
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)?;
        let version = read_payload_to_string(stream)?;
        Ok(u32::from_str_radix(&version, 16)?)
    }
}

/// host:devices-l
pub struct DevicesLong;

impl AdbCommand for DevicesLong {
    type Output = Vec<DeviceInfo>;

    fn raw_command(&self) -> String {
        "host:devices-l".to_string()
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)?;
        let payload = read_payload_to_string(stream)?;
        payload
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| DeviceInfo::try_from(line))
            .collect()
    }
}

/// host:transport:<serial>
///
/// Switches the connection to the device, following local services are sent to it.
pub struct Transport {
    serial: String,
}

impl Transport {
    pub fn new(serial: String) -> Self {
        Self { serial }
    }
}

impl AdbCommand for Transport {
    type Output = ();

    fn raw_command(&self) -> String {
        format!("host:transport:{}", self.serial)
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)
    }
}
