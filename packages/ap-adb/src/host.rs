//! The adb server running on the host machine.

use std::net::{Ipv4Addr, SocketAddrV4};

use tracing::trace;

use crate::{
    AdbTcpStream, DeviceInfo,
    command::{
        AdbCommand,
        host_service::{DevicesLong, Transport, Version},
    },
    error::{AdbError, AdbResult},
};

pub const DEFAULT_ADB_SERVER_PORT: u16 = 5037;

/// Connect to the adb server on `127.0.0.1:5037`
pub fn connect_default() -> AdbResult<Host> {
    connect(SocketAddrV4::new(
        Ipv4Addr::LOCALHOST,
        DEFAULT_ADB_SERVER_PORT,
    ))
}

/// Connect to the adb server at `addr`, checking that it answers `host:version`.
pub fn connect(addr: SocketAddrV4) -> AdbResult<Host> {
    let host = Host { addr };
    let version = host
        .execute_host_command(Version)
        .map_err(|err| AdbError::ServerNotConnected(format!("{addr}: {err}")))?;
    trace!("adb server {addr} version {version}");
    Ok(host)
}

/// The server closes the connection after every host request,
/// so each command opens its own stream.
#[derive(Debug, Clone)]
pub struct Host {
    addr: SocketAddrV4,
}

impl Host {
    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn devices_long(&self) -> AdbResult<Vec<DeviceInfo>> {
        self.execute_host_command(DevicesLong)
    }

    pub fn execute_host_command<T>(&self, command: impl AdbCommand<Output = T>) -> AdbResult<T> {
        let mut stream = AdbTcpStream::connect(self.addr)?;
        stream.execute_command(command)
    }

    /// Run a local service on the device `serial` through `host:transport`.
    pub fn execute_local_command<T>(
        &self,
        serial: &str,
        command: impl AdbCommand<Output = T>,
    ) -> AdbResult<T> {
        let mut stream = self.transport(serial)?;
        stream.execute_command(command)
    }

    /// Open a stream already switched to the device `serial`.
    pub fn transport(&self, serial: &str) -> AdbResult<AdbTcpStream> {
        let mut stream = AdbTcpStream::connect(self.addr)?;
        stream.execute_command(Transport::new(serial.to_string()))?;
        Ok(stream)
    }
}
