use std::io::Read;

use super::error::AdbResult;

pub mod host_service;
pub mod local_service;

/// A request to the adb server and the way its response is read back.
pub trait AdbCommand {
    type Output;

    fn raw_command(&self) -> String;

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output>;
}
