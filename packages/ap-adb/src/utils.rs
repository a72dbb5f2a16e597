use std::{
    io::{Read, Write},
    process::Command,
    str::FromStr,
};

use tracing::trace;

use super::error::{AdbError, AdbResult};

/// `adb -s <serial> <command>`
///
/// Fails with [`AdbError::CommandFailed`] carrying the process stderr when `adb` exits non-zero.
pub fn execute_adb_command(serial: &str, command: &str) -> AdbResult<Vec<u8>> {
    let mut args = vec!["-s", serial];
    args.extend(command.split_whitespace());
    execute_adb(&args)
}

/// `adb <args...>`
pub fn execute_adb(args: &[&str]) -> AdbResult<Vec<u8>> {
    trace!("running adb {:?}...", args);
    let output = Command::new("adb").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(AdbError::CommandFailed(format!(
            "adb {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr
        )));
    }
    Ok(output.stdout)
}

// Streaming

pub fn read_exact<T: Read>(source: &mut T, len: usize) -> AdbResult<Vec<u8>> {
    let mut buf = vec![0; len];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_exact_to_string<T: Read>(source: &mut T, len: usize) -> AdbResult<String> {
    let bytes = read_exact(source, len)?;
    let s = std::str::from_utf8(&bytes)?;
    Ok(s.to_string())
}

pub fn read_to_end<T: Read>(source: &mut T) -> AdbResult<Vec<u8>> {
    let mut response = Vec::new();
    source.read_to_end(&mut response)?;
    Ok(response)
}

pub fn read_to_end_to_string<T: Read>(source: &mut T) -> AdbResult<String> {
    let bytes = read_to_end(source)?;
    let s = std::str::from_utf8(&bytes)?;
    Ok(s.to_string())
}

// Following are more utilized things

pub fn read_payload_len<T: Read>(source: &mut T) -> AdbResult<usize> {
    let len = read_exact_to_string(source, 4)?;
    let len = usize::from_str_radix(&len, 16)?;
    Ok(len)
}

pub fn read_payload<T: Read>(source: &mut T) -> AdbResult<Vec<u8>> {
    let len = read_payload_len(source)?;
    read_exact(source, len)
}

pub fn read_payload_to_string<T: Read>(source: &mut T) -> AdbResult<String> {
    let bytes = read_payload(source)?;
    let s = std::str::from_utf8(&bytes)?;
    Ok(s.to_string())
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseStatus {
    Okay,
    Fail,
}

impl FromStr for ResponseStatus {
    type Err = AdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OKAY" => Ok(Self::Okay),
            "FAIL" => Ok(Self::Fail),
            _ => Err(AdbError::UnknownResponseStatus(s.to_string())),
        }
    }
}

pub fn read_response_status<T: Read>(source: &mut T) -> AdbResult<ResponseStatus> {
    let status = read_exact_to_string(source, 4)?;
    ResponseStatus::from_str(&status)
}

/// Reads a status and, on `FAIL`, the reason payload that follows it.
pub fn check_response_status<T: Read>(source: &mut T) -> AdbResult<()> {
    if let ResponseStatus::Fail = read_response_status(source)? {
        let reason = read_payload_to_string(source)?;
        return Err(AdbError::ResponseError(reason));
    }
    Ok(())
}

/// Writes `request` prefixed with its length as four hex digits.
pub fn write_request<T: Write>(target: &mut T, request: &str) -> AdbResult<()> {
    target.write_all(format!("{:04x}{}", request.len(), request).as_bytes())?;
    Ok(())
}
