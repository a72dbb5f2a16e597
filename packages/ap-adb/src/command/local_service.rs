use std::io::Read;

use tracing::trace;

use crate::{
    error::AdbResult,
    utils::{check_response_status, read_to_end, read_to_end_to_string},
};

use super::AdbCommand;

/// shell:command
///
/// command is something like "cmd arg1 arg2 ..."
pub struct ShellCommand {
    command: String,
}

impl ShellCommand {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl AdbCommand for ShellCommand {
    type Output = String;

    fn raw_command(&self) -> String {
        format!("shell:{}", self.command)
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)?;
        read_to_end_to_string(stream)
    }
}

/// Png encoded screencap
///
/// `exec:screencap -p`, the `exec` service keeps the bytes untouched
/// where `shell` may translate line endings on old devices.
pub struct ScreenCapPng;

impl AdbCommand for ScreenCapPng {
    type Output = Vec<u8>;

    fn raw_command(&self) -> String {
        "exec:screencap -p".to_string()
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)?;
        read_to_end(stream)
    }
}

pub enum Input {
    /// shell:input tap x y
    Tap { x: u32, y: u32 },
    /// shell:input text <text>
    ///
    /// The text is escaped with [`escape_input_text`].
    Text(String),
}

impl AdbCommand for Input {
    type Output = ();

    fn raw_command(&self) -> String {
        match self {
            Input::Tap { x, y } => format!("shell:input tap {x} {y}"),
            Input::Text(text) => format!("shell:input text {}", escape_input_text(text)),
        }
    }

    fn handle_response(&self, stream: &mut impl Read) -> AdbResult<Self::Output> {
        check_response_status(stream)?;
        // Drain so the input has been injected when this returns
        let output = read_to_end_to_string(stream)?;
        if !output.trim().is_empty() {
            trace!("input output: {}", output.trim());
        }
        Ok(())
    }
}

/// Escapes `text` for `input text` run through the device shell.
///
/// Spaces become `%s`, which `input` turns back into spaces, and shell
/// metacharacters are backslash escaped. A literal `%s` in `text` cannot be
/// expressed and will arrive as a space.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '?' | '!' | '~' | '#' | '[' | ']' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
