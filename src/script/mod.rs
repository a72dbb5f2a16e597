//! The automation script: a line oriented list of instructions.
//!
//! ```text
//! click_image <path>
//! click_at <x> <y>
//! sleep <seconds>
//! write_text <token> [<token> ...]
//! read_text <x1> <y1> <x2> <y2>
//! if_image <path>
//!   <body instructions>
//! else
//!   <body instructions>
//! end_if
//! # comment line, ignored
//! ```
//!
//! A [`Script`] is parsed once with [`Script::parse`] and never mutated afterwards,
//! branch bodies are parsed together with their `if_image` line and may nest.

mod parser;

use std::{fmt::Display, time::Duration};

use ap_cv::Region;

use crate::error::ScriptError;

pub use parser::parse_file;

/// One parsed instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Tap the center of `path` if it is found on the screen
    ClickImage { path: String },
    /// Tap a literal coordinate
    ClickAt { x: u32, y: u32 },
    /// Suspend the run
    Sleep { duration: Duration },
    /// Enter literal text
    WriteText { text: String },
    /// Recognize and report the text inside `region`
    ReadText { region: Region },
    /// Run `then_block` if `path` is on the screen, `else_block` otherwise
    IfImage {
        path: String,
        then_block: Vec<Step>,
        else_block: Option<Vec<Step>>,
    },
}

impl Instruction {
    /// The keyword that starts this instruction's line.
    pub fn keyword(&self) -> &'static str {
        match self {
            Instruction::ClickImage { .. } => "click_image",
            Instruction::ClickAt { .. } => "click_at",
            Instruction::Sleep { .. } => "sleep",
            Instruction::WriteText { .. } => "write_text",
            Instruction::ReadText { .. } => "read_text",
            Instruction::IfImage { .. } => "if_image",
        }
    }
}

/// Formats the instruction's own line, branch bodies are not included.
impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keyword = self.keyword();
        match self {
            Instruction::ClickImage { path } | Instruction::IfImage { path, .. } => {
                write!(f, "{keyword} {path}")
            }
            Instruction::ClickAt { x, y } => write!(f, "{keyword} {x} {y}"),
            Instruction::Sleep { duration } => write!(f, "{keyword} {}", duration.as_secs_f64()),
            Instruction::WriteText { text } => write!(f, "{keyword} {text}"),
            Instruction::ReadText { region } => write!(
                f,
                "{keyword} {} {} {} {}",
                region.x1, region.y1, region.x2, region.y2
            ),
        }
    }
}

/// An instruction together with the source line it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-based line number
    pub line_no: usize,
    pub instruction: Instruction,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    errors: Vec<ScriptError>,
}

impl Script {
    /// Parse `source`.
    ///
    /// Parsing never fails as a whole: every line that cannot be parsed is recorded
    /// as a [`ScriptError::MalformedInstruction`] in [`Script::errors`] and left out.
    pub fn parse(source: &str) -> Self {
        parser::parse_str(source)
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            errors: vec![],
        }
    }

    /// The top level steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The top level instructions, without line numbers.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.steps.iter().map(|step| &step.instruction)
    }

    /// Lines that were skipped while parsing, in line order.
    pub fn errors(&self) -> &[ScriptError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

fn write_block(
    f: &mut std::fmt::Formatter<'_>,
    steps: &[Step],
    depth: usize,
) -> std::fmt::Result {
    let indent = "  ".repeat(depth);
    for step in steps {
        writeln!(f, "{indent}{}", step.instruction)?;
        if let Instruction::IfImage {
            then_block,
            else_block,
            ..
        } = &step.instruction
        {
            write_block(f, then_block, depth + 1)?;
            if let Some(else_block) = else_block {
                writeln!(f, "{indent}else")?;
                write_block(f, else_block, depth + 1)?;
            }
            writeln!(f, "{indent}end_if")?;
        }
    }
    Ok(())
}

/// Serializes back to the source format, one instruction per line.
impl Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_block(f, &self.steps, 0)
    }
}
