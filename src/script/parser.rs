//! Line oriented parser with a depth counter for `if_image` blocks.

use std::{path::Path, time::Duration};

use anyhow::Context;
use ap_cv::Region;
use tracing::debug;

use super::{Instruction, Script, Step};
use crate::error::ScriptError;

const COMMENT_MARKER: char = '#';
const ELSE: &str = "else";
const END_IF: &str = "end_if";

/// Read and parse the script at `path`.
pub fn parse_file(path: impl AsRef<Path>) -> anyhow::Result<Script> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    Ok(parse_str(&source))
}

pub(super) fn parse_str(source: &str) -> Script {
    let lines = source
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .collect();
    let mut parser = Parser {
        lines,
        pos: 0,
        errors: vec![],
    };
    let steps = parser.parse_top_level();
    // an unclosed if_image is only reported after its body
    parser.errors.sort_by_key(ScriptError::line_no);
    debug!(
        "[Script]: parsed {} step(s), {} malformed line(s)",
        steps.len(),
        parser.errors.len()
    );
    Script {
        steps,
        errors: parser.errors,
    }
}

/// How a block body ended.
enum BlockEnd {
    /// `else` at the given line
    Else(usize),
    EndIf,
    Eof,
}

struct Parser<'a> {
    /// Non-empty, non-comment lines with their 1-based numbers
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    errors: Vec<ScriptError>,
}

impl<'a> Parser<'a> {
    fn malformed(&mut self, line_no: usize, line: &str, reason: impl Into<String>) {
        self.errors.push(ScriptError::MalformedInstruction {
            line_no,
            line: line.to_string(),
            reason: reason.into(),
        });
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos).copied();
        self.pos += 1;
        line
    }

    fn parse_top_level(&mut self) -> Vec<Step> {
        // stray markers are reported at depth 0, so only Eof ends the top level
        let (steps, _) = self.parse_block(0, false);
        steps
    }

    /// Collect steps until a marker of this depth.
    ///
    /// Markers that cannot close anything here are reported and skipped.
    fn parse_block(&mut self, depth: usize, allow_else: bool) -> (Vec<Step>, BlockEnd) {
        let mut steps = vec![];
        while let Some((line_no, line)) = self.next_line() {
            match line {
                ELSE if allow_else => return (steps, BlockEnd::Else(line_no)),
                ELSE if depth == 0 => self.malformed(line_no, line, "else without if_image"),
                ELSE => self.malformed(line_no, line, "duplicate else in if_image"),
                END_IF if depth > 0 => return (steps, BlockEnd::EndIf),
                END_IF => self.malformed(line_no, line, "end_if without if_image"),
                _ => {
                    let (keyword, rest) = split_keyword(line);
                    if keyword == "if_image" {
                        steps.extend(self.parse_if_image(line_no, line, rest, depth));
                        continue;
                    }
                    match parse_instruction(keyword, rest) {
                        Ok(instruction) => steps.push(Step {
                            line_no,
                            instruction,
                        }),
                        Err(reason) => self.malformed(line_no, line, reason),
                    }
                }
            }
        }
        (steps, BlockEnd::Eof)
    }

    /// Parse the bodies following an `if_image` line.
    ///
    /// A conditional without a template path is dropped with its bodies. One that is
    /// never closed only loses its `if_image` and `else` lines, the bodies are
    /// returned to the enclosing block in source order.
    fn parse_if_image(
        &mut self,
        line_no: usize,
        line: &str,
        path: &str,
        depth: usize,
    ) -> Vec<Step> {
        let (mut then_block, end) = self.parse_block(depth + 1, true);
        let (else_block, else_line_no, end) = match end {
            BlockEnd::Else(else_line_no) => {
                let (else_block, end) = self.parse_block(depth + 1, false);
                (Some(else_block), Some(else_line_no), end)
            }
            end => (None, None, end),
        };

        if let BlockEnd::Eof = end {
            self.malformed(line_no, line, "if_image without end_if");
            if let Some(else_line_no) = else_line_no {
                self.malformed(else_line_no, ELSE, "else of an if_image without end_if");
            }
            then_block.extend(else_block.into_iter().flatten());
            return then_block;
        }
        if path.is_empty() {
            self.malformed(line_no, line, "missing template path");
            return vec![];
        }
        vec![Step {
            line_no,
            instruction: Instruction::IfImage {
                path: path.to_string(),
                then_block,
                else_block,
            },
        }]
    }
}

/// Split off the first whitespace separated token, the rest is trimmed.
fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    }
}

fn parse_instruction(keyword: &str, rest: &str) -> Result<Instruction, String> {
    match keyword {
        "click_image" => {
            if rest.is_empty() {
                return Err("missing template path".to_string());
            }
            Ok(Instruction::ClickImage {
                path: rest.to_string(),
            })
        }
        "click_at" => {
            let [x, y] = parse_numbers::<u32, 2>(rest, "x y")?;
            Ok(Instruction::ClickAt { x, y })
        }
        "sleep" => {
            let [seconds] = parse_numbers::<f64, 1>(rest, "seconds")?;
            let duration = Duration::try_from_secs_f64(seconds)
                .map_err(|_| format!("invalid duration {seconds}"))?;
            Ok(Instruction::Sleep { duration })
        }
        "write_text" => {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.is_empty() {
                return Err("missing text".to_string());
            }
            Ok(Instruction::WriteText {
                text: tokens.join(" "),
            })
        }
        "read_text" => {
            let [x1, y1, x2, y2] = parse_numbers::<i32, 4>(rest, "x1 y1 x2 y2")?;
            Ok(Instruction::ReadText {
                region: Region::new(x1, y1, x2, y2),
            })
        }
        unknown => Err(format!("unknown instruction {unknown:?}")),
    }
}

/// Parse exactly `N` whitespace separated numbers.
fn parse_numbers<T: std::str::FromStr, const N: usize>(
    rest: &str,
    expected: &str,
) -> Result<[T; N], String> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() != N {
        return Err(format!(
            "expected {N} argument(s) `{expected}`, got {}",
            tokens.len()
        ));
    }
    let mut values = Vec::with_capacity(N);
    for token in tokens {
        values.push(
            token
                .parse::<T>()
                .map_err(|_| format!("invalid number {token:?}"))?,
        );
    }
    values
        .try_into()
        .map_err(|_| "argument count mismatch".to_string())
}
