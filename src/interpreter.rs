//! Runs a parsed [`Script`] against a [`Controller`].
//!
//! One run is a single cooperative task: instructions are dispatched strictly in
//! script order, the only suspension points are `sleep` and the blocking device
//! and OCR calls. Cancellation is observed before every instruction and while sleeping.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use ap_controller::Controller;
use ap_cv::{
    matcher::{MatcherOptions, SingleMatcher},
    ocr::{self, TextRecognizer},
};
use color_print::cprintln;
use image::DynamicImage;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::ScriptError,
    script::{Instruction, Script, Step},
};

/// States of a run. A finished run is always in one of the terminal states.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// About to dispatch the instruction at `pc` of the current sequence
    Ready { pc: usize },
    /// The condition of the `if_image` at `line_no` was evaluated
    Branching { line_no: usize, condition: bool },
    Done,
    Failed(ScriptError),
    /// Stopped by the caller between instructions
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Done | RunState::Failed(_) | RunState::Cancelled
        )
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Ready { pc } => write!(f, "ready at {pc}"),
            RunState::Branching { line_no, condition } => {
                write!(f, "branching at line {line_no} ({condition})")
            }
            RunState::Done => write!(f, "done"),
            RunState::Failed(err) => write!(f, "failed: {err}"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which body of an `if_image` was run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchArm {
    Then,
    Else,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Executed,
    /// `click_image` found nothing above the threshold
    NotFound,
    /// Trimmed text read by `read_text`
    TextRead(String),
    /// `if_image` evaluated `condition`, `taken` is `None` when there was nothing to run
    Branch {
        condition: bool,
        taken: Option<BranchArm>,
    },
    /// A recoverable error, the run went on with the next instruction
    Skipped(ScriptError),
    /// A fatal error that ended the run
    Failed(ScriptError),
}

/// One dispatched instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub line_no: usize,
    /// The instruction line, as serialized
    pub instruction: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    /// Lines skipped while parsing
    pub diagnostics: Vec<ScriptError>,
    /// Dispatched instructions, in execution order
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    /// Outcomes in execution order, paired with their line numbers.
    pub fn outcomes(&self) -> impl Iterator<Item = (usize, &StepOutcome)> {
        self.steps.iter().map(|step| (step.line_no, &step.outcome))
    }

    /// Number of instructions that were skipped, parse diagnostics included.
    pub fn skipped(&self) -> usize {
        self.diagnostics.len()
            + self
                .steps
                .iter()
                .filter(|step| matches!(step.outcome, StepOutcome::Skipped(_)))
                .count()
    }
}

/// Why a run stopped before the end of the script.
enum Halt {
    Cancelled,
    Failed(ScriptError),
}

/// Bookkeeping of one run.
struct Run<'s> {
    diagnostics: std::iter::Peekable<std::slice::Iter<'s, ScriptError>>,
    steps: Vec<StepReport>,
}

impl<'s> Run<'s> {
    fn new(script: &'s Script) -> Self {
        Self {
            diagnostics: script.errors().iter().peekable(),
            steps: vec![],
        }
    }

    /// Report the parse diagnostics up to `line_no`, so they show up where the line would have run.
    fn flush_diagnostics(&mut self, line_no: usize) {
        while let Some(err) = self
            .diagnostics
            .next_if(|err| err.line_no().is_none_or(|l| l <= line_no))
        {
            warn!("[Interpreter]: skipped {err}");
        }
    }

    fn push(&mut self, step: &Step, outcome: StepOutcome) {
        self.steps.push(StepReport {
            line_no: step.line_no,
            instruction: step.instruction.to_string(),
            outcome,
        });
    }
}

/// Executes scripts on one controller.
///
/// The interpreter only borrows its collaborators, a device must not be shared by
/// two running scripts at the same time.
pub struct Interpreter<'a, C: Controller + ?Sized, R: TextRecognizer + ?Sized> {
    controller: &'a C,
    recognizer: &'a R,
    templates_dir: PathBuf,
    options: MatcherOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, C: Controller + ?Sized, R: TextRecognizer + ?Sized> Interpreter<'a, C, R> {
    pub fn new(controller: &'a C, recognizer: &'a R) -> Self {
        Self {
            controller,
            recognizer,
            templates_dir: PathBuf::new(),
            options: MatcherOptions::default(),
            cancel: None,
        }
    }

    /// Directory template paths are resolved against, the working directory by default.
    pub fn with_templates_dir(mut self, templates_dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = templates_dir.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.options = self.options.with_threshold(threshold);
        self
    }

    pub fn with_matcher_options(mut self, options: MatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop the run once `true` is sent on the channel.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    pub async fn run(&self, script: &Script) -> RunReport {
        info!(
            "[Interpreter]: running {} instruction(s), {} malformed line(s)",
            script.len(),
            script.errors().len()
        );
        let mut run = Run::new(script);
        let state = match self.run_block(script.steps(), &mut run).await {
            Ok(()) => {
                run.flush_diagnostics(usize::MAX);
                RunState::Done
            }
            Err(Halt::Cancelled) => RunState::Cancelled,
            Err(Halt::Failed(err)) => RunState::Failed(err),
        };
        info!("[Interpreter]: {state}");
        RunReport {
            state,
            diagnostics: script.errors().to_vec(),
            steps: run.steps,
        }
    }

    async fn run_block(&self, steps: &[Step], run: &mut Run<'_>) -> Result<(), Halt> {
        for (pc, step) in steps.iter().enumerate() {
            run.flush_diagnostics(step.line_no);
            if self.is_cancelled() {
                info!("[Interpreter]: cancelled before line {}", step.line_no);
                return Err(Halt::Cancelled);
            }
            trace!("[Interpreter]: {}", RunState::Ready { pc });
            self.run_step(step, run).await?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step, run: &mut Run<'_>) -> Result<(), Halt> {
        info!("[Interpreter]: line {}: {}", step.line_no, step.instruction);

        let result = match &step.instruction {
            Instruction::IfImage {
                path,
                then_block,
                else_block,
            } => match self.image_present(path).await {
                Ok(condition) => {
                    trace!(
                        "[Interpreter]: {}",
                        RunState::Branching {
                            line_no: step.line_no,
                            condition
                        }
                    );
                    let (taken, body) = match (condition, else_block) {
                        (true, _) => (Some(BranchArm::Then), Some(then_block)),
                        (false, Some(else_block)) => (Some(BranchArm::Else), Some(else_block)),
                        (false, None) => (None, None),
                    };
                    run.push(step, StepOutcome::Branch { condition, taken });
                    if let Some(body) = body {
                        Box::pin(self.run_block(body, run)).await?;
                    }
                    return Ok(());
                }
                Err(err) => Err(err),
            },
            Instruction::Sleep { duration } => {
                self.sleep(*duration).await?;
                Ok(StepOutcome::Executed)
            }
            Instruction::ClickImage { path } => self.click_image(path).await,
            Instruction::ClickAt { x, y } => self.click(*x, *y).map(|_| StepOutcome::Executed),
            Instruction::WriteText { text } => self
                .controller
                .input_text(text)
                .map(|_| StepOutcome::Executed)
                .map_err(device_unavailable),
            Instruction::ReadText { region } => self.read_text(step.line_no, *region),
        };

        match result {
            Ok(outcome) => {
                if outcome == StepOutcome::NotFound {
                    info!(
                        "[Interpreter]: line {}: {} not found on screen",
                        step.line_no, step.instruction
                    );
                }
                run.push(step, outcome);
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(
                    "[Interpreter]: line {}: {} failed: {err}",
                    step.line_no, step.instruction
                );
                run.push(step, StepOutcome::Failed(err.clone()));
                Err(Halt::Failed(err))
            }
            Err(err) => {
                warn!(
                    "[Interpreter]: line {}: {} skipped: {err}",
                    step.line_no, step.instruction
                );
                run.push(step, StepOutcome::Skipped(err));
                Ok(())
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    /// Sleep for `duration` unless cancelled first.
    async fn sleep(&self, duration: Duration) -> Result<(), Halt> {
        let Some(cancel) = &self.cancel else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };
        let mut cancel = cancel.clone();
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            res = cancel.wait_for(|cancelled| *cancelled) => {
                if res.is_ok() {
                    info!("[Interpreter]: cancelled while sleeping");
                    return Err(Halt::Cancelled);
                }
            }
        }
        // Sender gone, nobody can cancel any more
        sleep.await;
        Ok(())
    }

    fn screencap(&self) -> Result<DynamicImage, ScriptError> {
        self.controller.screencap().map_err(device_unavailable)
    }

    fn click(&self, x: u32, y: u32) -> Result<(), ScriptError> {
        self.controller.click(x, y).map_err(device_unavailable)
    }

    fn load_template(&self, path: &str) -> Result<DynamicImage, ScriptError> {
        let path = self.templates_dir.join(path);
        image::open(&path).map_err(|err| ScriptError::TemplateNotFound {
            reason: err.to_string(),
            path,
        })
    }

    /// Locate the template on a fresh capture.
    ///
    /// The template is loaded before the capture, so a missing file never touches the device.
    /// Matching runs on the blocking pool and keeps the runtime free meanwhile.
    async fn locate(&self, path: &str) -> Result<Option<(u32, u32)>, ScriptError> {
        let template = self.load_template(path)?;
        let screen = self.screencap()?;
        let options = self.options;
        let center = tokio::task::spawn_blocking(move || {
            SingleMatcher::locate(&screen, &template, &options)
        })
        .await
        .unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()));
        debug!("[Interpreter]: {path} located at {center:?}");
        Ok(center)
    }

    async fn image_present(&self, path: &str) -> Result<bool, ScriptError> {
        self.locate(path).await.map(|center| center.is_some())
    }

    async fn click_image(&self, path: &str) -> Result<StepOutcome, ScriptError> {
        match self.locate(path).await? {
            Some((x, y)) => {
                self.click(x, y)?;
                Ok(StepOutcome::Executed)
            }
            None => Ok(StepOutcome::NotFound),
        }
    }

    fn read_text(&self, line_no: usize, region: ap_cv::Region) -> Result<StepOutcome, ScriptError> {
        let screen = self.screencap()?;
        let text = ocr::read_text(self.recognizer, &screen, region)?;
        let text = text.trim().to_string();
        cprintln!("<cyan>[line {}]</> <bold>{}</>", line_no, text);
        Ok(StepOutcome::TextRead(text))
    }
}

fn device_unavailable(err: anyhow::Error) -> ScriptError {
    ScriptError::DeviceUnavailable(format!("{err:#}"))
}
