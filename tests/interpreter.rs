use std::{
    io,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use auto_script::{
    Controller, Interpreter, RunState, Script, ScriptError, StepOutcome,
    cv::ocr::{OcrError, TextRecognizer},
    interpreter::BranchArm,
};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use tempfile::TempDir;
use tokio::{sync::watch, time::Instant};
use tracing_subscriber::fmt::MakeWriter;

/// Where `button.png` is cut out of the screen
const BUTTON_AT: (u32, u32) = (20, 10);
const BUTTON_SIZE: (u32, u32) = (12, 8);
/// Center of `button.png` on the screen
const BUTTON_CENTER: (u32, u32) = (26, 14);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Capture,
    Tap(u32, u32),
    Type(String),
}

/// Records every device call with the (virtual) time it was made.
struct MockDevice {
    screen: DynamicImage,
    fail_capture: bool,
    fail_input: bool,
    events: Mutex<Vec<(Instant, Event)>>,
}

impl MockDevice {
    fn new() -> Self {
        Self {
            screen: textured(64, 48, 7),
            fail_capture: false,
            fail_input: false,
            events: Mutex::new(vec![]),
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }

    fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Taps and typed text, captures left out.
    fn inputs(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| *event != Event::Capture)
            .collect()
    }

    fn timed_inputs(&self) -> Vec<(Instant, Event)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| *event != Event::Capture)
            .cloned()
            .collect()
    }
}

impl Controller for MockDevice {
    fn screen_size(&self) -> (u32, u32) {
        self.screen.dimensions()
    }

    fn screencap(&self) -> anyhow::Result<DynamicImage> {
        if self.fail_capture {
            anyhow::bail!("device 'emulator-5554' not found");
        }
        self.record(Event::Capture);
        Ok(self.screen.clone())
    }

    fn click(&self, x: u32, y: u32) -> anyhow::Result<()> {
        if self.fail_input {
            anyhow::bail!("device offline");
        }
        self.record(Event::Tap(x, y));
        Ok(())
    }

    fn input_text(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_input {
            anyhow::bail!("device offline");
        }
        self.record(Event::Type(text.to_string()));
        Ok(())
    }
}

/// Answers every crop with the same text and remembers the crop sizes.
struct StubOcr {
    text: &'static str,
    crops: Mutex<Vec<(u32, u32)>>,
}

impl StubOcr {
    fn new(text: &'static str) -> Self {
        Self {
            text,
            crops: Mutex::new(vec![]),
        }
    }
}

impl TextRecognizer for StubOcr {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        self.crops.lock().unwrap().push(image.dimensions());
        Ok(self.text.to_string())
    }
}

fn textured(width: u32, height: u32, seed: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x.wrapping_mul(131) ^ y.wrapping_mul(71) ^ seed).wrapping_mul(2246822519) >> 24)
            as u8;
        Rgba([v, v.rotate_left(3), 255 - v, 255])
    }))
}

/// `button.png` is on the mock screen, `absent.png` is not.
fn templates(device: &MockDevice) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = BUTTON_AT;
    let (w, h) = BUTTON_SIZE;
    save(&device.screen.crop_imm(x, y, w, h), dir.path(), "button.png");
    save(&textured(w, h, 12345), dir.path(), "absent.png");
    dir
}

fn save(image: &DynamicImage, dir: &Path, name: &str) {
    image.save(dir.join(name)).unwrap();
}

#[tokio::test]
async fn test_click_image_taps_center() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse("click_image button.png\n");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(
        device.events(),
        vec![Event::Capture, Event::Tap(BUTTON_CENTER.0, BUTTON_CENTER.1)]
    );
}

#[tokio::test]
async fn test_click_image_not_found_continues() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse("click_image absent.png\nclick_at 5 5\n");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.steps[0].outcome, StepOutcome::NotFound);
    assert_eq!(device.inputs(), vec![Event::Tap(5, 5)]);
}

#[tokio::test]
async fn test_if_image_selects_one_body() {
    let cases = [
        ("button.png", true, vec![Event::Tap(10, 20)]),
        ("absent.png", true, vec![Event::Tap(30, 40)]),
        ("absent.png", false, vec![]),
    ];
    for (template, with_else, expected) in cases {
        let device = MockDevice::new();
        let dir = templates(&device);
        let ocr = StubOcr::new("");

        let source = if with_else {
            format!("if_image {template}\n  click_at 10 20\nelse\n  click_at 30 40\nend_if\n")
        } else {
            format!("if_image {template}\n  click_at 10 20\nend_if\n")
        };
        let report = Interpreter::new(&device, &ocr)
            .with_templates_dir(dir.path())
            .run(&Script::parse(&source))
            .await;

        assert_eq!(report.state, RunState::Done, "{source}");
        assert_eq!(device.inputs(), expected, "{source}");
    }
}

#[tokio::test]
async fn test_branch_outcomes_are_reported() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse(
        "if_image absent.png\nclick_at 10 20\nelse\nclick_at 30 40\nend_if\nif_image absent.png\nclick_at 1 1\nend_if\n",
    );
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    let outcomes: Vec<_> = report
        .outcomes()
        .map(|(line, outcome)| (line, outcome.clone()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (
                1,
                StepOutcome::Branch {
                    condition: false,
                    taken: Some(BranchArm::Else)
                }
            ),
            (4, StepOutcome::Executed),
            (
                6,
                StepOutcome::Branch {
                    condition: false,
                    taken: None
                }
            ),
        ]
    );
}

#[tokio::test]
async fn test_nested_if_image() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("  Level 3\n");

    let script = Script::parse(
        "if_image button.png\n\
         \x20 if_image absent.png\n\
         \x20   click_at 1 1\n\
         \x20 else\n\
         \x20   click_at 2 2\n\
         \x20 end_if\n\
         \x20 read_text 0 0 16 8\n\
         else\n\
         \x20 click_at 3 3\n\
         end_if\n\
         click_at 4 4\n",
    );
    assert!(script.errors().is_empty());
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(device.inputs(), vec![Event::Tap(2, 2), Event::Tap(4, 4)]);
    assert!(
        report
            .steps
            .iter()
            .any(|step| step.line_no == 7 && step.outcome == StepOutcome::TextRead("Level 3".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_sleep_suspends_run() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");

    let start = Instant::now();
    let script = Script::parse("click_at 1 1\nsleep 0.5\nclick_at 2 2\n");
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    let inputs = device.timed_inputs();
    assert_eq!(inputs.len(), 2);
    assert!(inputs[1].0 - inputs[0].0 >= Duration::from_millis(500));
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_missing_template_does_not_abort() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse("click_image missing.png\nclick_at 5 5\n");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    assert_eq!(report.state, RunState::Done);
    assert!(matches!(
        &report.steps[0].outcome,
        StepOutcome::Skipped(ScriptError::TemplateNotFound { path, .. }) if path.ends_with("missing.png")
    ));
    // the template is loaded before the screen is captured
    assert_eq!(device.events(), vec![Event::Tap(5, 5)]);
    assert_eq!(report.skipped(), 1);
}

#[tokio::test]
async fn test_missing_if_image_template_skips_both_bodies() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");

    let script = Script::parse(
        "if_image missing.png\nclick_at 10 20\nelse\nclick_at 30 40\nend_if\nclick_at 5 5\n",
    );
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(device.inputs(), vec![Event::Tap(5, 5)]);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_event_order() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");

    let script = Script::parse("click_at 1 1\nsleep 0.1\nwrite_text hello world\n");
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    let inputs = device.timed_inputs();
    assert_eq!(
        inputs.iter().map(|(_, e)| e.clone()).collect::<Vec<_>>(),
        vec![Event::Tap(1, 1), Event::Type("hello world".to_string())]
    );
    assert!(inputs[1].0 - inputs[0].0 >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_capture_failure_fails_run() {
    let mut device = MockDevice::new();
    device.fail_capture = true;
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse("click_at 1 1\nclick_image button.png\nclick_at 2 2\n");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    match &report.state {
        RunState::Failed(ScriptError::DeviceUnavailable(reason)) => {
            assert!(reason.contains("not found"), "{reason}")
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(device.inputs(), vec![Event::Tap(1, 1)]);
    assert!(matches!(
        report.steps.last().map(|step| &step.outcome),
        Some(StepOutcome::Failed(_))
    ));
}

#[tokio::test]
async fn test_input_failure_fails_run() {
    let mut device = MockDevice::new();
    device.fail_input = true;
    let ocr = StubOcr::new("");

    let report = Interpreter::new(&device, &ocr)
        .run(&Script::parse("write_text hi\nclick_at 2 2\n"))
        .await;

    assert!(matches!(
        report.state,
        RunState::Failed(ScriptError::DeviceUnavailable(_))
    ));
    assert_eq!(report.steps.len(), 1);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");

    let script = Script::parse("click_at 1\nclick_at 3 3\nbogus line\nsleep soon\nclick_at 4 4\n");
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(device.inputs(), vec![Event::Tap(3, 3), Event::Tap(4, 4)]);
    let lines: Vec<_> = report
        .diagnostics
        .iter()
        .filter_map(ScriptError::line_no)
        .collect();
    assert_eq!(lines, vec![1, 3, 4]);
    assert_eq!(report.skipped(), 3);
}

#[tokio::test]
async fn test_read_text() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("  Score: 42 \n");

    let script = Script::parse("read_text 4 6 24 16\n");
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(
        report.steps[0].outcome,
        StepOutcome::TextRead("Score: 42".to_string())
    );
    assert_eq!(*ocr.crops.lock().unwrap(), vec![(20, 10)]);
}

#[tokio::test]
async fn test_invalid_region_is_reported() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("text");

    let script = Script::parse("read_text 10 10 5 5\nread_text 0 0 65 10\nread_text -1 0 5 5\nclick_at 1 1\n");
    let report = Interpreter::new(&device, &ocr).run(&script).await;

    assert_eq!(report.state, RunState::Done);
    for step in &report.steps[..3] {
        assert!(
            matches!(
                step.outcome,
                StepOutcome::Skipped(ScriptError::InvalidRegion {
                    width: 64,
                    height: 48,
                    ..
                })
            ),
            "{step:?}"
        );
    }
    assert!(ocr.crops.lock().unwrap().is_empty());
    assert_eq!(device.inputs(), vec![Event::Tap(1, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_sleeping() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let start = Instant::now();
    let script = Script::parse("click_at 1 1\nsleep 10\nclick_at 2 2\n");
    let interpreter = Interpreter::new(&device, &ocr).with_cancel(cancel_rx);
    let (report, _) = tokio::join!(interpreter.run(&script), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel_tx.send(true).unwrap();
    });

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(device.inputs(), vec![Event::Tap(1, 1)]);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();

    let report = Interpreter::new(&device, &ocr)
        .with_cancel(cancel_rx)
        .run(&Script::parse("click_at 1 1\n"))
        .await;

    assert_eq!(report.state, RunState::Cancelled);
    assert!(report.steps.is_empty());
    assert!(device.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_cancel_sender_does_not_cut_sleep() {
    let device = MockDevice::new();
    let ocr = StubOcr::new("");
    let (cancel_tx, cancel_rx) = watch::channel(false);
    drop(cancel_tx);

    let start = Instant::now();
    let report = Interpreter::new(&device, &ocr)
        .with_cancel(cancel_rx)
        .run(&Script::parse("sleep 2\nclick_at 1 1\n"))
        .await;

    assert_eq!(report.state, RunState::Done);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(device.inputs(), vec![Event::Tap(1, 1)]);
}

/// Collects formatted log lines for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_not_found_log_names_instruction() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&Script::parse("click_at 1 1\nclick_image absent.png\n"))
        .await;

    assert_eq!(report.steps[1].outcome, StepOutcome::NotFound);
    let logs = logs.contents();
    assert!(
        logs.lines()
            .any(|line| line.contains("line 2: click_image absent.png not found")),
        "{logs}"
    );
}

#[tokio::test]
async fn test_unterminated_if_image_still_runs_following_lines() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let script = Script::parse("click_at 1 1\nif_image button.png\nclick_at 2 2\nclick_at 3 3\nclick_at 4 4\n");
    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&script)
        .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].line_no(), Some(2));
    assert_eq!(
        device.inputs(),
        vec![
            Event::Tap(1, 1),
            Event::Tap(2, 2),
            Event::Tap(3, 3),
            Event::Tap(4, 4)
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_matching_on_multi_thread_runtime() {
    let device = MockDevice::new();
    let dir = templates(&device);
    let ocr = StubOcr::new("");

    let report = Interpreter::new(&device, &ocr)
        .with_templates_dir(dir.path())
        .run(&Script::parse("if_image button.png\nclick_image button.png\nend_if\n"))
        .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(
        device.inputs(),
        vec![Event::Tap(BUTTON_CENTER.0, BUTTON_CENTER.1)]
    );
}
