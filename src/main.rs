use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, bail};
use auto_script::{
    AndroidController, AutoPlay, Config, Controller, RunState, config::Backend, script::parse_file,
};
use clap::{Args, Parser, Subcommand};
use color_print::cprintln;
use tokio::sync::watch;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

/// Read when `--config` is not given and the file exists
const DEFAULT_CONFIG: &str = "auto-script.toml";

#[derive(Parser, Debug)]
#[command(
    name = "auto-script",
    about = "Run screen automation scripts against an Android device or the desktop",
    version
)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Command,
}

/// Device selection, overrides `[device]` of the config.
#[derive(Args, Debug)]
struct Target {
    /// adb serial of the device, `host:port` serials are `adb connect`ed first
    #[arg(short, long, global = true, conflicts_with_all = ["emulator", "desktop"])]
    serial: Option<String>,

    /// Index of the local emulator to use, 0 is `emulator-5554`
    #[arg(short, long, global = true, conflicts_with = "desktop")]
    emulator: Option<u32>,

    /// Drive the local display instead of an adb device
    #[arg(long, global = true)]
    desktop: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script
    Run {
        /// Path to the script file
        script: PathBuf,

        /// Directory template paths are relative to
        #[arg(short, long)]
        templates_dir: Option<PathBuf>,

        /// Template match threshold in (0, 1]
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Save a region of the screen as a template
    Capture {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        /// Template name, saved as `<templates_dir>/<name>.png`
        name: String,
    },
    /// Save a full screenshot
    Screenshot {
        #[arg(default_value = "screenshot.png")]
        out: PathBuf,
    },
    /// List the devices attached to the adb server
    Devices,
}

impl Target {
    fn apply(&self, config: &mut Config) {
        if let Some(serial) = &self.serial {
            config.device.backend = Backend::Adb;
            config.device.serial = Some(serial.clone());
        } else if let Some(index) = self.emulator {
            config.device.backend = Backend::Adb;
            config.device.serial = Some(auto_script::adb::emulator_serial(index));
        } else if self.desktop {
            config.device.backend = Backend::Desktop;
        }
    }
}

fn init_tracing_subscriber() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG).is_file() => Config::load(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn connect(config: &Config) -> anyhow::Result<Box<dyn Controller>> {
    match config.device.backend {
        Backend::Adb => {
            let serial = config
                .device
                .serial
                .clone()
                .unwrap_or_else(|| auto_script::adb::emulator_serial(0));
            Ok(Box::new(AndroidController::connect(&serial)?))
        }
        #[cfg(feature = "desktop")]
        Backend::Desktop => Ok(Box::new(auto_script::DesktopController::primary()?)),
        #[cfg(not(feature = "desktop"))]
        Backend::Desktop => bail!("desktop backend requires building with `--features desktop`"),
    }
}

/// Sanitize a template name into a png file name.
fn template_file_name(name: &str) -> anyhow::Result<String> {
    let mut file_name: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if file_name.trim_matches(|c| c == '.' || c == '_').is_empty() {
        bail!("invalid template name {name:?}");
    }
    if !file_name.to_ascii_lowercase().ends_with(".png") {
        file_name.push_str(".png");
    }
    Ok(file_name)
}

async fn run(
    config: Config,
    script_path: &Path,
    templates_dir: Option<PathBuf>,
    threshold: Option<f32>,
) -> anyhow::Result<ExitCode> {
    let mut config = config;
    if let Some(templates_dir) = templates_dir {
        config.templates_dir = templates_dir;
    }
    if let Some(threshold) = threshold {
        config.threshold = threshold;
    }
    config.validate()?;

    let script = parse_file(script_path)?;
    let recognizer = config.tesseract();
    let auto_play = AutoPlay::with_config(connect(&config)?, config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current instruction");
            let _ = cancel_tx.send(true);
        }
    });

    let report = auto_play
        .interpreter(&recognizer)
        .with_cancel(cancel_rx)
        .run(&script)
        .await;

    let (executed, skipped) = (report.steps.len(), report.skipped());
    match &report.state {
        RunState::Done => {
            cprintln!(
                "<green,bold>done</>: {} instruction(s), {} skipped",
                executed,
                skipped
            );
            Ok(ExitCode::SUCCESS)
        }
        RunState::Cancelled => {
            cprintln!(
                "<yellow,bold>cancelled</>: {} instruction(s), {} skipped",
                executed,
                skipped
            );
            Ok(ExitCode::from(130))
        }
        RunState::Failed(err) => {
            cprintln!("<red,bold>failed</>: {}", err);
            Ok(ExitCode::FAILURE)
        }
        state => bail!("run stopped in a non-terminal state: {state}"),
    }
}

fn capture(config: Config, region: (u32, u32, u32, u32), name: &str) -> anyhow::Result<()> {
    let file_name = template_file_name(name)?;
    let auto_play = AutoPlay::with_config(connect(&config)?, config);
    let (x, y, width, height) = region;
    let template = auto_play.capture_region(x, y, width, height)?;

    let templates_dir = &auto_play.config().templates_dir;
    std::fs::create_dir_all(templates_dir)
        .with_context(|| format!("failed to create {}", templates_dir.display()))?;
    let path = templates_dir.join(file_name);
    template
        .save(&path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    cprintln!("<green>saved</> {}", path.display());
    Ok(())
}

fn screenshot(config: Config, out: &Path) -> anyhow::Result<()> {
    let auto_play = AutoPlay::with_config(connect(&config)?, config);
    let screen = auto_play.screencap()?;
    screen
        .save(out)
        .with_context(|| format!("failed to save {}", out.display()))?;
    let (width, height) = auto_play.screen_size();
    cprintln!("<green>saved</> {} ({}x{})", out.display(), width, height);
    Ok(())
}

fn devices() -> anyhow::Result<()> {
    let devices = auto_script::adb::devices().context("failed to list adb devices")?;
    if devices.is_empty() {
        info!("no devices attached");
    }
    for device in devices {
        cprintln!(
            "<bold>{}</>\t{}\t{:?}",
            device.serial,
            device.state,
            device.info
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing_subscriber();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.target.apply(&mut config);

    match cli.command {
        Command::Run {
            script,
            templates_dir,
            threshold,
        } => run(config, &script, templates_dir, threshold).await,
        Command::Capture {
            x,
            y,
            width,
            height,
            name,
        } => capture(config, (x, y, width, height), &name).map(|_| ExitCode::SUCCESS),
        Command::Screenshot { out } => screenshot(config, &out).map(|_| ExitCode::SUCCESS),
        Command::Devices => devices().map(|_| ExitCode::SUCCESS),
    }
}
