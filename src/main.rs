use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kaivm::agent::{AgentLoop, AgentPaths};
use kaivm::capture::{CaptureLoop, LatestSnapshot, LiveStreamer};
use kaivm::config::{self, AppConfig, ConfigStore};
use kaivm::hid::{AbsoluteMouse, HidEndpoint, KeyboardMapper, RelativeMouse};
use kaivm::otg::GadgetControl;

/// Log level for the application.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// kaiVM command line entry point. Two independent subcommands mirror the
/// two OS processes in the concurrency model (spec.md §5): `capture` owns
/// the video pipeline, `agent` drives one HID-executing planning run
/// against whatever `capture` is currently publishing.
#[derive(Parser, Debug)]
#[command(name = "kaivm")]
#[command(version, about = "Hardware-in-the-loop computer-use agent", long_about = None)]
struct CliArgs {
    /// Config directory (default: /etc/kaivm).
    #[arg(short = 'c', long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MJPEG capture pipeline (C1-C4) until interrupted.
    Capture,
    /// Run one agent loop (C5-C12) to completion against the instruction.
    Agent {
        /// Natural-language instruction for the planner.
        instruction: String,
        /// Skip the gadget rebind even if `agent.do_replug` is set.
        #[arg(long)]
        no_replug: bool,
        /// Require interactive confirmation before executing each step's
        /// plan.
        #[arg(long)]
        confirm: bool,
        /// Allow actions the danger filter would otherwise refuse.
        #[arg(long)]
        allow_danger: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting kaiVM v{}", env!("CARGO_PKG_VERSION"));

    let config_dir = args.config_dir.unwrap_or_else(get_config_dir);
    tokio::fs::create_dir_all(&config_dir).await?;

    let config_store = ConfigStore::new(config_dir.join("config.toml"));
    let config = config_store.load()?;
    tokio::fs::create_dir_all(&config.paths.run_dir).await?;

    match args.command {
        Command::Capture => run_capture(config).await,
        Command::Agent { instruction, no_replug, confirm, allow_danger } => {
            run_agent(config, &config_dir, instruction, no_replug, confirm, allow_danger).await
        }
    }
}

/// Runs the capture pipeline on a blocking thread (its internals use
/// `std::thread::sleep`, not tokio timers — see `CaptureLoop`'s doc
/// comment) while the async runtime waits for Ctrl-C to drop the stop
/// sentinel, matching the teacher's `tokio::signal::ctrl_c()` shutdown
/// pattern (`main.rs`'s `shutdown_signal`).
async fn run_capture(config: AppConfig) -> anyhow::Result<()> {
    let run_dir = PathBuf::from(&config.paths.run_dir);
    let snapshot = LatestSnapshot::new(run_dir.join("latest.jpg"));
    let live = LiveStreamer::new(run_dir.join("live.mjpg"), config.capture.live_queue_depth);
    let stop_file = PathBuf::from(&config.paths.stop_file);

    tracing::info!(
        command = ?config.capture.source_command,
        out_fps = config.capture.out_fps,
        live_fps = config.capture.live_fps,
        "capture loop starting"
    );

    let signal_stop_file = stop_file.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, stopping capture loop");
            let _ = std::fs::write(&signal_stop_file, b"");
        }
    });

    let mut loop_ = CaptureLoop::new(config.capture.clone(), snapshot, live);
    tokio::task::spawn_blocking(move || loop_.run(|| stop_file.exists())).await?;

    tracing::info!("capture loop stopped");
    Ok(())
}

async fn run_agent(
    config: AppConfig,
    config_dir: &PathBuf,
    instruction: String,
    no_replug: bool,
    confirm: bool,
    allow_danger: bool,
) -> anyhow::Result<()> {
    let mut agent_config = config.agent.clone();
    if no_replug {
        agent_config.do_replug = false;
    }
    if confirm {
        agent_config.confirm = true;
    }
    if allow_danger {
        agent_config.allow_danger = true;
    }

    let run_dir = PathBuf::from(&config.paths.run_dir);
    let paths = AgentPaths {
        latest_jpg: run_dir.join("latest.jpg"),
        stop_file: PathBuf::from(&config.paths.stop_file),
        last_sent_jpg: run_dir.join("last_sent.jpg"),
    };

    let io_timeout = std::time::Duration::from_millis(config.hid.io_timeout_ms);
    let calibration = config::load_calibration(config_dir);
    let keyboard = KeyboardMapper::new(
        HidEndpoint::new("keyboard", &config.hid.keyboard_device).with_io_timeout(io_timeout),
    );
    let abs_mouse = AbsoluteMouse::new(
        HidEndpoint::new("abs_mouse", &config.hid.absolute_mouse_device).with_io_timeout(io_timeout),
        calibration,
    );
    let rel_mouse = RelativeMouse::new(
        HidEndpoint::new("rel_mouse", &config.hid.relative_mouse_device).with_io_timeout(io_timeout),
    );
    let gadget = Some(GadgetControl::new("kaivm"));

    // The planner backend is an external collaborator (spec.md §1
    // out-of-scope list: "the planner backend, treated as an opaque
    // Planner capability"). This binary ships a placeholder that always
    // returns Done so `kaivm agent` is runnable standalone; wiring a real
    // vision-language backend means implementing `agent::Planner` and
    // constructing it here instead.
    let planner = kaivm::agent::StaticPlanner::new(serde_json::json!({
        "reasoning": "no planner backend configured",
        "actions": [{"type": "done", "summary": "no planner backend configured"}]
    }));

    let agent = AgentLoop::new(
        agent_config,
        paths,
        Arc::new(planner),
        keyboard,
        abs_mouse,
        rel_mouse,
        gadget,
    );

    let result = agent.run(&instruction).await;
    println!("{result}");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "kaivm=error",
        LogLevel::Warn => "kaivm=warn",
        LogLevel::Info => "kaivm=info",
        LogLevel::Debug => "kaivm=debug",
        LogLevel::Trace => "kaivm=trace",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

fn get_config_dir() -> PathBuf {
    if let Ok(path) = std::env::var("KAIVM_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/kaivm")
}
