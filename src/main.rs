//! enginelink CLI - runs the engine plugin services headless.
//!
//! Connects to the engine, keeps both services registered across engine
//! restarts and logs what the engine pushes. See the `enginelink` library
//! for the core functionality.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use enginelink::{
    Config, ConnectionManager, ConnectionStatus, PropertyEditService, PropertyEvent, SceneEvent,
    SceneSyncService,
};
use mimalloc::MiMalloc;

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// How often the main thread drains service events.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "enginelink")]
#[command(version)]
#[command(about = "Headless scene sync and property editing link to a running engine")]
struct Cli {
    /// Engine host (default from config, then 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Engine port (default from config, then 4030)
    #[arg(long)]
    port: Option<u16>,

    /// Write logs to this file instead of stderr (or set ENGINELINK_LOG_FILE)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Arguments forwarded to the engine launch
    #[arg(last = true)]
    launch_args: Vec<String>,
}

impl Cli {
    /// The engine part of the command line, as `PluginService::start` takes it.
    fn engine_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.extend(["--host".to_owned(), host.clone()]);
        }
        if let Some(port) = self.port {
            args.extend(["--port".to_owned(), port.to_string()]);
        }
        if !self.launch_args.is_empty() {
            args.push("--".to_owned());
            args.extend(self.launch_args.iter().cloned());
        }
        args
    }
}

fn init_logging(log_file: Option<PathBuf>) -> Result<()> {
    let log_path = log_file.or_else(|| std::env::var_os("ENGINELINK_LOG_FILE").map(PathBuf::from));
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = log_path {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn log_scene_event(event: SceneEvent) {
    match event {
        SceneEvent::TreeUpdated { flavor, tree } => log::info!(
            "[SceneSync] {flavor:?} tree '{}': {} objects, {} sub-scenes",
            tree.name,
            tree.object_count(),
            tree.children.len()
        ),
        SceneEvent::RuntimeSelection(object_ref) => {
            log::info!("[SceneSync] Engine selected #{object_ref}")
        }
    }
}

fn log_property_event(event: PropertyEvent) {
    match event {
        PropertyEvent::Updated { object_ref, xml } => {
            log::info!("[Properties] #{object_ref} updated ({} bytes)", xml.len())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let config = Config::load();
    let manager = Arc::new(ConnectionManager::tcp(config.connect_timeout()));
    let scene = SceneSyncService::new(Arc::clone(&manager), &config);
    let properties = PropertyEditService::new(Arc::clone(&manager), &config);

    let status = scene.runtime().subscribe_status();
    let scene_events = scene.subscribe();
    let property_events = properties.subscribe();

    let args = cli.engine_args();
    scene.start(&args).context("Failed to start scene sync")?;
    properties
        .start(&args)
        .context("Failed to start property editor")?;

    if let Some(settings) = manager.settings() {
        println!("Waiting for engine at {}...", settings.endpoint());
    }

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        for change in status.try_iter() {
            match change {
                ConnectionStatus::Connected => println!("Engine connected"),
                ConnectionStatus::Disconnected => println!("Engine disconnected"),
            }
        }
        scene_events.try_iter().for_each(log_scene_event);
        property_events.try_iter().for_each(log_property_event);
        std::thread::sleep(EVENT_POLL_INTERVAL);
    }

    println!("Shutting down...");
    properties.stop();
    scene.stop();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.clone())?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&Config::load())?);
        return Ok(());
    }

    run(&cli)
}
