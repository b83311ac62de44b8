//! heartwatch CLI
//!
//! Streams heart-rate samples into an append log and prints trailing-window
//! metrics once per tick.

use anyhow::{anyhow, Context};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use heartwatch::{
    config::Config,
    core::{
        latest_log, Clock, LogStore, SchedulerConfig, SnapshotBuilder, SystemClock,
        UpdateScheduler, WindowMode, WindowReader, TIMESTAMP_FORMAT,
    },
    display::{stdout_sink, OutputFormat, SnapshotSink},
    ingest::{IngestActor, Normalizer, TransportSpec, WireFormat},
    stats::{create_shared_stats_with_persistence, PersistedStats},
    VERSION,
};

#[derive(Parser)]
#[command(name = "heartwatch")]
#[command(version = VERSION)]
#[command(about = "Heart-rate ingestion with a durable log and trailing-window metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest samples and publish metrics until Ctrl+C or end of input
    Run {
        /// Message source: stdin, file:<path> or tcp:<host:port>
        #[arg(long, default_value = "stdin")]
        source: TransportSpec,

        /// Wire format: auto, structured, scalar or delimited
        #[arg(long)]
        format: Option<String>,

        /// Trailing window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// Scheduler period in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,

        /// How the window is derived each tick: scan or tail
        #[arg(long)]
        window_mode: Option<WindowMode>,

        /// Snapshot output: console or jsonl
        #[arg(long, default_value = "console")]
        output: OutputFormat,

        /// Directory for the run log
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Append to an existing log instead of starting a new one
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Compute one snapshot from an existing log
    Window {
        /// Log file (defaults to the newest log in the log directory)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Trailing window length in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// End of the window, "YYYY-MM-DD HH:MM:SS" (defaults to now)
        #[arg(long)]
        as_of: Option<String>,

        /// Snapshot output: console or jsonl
        #[arg(long, default_value = "console")]
        output: OutputFormat,
    },

    /// Normalize a single message and print the resulting record
    Decode {
        message: String,

        /// Wire format: auto, structured, scalar or delimited
        #[arg(long)]
        format: Option<String>,
    },

    /// Show paths and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

struct RunArgs {
    source: TransportSpec,
    format: Option<String>,
    window_secs: Option<u64>,
    tick_ms: Option<u64>,
    window_mode: Option<WindowMode>,
    output: OutputFormat,
    log_dir: Option<PathBuf>,
    resume: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            source,
            format,
            window_secs,
            tick_ms,
            window_mode,
            output,
            log_dir,
            resume,
        } => cmd_run(RunArgs {
            source,
            format,
            window_secs,
            tick_ms,
            window_mode,
            output,
            log_dir,
            resume,
        }),
        Commands::Window {
            log,
            window_secs,
            as_of,
            output,
        } => cmd_window(log, window_secs, as_of, output),
        Commands::Decode { message, format } => cmd_decode(&message, format.as_deref()),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load config ({e}), using defaults");
        Config::default()
    })
}

/// `auto` means detect per message; anything else pins the format.
fn parse_format(value: &str) -> anyhow::Result<Option<WireFormat>> {
    if value.eq_ignore_ascii_case("auto") {
        Ok(None)
    } else {
        value.parse().map(Some).map_err(|e: String| anyhow!(e))
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config();
    if let Some(format) = args.format.as_deref() {
        config.wire_format = parse_format(format)?;
    }
    if let Some(secs) = args.window_secs {
        config.window_duration = Duration::from_secs(secs);
    }
    if let Some(ms) = args.tick_ms {
        config.tick_interval = Duration::from_millis(ms);
    }
    if let Some(mode) = args.window_mode {
        config.window_mode = mode;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.zone()?));
    let stats = create_shared_stats_with_persistence(config.stats_path());
    let builder = SnapshotBuilder::new();

    let store = match &args.resume {
        Some(path) => LogStore::resume(path)
            .with_context(|| format!("cannot resume log {}", path.display()))?,
        None => LogStore::create(&config.log_dir, clock.now(), builder.instance_id())
            .with_context(|| format!("cannot create log in {}", config.log_dir.display()))?,
    }
    .with_sync_on_append(config.sync_on_append);

    eprintln!("heartwatch v{VERSION}");
    eprintln!("  Source: {}", args.source);
    eprintln!(
        "  Wire format: {}",
        config.wire_format.map(|f| f.name()).unwrap_or("auto")
    );
    eprintln!(
        "  Window: {}s ({:?})",
        config.window_duration.as_secs(),
        config.window_mode
    );
    eprintln!("  Tick: {}ms", config.tick_interval.as_millis());
    eprintln!("  Log: {}", store.path().display());
    eprintln!("  Instance ID: {}", builder.instance_id());
    eprintln!();
    eprintln!("Press Ctrl+C to stop");
    eprintln!();

    let transport = args
        .source
        .open()
        .with_context(|| format!("cannot open source {}", args.source))?;
    let actor = IngestActor::spawn(
        transport,
        Normalizer::with_format(config.wire_format),
        clock.clone(),
        config.channel_capacity,
        stats.clone(),
    )?;

    let (stop, shutdown) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop.try_send(());
    })
    .context("Error setting Ctrl+C handler")?;

    let scheduler_config = SchedulerConfig {
        tick_interval: config.tick_interval,
        window_duration: config.window_duration,
        ipm_factor: config.ipm_factor,
        window_mode: config.window_mode,
        stop_when_input_closes: true,
    };
    let scheduler = UpdateScheduler::new(
        scheduler_config,
        store,
        actor.receiver().clone(),
        stdout_sink(args.output),
        clock,
        stats.clone(),
    )
    .with_builder(builder);

    scheduler.run(shutdown)?;

    // A transport still blocked on input is left detached.
    if !actor.is_running() {
        actor.join();
    }

    eprintln!();
    eprintln!("{}", stats.summary());
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save session stats: {e}");
    }
    Ok(())
}

fn cmd_window(
    log: Option<PathBuf>,
    window_secs: Option<u64>,
    as_of: Option<String>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let config = load_config();

    let path = match log {
        Some(path) => path,
        None => latest_log(&config.log_dir)?
            .ok_or_else(|| anyhow!("no logs found in {}", config.log_dir.display()))?,
    };

    let as_of = match as_of {
        Some(text) => NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid --as-of '{text}', expected YYYY-MM-DD HH:MM:SS"))?,
        None => SystemClock::new(config.zone()?).now(),
    };
    let duration = window_secs
        .map(Duration::from_secs)
        .unwrap_or(config.window_duration);

    let entries = WindowReader::new(&path)
        .read_window(duration, as_of)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let snapshot = SnapshotBuilder::new().build_offline(&entries, as_of, config.ipm_factor);

    stdout_sink(output).publish(&snapshot)?;
    Ok(())
}

fn cmd_decode(message: &str, format: Option<&str>) -> anyhow::Result<()> {
    let config = load_config();
    let pinned = match format {
        Some(format) => parse_format(format)?,
        None => config.wire_format,
    };

    let detected = pinned.or_else(|| WireFormat::detect(message));
    let now = SystemClock::new(config.zone()?).now();
    let record = Normalizer::with_format(pinned).normalize(message.as_bytes(), now)?;

    println!(
        "Format: {}",
        detected.map(|f| f.name()).unwrap_or("unknown")
    );
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.has_signal() {
        println!("Log line body: {}", record.body()?);
    } else {
        println!("No signal: this record would not be logged");
    }
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("heartwatch Status");
    println!("=================");
    println!();
    println!("Configuration:");
    println!("  Config file: {}", Config::config_path().display());
    println!("  Log directory: {}", config.log_dir.display());
    println!("  Window duration: {}s", config.window_duration.as_secs());
    println!("  Tick interval: {}ms", config.tick_interval.as_millis());
    println!("  Timezone: {}", config.timezone);
    match latest_log(&config.log_dir)? {
        Some(path) => println!("  Latest log: {}", path.display()),
        None => println!("  Latest log: none"),
    }
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)
            .with_context(|| format!("cannot read {}", stats_path.display()))?;
        let stats: PersistedStats = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse {}", stats_path.display()))?;

        println!("Cumulative Statistics:");
        println!("  Messages received: {}", stats.messages_received);
        println!("  Malformed messages: {}", stats.records_malformed);
        println!("  Records appended: {}", stats.records_appended);
        println!("  Records rejected: {}", stats.records_rejected);
        println!("  Ticks: {}", stats.ticks);
        println!("  Last updated: {}", stats.last_updated);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
