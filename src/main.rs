//! tmux-bridge - Drive interactive AI agents living inside tmux
//!
//! Run with `tmux-bridge --help` for usage.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tmux_bridge::{
    config::{Config, TimerLedger},
    error::{Error, ScheduleError},
    schedule::Scheduler,
    tmux::{
        CommandExecutor, ContentCapture, MatchScope, MessageDelivery, SessionDirectory,
        StatusMonitor, Target, DEFAULT_CAPTURE_LINES,
    },
    PathResolver, APP_NAME, VERSION,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Secure bridge for driving interactive AI agents inside tmux")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Type a message into a window and submit it
    Send {
        /// Target as session:window[.pane]
        target: String,

        /// Message text
        #[arg(allow_hyphen_values = true, required_unless_present = "file")]
        message: Option<String>,

        /// Send the contents of a file under the projects directory instead
        #[arg(short, long, conflicts_with = "message")]
        file: Option<PathBuf>,
    },

    /// Deliver a note to a window after a number of minutes
    Schedule {
        /// Minutes from now
        minutes: u64,

        /// Note to deliver
        #[arg(allow_hyphen_values = true)]
        note: String,

        /// Target window (default: the current tmux window)
        target: Option<String>,
    },

    /// Body of a detached timer
    #[command(hide = true)]
    Deliver {
        #[arg(long)]
        delay_secs: u64,

        #[arg(long)]
        settle_ms: Option<u64>,

        target: String,

        #[arg(allow_hyphen_values = true)]
        message: String,
    },

    /// Print recent output of a window
    Capture {
        /// Target as session:window[.pane]
        target: String,

        /// Number of lines
        #[arg(short = 'n', long, default_value_t = DEFAULT_CAPTURE_LINES)]
        lines: usize,
    },

    /// List sessions and their windows
    Sessions {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Find windows by case-insensitive name
    Find {
        pattern: String,

        /// Also match session names
        #[arg(short, long)]
        sessions: bool,
    },

    /// Show details of one window
    Info {
        /// Target as session:window
        target: String,
    },

    /// Report every window of every session
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Plain-text monitoring snapshot
    Snapshot,

    /// Manage recurring crontab jobs
    Cron {
        #[command(subcommand)]
        action: CronCommand,
    },

    /// Manage detached timers
    Timers {
        #[command(subcommand)]
        action: TimerCommand,
    },

    /// Run an operator script from the scripts directory
    RunScript {
        /// Script file name, relative to the scripts directory
        name: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum CronCommand {
    /// Deliver a message on a cron schedule
    Add {
        /// Five cron fields or an @ macro, e.g. "0 9 * * 1-5"
        schedule: String,

        target: String,

        #[arg(allow_hyphen_values = true)]
        message: String,
    },

    /// Run an arbitrary command on a cron schedule
    AddCommand {
        schedule: String,

        #[arg(allow_hyphen_values = true)]
        command: String,
    },

    /// List managed jobs
    List,

    /// Remove a managed job by id
    Remove { id: String },
}

#[derive(Subcommand)]
enum TimerCommand {
    /// List pending timers
    List,

    /// Cancel a pending timer by id (or unique id prefix)
    Cancel { id: String },
}

fn setup_logging(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info").add_directive("tokio=warn".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Everything a subcommand may need, built once from configuration
struct Bridge {
    config: Config,
    resolver: PathResolver,
    executor: CommandExecutor,
    delivery: MessageDelivery,
    capture: ContentCapture,
}

impl Bridge {
    fn new(config: Config) -> Result<Self> {
        let resolver = PathResolver::from_config(&config)?;
        let executor = CommandExecutor::from_config(&config, &resolver);
        let delivery =
            MessageDelivery::new(executor.clone()).with_settle_interval(config.settle_interval());
        let capture = ContentCapture::new(executor.clone()).with_max_lines(config.max_capture_lines);
        Ok(Self {
            config,
            resolver,
            executor,
            delivery,
            capture,
        })
    }

    fn directory(&self) -> SessionDirectory {
        SessionDirectory::new(self.executor.clone())
    }

    fn monitor(&self) -> StatusMonitor {
        StatusMonitor::new(self.executor.clone(), self.capture.clone())
    }

    fn scheduler(&self, delivery: MessageDelivery) -> Result<Scheduler> {
        let self_exe = std::env::current_exe()?;
        Ok(Scheduler::new(self.executor.clone(), delivery, self_exe))
    }

    /// Window the caller is sitting in
    async fn current_target(&self) -> Result<Target> {
        let result = self
            .executor
            .secure_tmux("display-message", &["-p", "#{session_name}:#{window_index}"])
            .await?
            .into_checked()
            .map_err(|e| eyre!("No target given and not inside tmux: {e}"))?;
        Ok(result.stdout.trim().parse()?)
    }
}

fn is_finished_timer_error(err: &Error) -> bool {
    matches!(
        err,
        Error::Schedule(ScheduleError::TaskNotFound(_))
            | Error::Schedule(ScheduleError::InvalidTransition { .. })
    )
}

async fn run_cron(bridge: &Bridge, action: CronCommand) -> Result<()> {
    let scheduler = bridge.scheduler(bridge.delivery.clone())?;

    match action {
        CronCommand::Add {
            schedule,
            target,
            message,
        } => {
            let target: Target = target.parse()?;
            let entry = scheduler
                .schedule_recurring_delivery(&schedule, &target, &message)
                .await?;
            println!("Added cron job {}: {}", entry.id, entry.line);
        }
        CronCommand::AddCommand { schedule, command } => {
            let entry = scheduler.add_cron(&schedule, &command).await?;
            println!("Added cron job {}: {}", entry.id, entry.line);
        }
        CronCommand::List => {
            let entries = scheduler.list_cron().await?;
            if entries.is_empty() {
                println!("No managed cron jobs.");
            }
            for entry in entries {
                println!("{}  {}  {}", entry.id, entry.schedule, entry.command);
            }
        }
        CronCommand::Remove { id } => {
            scheduler.remove_cron(&id).await?;
            println!("Removed cron job {}", id);
        }
    }

    Ok(())
}

fn run_timers(bridge: &Bridge, action: TimerCommand) -> Result<()> {
    let mut ledger = TimerLedger::load()?;
    let pruned = ledger.prune(Utc::now());

    match action {
        TimerCommand::List => {
            if pruned > 0 {
                ledger.save()?;
            }
            if ledger.is_empty() {
                println!("No pending timers.");
            }
            for timer in &ledger.timers {
                println!(
                    "{}  {}  {}  pid {}  {}",
                    timer.id,
                    timer.fire_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    timer.target,
                    timer.pid,
                    timer.note
                );
            }
        }
        TimerCommand::Cancel { id } => {
            let Some(handle) = ledger.find(&id).cloned() else {
                ledger.save()?;
                bail!("No pending timer matches '{}'", id);
            };

            let scheduler = bridge.scheduler(bridge.delivery.clone())?;
            let outcome = scheduler.cancel_timer(&handle);
            ledger.remove(&handle.id);
            ledger.save()?;

            match outcome {
                Ok(_) => println!("Cancelled timer {}", handle.id),
                Err(e) if is_finished_timer_error(&e) => {
                    println!("Timer {} already finished: {}", handle.id, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    setup_logging(cli.debug || config.debug, config.log_file.as_ref())?;

    // Ensure required directories exist
    if let Err(e) = config.ensure_directories() {
        warn!("Failed to create directories: {}", e);
    }

    let bridge = Bridge::new(config)?;

    match cli.command {
        Commands::Send {
            target,
            message,
            file,
        } => {
            let target: Target = target.parse()?;
            let result = match (message, file) {
                (_, Some(file)) => {
                    bridge
                        .delivery
                        .send_file(&target, &file, bridge.resolver.projects_dir())
                        .await?
                }
                (Some(message), None) => bridge.delivery.send_to(&target, &message).await?,
                (None, None) => bail!("Nothing to send"),
            };
            if !result.success {
                bail!("Delivery to {} failed: {}", target, result.stderr.trim());
            }
            println!("Message sent to {}", target);
        }

        Commands::Schedule {
            minutes,
            note,
            target,
        } => {
            let target = match target {
                Some(t) => t.parse()?,
                None => bridge.current_target().await?,
            };
            let delay = Duration::from_secs(minutes.saturating_mul(60));

            let scheduler = bridge.scheduler(bridge.delivery.clone())?;
            let handle = scheduler.schedule_in(delay, &target, &note).await?;

            let mut ledger = TimerLedger::load()?;
            ledger.prune(Utc::now());
            ledger.add(handle.clone());
            ledger.save()?;

            println!(
                "Scheduled {} for {} at {} (pid {})",
                handle.id,
                target,
                handle.fire_at.with_timezone(&Local).format("%H:%M:%S"),
                handle.pid
            );
        }

        Commands::Deliver {
            delay_secs,
            settle_ms,
            target,
            message,
        } => {
            let target: Target = target.parse()?;
            let mut delivery = bridge.delivery.clone();
            if let Some(ms) = settle_ms {
                delivery = delivery.with_settle_interval(Duration::from_millis(ms));
            }
            let scheduler = bridge.scheduler(delivery)?;
            let result = scheduler
                .run_delivery(Duration::from_secs(delay_secs), &target, &message)
                .await?;
            if result.success {
                info!("Timer delivered to {}", target);
            } else {
                bail!("Timer delivery to {} failed: {}", target, result.stderr.trim());
            }
        }

        Commands::Capture { target, lines } => {
            print!("{}", bridge.capture.capture(&target, lines).await);
        }

        Commands::Sessions { json } => {
            let sessions = bridge.directory().list_sessions().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No tmux sessions.");
            } else {
                for session in sessions {
                    let state = if session.attached { "attached" } else { "detached" };
                    println!("{} ({})", session.name, state);
                    for window in session.windows {
                        let marker = if window.active { "*" } else { " " };
                        println!("  {}{}: {}", marker, window.index, window.name);
                    }
                }
            }
        }

        Commands::Find { pattern, sessions } => {
            let scope = if sessions {
                MatchScope::IncludeSessions
            } else {
                MatchScope::Windows
            };
            for (session, index) in bridge.directory().find_by_name(&pattern, scope).await? {
                println!("{}:{}", session, index);
            }
        }

        Commands::Info { target } => {
            let target: Target = target.parse()?;
            let info = bridge.monitor().window_info(&target).await?;
            println!("Name:     {}", info.name);
            println!("Active:   {}", info.active);
            println!("Panes:    {}", info.panes);
            println!("Layout:   {}", info.layout);
            println!("Role:     {}", info.role);
            println!("Activity: {}", info.activity);
            println!();
            print!("{}", info.content);
        }

        Commands::Status { json } => {
            let report = bridge.monitor().collect_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for session in &report.sessions {
                    let state = if session.attached { "attached" } else { "detached" };
                    println!("{} ({})", session.name, state);
                    for window in &session.windows {
                        let detail = match (&window.info, &window.error) {
                            (Some(info), _) => info.activity.to_string(),
                            (None, Some(error)) => format!("unavailable: {error}"),
                            (None, None) => String::new(),
                        };
                        println!("  {}: {}  {}", window.index, window.name, detail);
                    }
                }
            }
        }

        Commands::Snapshot => {
            print!("{}", bridge.monitor().snapshot().await?);
        }

        Commands::Cron { action } => run_cron(&bridge, action).await?,

        Commands::Timers { action } => run_timers(&bridge, action)?,

        Commands::RunScript { name, args } => {
            let script = bridge.resolver.script_path(&name, None)?;
            let result = bridge
                .executor
                .execute(&script.to_string_lossy(), &args)
                .await?;
            print!("{}", result.stdout);
            if !result.success {
                bail!("{} exited with {}: {}", name, result.exit_code, result.stderr.trim());
            }
        }

        Commands::Config { init } => {
            let config = &bridge.config;
            if init {
                config.save()?;
                println!(
                    "Configuration initialized at {:?}",
                    Config::config_file_path()?
                );
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(config)?);
                println!("\nConfig file: {:?}", Config::config_file_path()?);
                println!("Data dir: {:?}", Config::data_dir()?);
                println!("Timer ledger: {:?}", Config::timers_file_path()?);
                println!("Scripts dir: {:?}", bridge.resolver.scripts_base());
            }
        }
    }

    Ok(())
}
