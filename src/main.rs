//! Claude Carbon - token usage tracking for Claude Code sessions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_carbon::config::{CarbonConfig, ConfigError, ConfigLoader};
use claude_carbon::display;
use claude_carbon::monitor::Monitor;
use claude_carbon::store::{Period, StoreError, UsageStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PeriodArg {
    Today,
    Week,
    All,
}

impl From<PeriodArg> for Period {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Today => Period::Today,
            PeriodArg::Week => Period::week(),
            PeriodArg::All => Period::AllTime,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "claude-carbon",
    about = "Track token usage of Claude Code sessions",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Usage database path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch Claude Code logs and record usage until interrupted.
    Watch {
        /// Print each event as it is applied.
        #[arg(long)]
        live: bool,
        /// Also process prompt history written before the first run.
        #[arg(long)]
        replay_history: bool,
    },
    /// Token totals per model.
    Stats {
        #[arg(short, long, value_enum, default_value_t = PeriodArg::Today)]
        period: PeriodArg,
    },
    /// Token totals and burn rate per day.
    Daily {
        /// Number of trailing days.
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Today's tokens by hour.
    Hourly,
    /// Most recently active sessions.
    Sessions {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<CarbonConfig, ConfigError> {
    let loader = cli
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load()?;
    if cli.database.is_some() {
        config.database.clone_from(&cli.database);
    }
    Ok(config)
}

async fn watch(mut config: CarbonConfig, store: UsageStore, live: bool, replay_history: bool) -> Result<(), CliError> {
    config.watch.replay_history_backlog |= replay_history;

    let monitor = Monitor::new(config, store);
    let printer = live.then(|| {
        let mut rx = monitor.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                display::print_event(&event);
            }
        })
    });

    let handle = monitor.start();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, stopping");

    let stats = handle.stop().await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    println!(
        "Applied {} events ({} new sessions, {} ignored, {} failed)",
        stats.applied, stats.created, stats.ignored, stats.failed
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let store = UsageStore::open(config.database_path()).await?;

    match cli.command {
        Commands::Watch {
            live,
            replay_history,
        } => watch(config, store, live, replay_history).await?,
        Commands::Stats { period } => {
            let title = match period {
                PeriodArg::Today => "Today",
                PeriodArg::Week => "Last 7 days",
                PeriodArg::All => "All time",
            };
            let usage = store.usage_for_period(period.into()).await?;
            display::print_model_usage(title, &usage);
        }
        Commands::Daily { days } => {
            let period = Period::TrailingDays(days);
            display::print_daily(&store.daily_usage(period).await?);
            println!();
            display::print_burn_rate(&store.burn_rate_by_day(period).await?);
        }
        Commands::Hourly => display::print_hourly(&store.hourly_usage_today().await?),
        Commands::Sessions { limit } => display::print_sessions(&store.list_sessions(limit).await?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
