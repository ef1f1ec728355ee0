mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tabreader_core::paths::LOG_FILE_NAME;
use tabreader_core::{Config, Paths};

use commands::{BridgeTarget, HostArgs};

#[derive(Parser)]
#[command(name = "tabreader")]
#[command(about = "Native messaging bridge between a browser extension and local automation clients", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host options, used when no subcommand is given (the browser launches
    /// the binary without one)
    #[command(flatten)]
    host: HostArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the native messaging host (the default)
    Host(HostArgs),

    /// Send one request through a running bridge and print the reply
    Request {
        /// Action name, e.g. extract_current_tab
        #[arg(short, long)]
        action: String,

        /// Extra request field as key=value (value parsed as JSON when possible)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Base request object as JSON
        #[arg(long)]
        json: Option<String>,

        /// Bridge token (falls back to TABREADER_TOKEN, then tokens.json)
        #[arg(long)]
        token: Option<String>,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        #[command(flatten)]
        target: BridgeTarget,
    },

    /// Check that the bridge port accepts connections
    Check {
        #[command(flatten)]
        target: BridgeTarget,
    },

    /// Show paths, settings and bridge state
    Status,

    /// Manage bridge access tokens
    Tokens {
        #[command(subcommand)]
        command: TokensCommands,
    },
}

#[derive(Subcommand)]
enum TokensCommands {
    /// List configured tokens (masked)
    List,
    /// Add a token
    Add { token: String },
    /// Remove a token
    Remove { token: String },
    /// Generate, store and print a new token
    Generate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = Paths::new();

    let verbose = cli.verbose;
    let command = cli.command.unwrap_or(Commands::Host(cli.host));
    if !matches!(command, Commands::Host(_)) {
        init_tracing(verbose, "warn", None);
    }

    match command {
        Commands::Host(args) => run_host(args, &paths, verbose).await,
        Commands::Request {
            action,
            params,
            json,
            token,
            timeout,
            target,
        } => {
            commands::request::run(&paths, &target, &action, &params, json.as_deref(), token, timeout)
                .await
        }
        Commands::Check { target } => commands::check::run(&paths, &target).await,
        Commands::Status => commands::status::run(&paths).await,
        Commands::Tokens { command } => match command {
            TokensCommands::List => commands::tokens::list(&paths),
            TokensCommands::Add { token } => commands::tokens::add(&paths, &token),
            TokensCommands::Remove { token } => commands::tokens::remove(&paths, &token),
            TokensCommands::Generate => commands::tokens::generate(&paths),
        },
    }
}

async fn run_host(args: HostArgs, paths: &Paths, verbose: bool) -> anyhow::Result<()> {
    let config = Config::load_or_default(paths)?;
    let log_dir = config.logging.file.then(|| paths.state.clone());
    // Held until the host exits so buffered lines reach the log file.
    let logging = init_tracing(verbose, "info", log_dir);
    let log_file = logging.file.clone();
    commands::host::run(args, config, paths, log_file.as_deref()).await
}

struct Logging {
    file: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Logs go to stderr, and for the host also to `native_host.log` in
/// `log_dir`. Stdout belongs to the native messaging channel.
fn init_tracing(verbose: bool, default_level: &str, log_dir: Option<PathBuf>) -> Logging {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(default_level)
        }
    });

    let mut open_error = None;
    let appender = log_dir.and_then(|dir| match file_appender(&dir) {
        Ok(appender) => Some((dir.join(LOG_FILE_NAME), appender)),
        Err(e) => {
            open_error = Some((dir, e));
            None
        }
    });
    let (file, guard, file_layer) = match appender {
        Some((path, appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(path),
                Some(guard),
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
            )
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some((dir, e)) = open_error {
        tracing::warn!(dir = %dir.display(), error = %e, "Cannot open log file, logging to stderr only");
    }
    Logging {
        file,
        _guard: guard,
    }
}

/// Appends to a single, never-rotated log file.
fn file_appender(dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(dir)?;
    Ok(appender)
}
