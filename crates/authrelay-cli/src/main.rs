//! authrelay - command-line front end for an authenticated API session.
//!
//! Requests made here go through the same pipeline a library user gets:
//! API key and session token on every call, and a single shared refresh when
//! the token expires.

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Context, GetArgs, LoginArgs, PostArgs, UploadArgs, WatchArgs};

/// Resilient authenticated API client
#[derive(Parser)]
#[command(name = "authrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// API base URL (overrides config file)
    #[arg(long, global = true, env = "AUTHRELAY_BASE_URL")]
    base_url: Option<String>,

    /// Credential storage: file, keychain or memory
    #[arg(long, global = true)]
    storage: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login(LoginArgs),

    /// Log out and clear stored credentials
    Logout,

    /// Fetch and show the current user's profile
    Whoami,

    /// Show local session state
    Status,

    /// GET one or more endpoints concurrently
    Get(GetArgs),

    /// POST a JSON body
    Post(PostArgs),

    /// Upload a file as multipart form data
    Upload(UploadArgs),

    /// Keep the session fresh and print session events until interrupted
    Watch(WatchArgs),
}

/// Log to stderr, and additionally to a daily file when `AUTHRELAY_LOG_DIR`
/// is set. The returned guard must live until exit to flush the file.
fn init_tracing(verbose: bool) -> Option<WorkerGuard> {
    // RUST_LOG wins over --verbose
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if verbose {
                "authrelay=debug,authrelay_core=debug,warn"
            } else {
                "warn"
            })
        })
    };

    let (file_layer, guard) = match std::env::var_os("AUTHRELAY_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "authrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter()))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose);
    info!("authrelay starting");

    let ctx = Context::open(cli.base_url, cli.storage.as_deref())?;

    match cli.command {
        Commands::Login(args) => commands::login(&ctx, args).await,
        Commands::Logout => commands::logout(&ctx).await,
        Commands::Whoami => commands::whoami(&ctx).await,
        Commands::Status => commands::status(&ctx),
        Commands::Get(args) => commands::get(&ctx, args).await,
        Commands::Post(args) => commands::post(&ctx, args).await,
        Commands::Upload(args) => commands::upload(&ctx, args).await,
        Commands::Watch(args) => commands::watch(&ctx, args).await,
    }
}
