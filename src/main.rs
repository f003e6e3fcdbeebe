use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod edit;
mod exec;
mod protocol;
mod registry;
mod sandbox;
mod store;
mod tools;

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "daybridge")]
#[command(
    author,
    version,
    about = "Session-scoped remote sandboxes for coding assistants"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project the sessions belong to
    #[arg(long, global = true, env = "DAYBRIDGE_PROJECT_ID", default_value = "global")]
    project_id: String,

    /// Host worktree (default: current directory)
    #[arg(long, global = true)]
    worktree: Option<PathBuf>,

    /// Session store directory
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Daytona API key
    #[arg(long, global = true, env = "DAYTONA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer tool and event requests from a host over stdin/stdout
    Serve,

    /// Run one tool call for a session
    Tool {
        /// Session id
        session: String,

        /// Tool call as JSON, e.g. '{"tool":"bash","args":{"command":"ls"}}'
        call: String,
    },

    /// List recorded sessions for the project
    Sessions,

    /// Delete a session's sandbox
    Delete {
        /// Session id
        session: String,
    },

    /// Print the system prompt addition
    Prompt,
}

/// Serve mode owns stdout, so its logs go to a file.
fn init_logging(verbose: bool, to_file: bool) -> Option<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("daybridge=debug")
    } else {
        EnvFilter::new("daybridge=info")
    };

    let log_dir = dirs::data_dir()
        .map(|d| d.join("daybridge").join("log"))
        .filter(|d| to_file && std::fs::create_dir_all(d).is_ok());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "daybridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(cli.verbose, matches!(cli.command, Commands::Serve));

    let args = GlobalArgs {
        project_id: cli.project_id,
        worktree: cli.worktree,
        storage_dir: cli.storage_dir,
        api_key: cli.api_key,
    };

    match cli.command {
        Commands::Serve => {
            commands::serve::run(&args).await?;
        }
        Commands::Tool { session, call } => {
            commands::tool::run(&args, &session, &call).await?;
        }
        Commands::Sessions => {
            commands::sessions::run(&args).await?;
        }
        Commands::Delete { session } => {
            commands::delete::run(&args, &session).await?;
        }
        Commands::Prompt => {
            commands::prompt::run(&args)?;
        }
    }

    Ok(())
}
