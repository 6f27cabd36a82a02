//! wpokctl - worker pool control CLI

mod commands;
mod report;

use clap::{Parser, Subcommand};
use report::ExitStatus;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wpok_foundation::WpokConfig;

/// wpokctl - submit tasks to the worker pool and wait for them
#[derive(Parser, Debug)]
#[command(name = "wpokctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Task store to use (overrides config and WPOK_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and watch tasks
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },

    /// Observe the tasks of a work
    #[command(alias = "works")]
    Work {
        #[command(subcommand)]
        command: WorkCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TasksCommand {
    /// Create a task (or tasks in batch) from a manifest
    #[command(alias = "c")]
    Create {
        /// YAML/JSON manifest
        #[arg(short, long)]
        file: PathBuf,

        /// Create one task per batch item
        #[arg(long)]
        batch: bool,

        /// Wait for completion
        #[arg(long)]
        wait: bool,

        /// Timeout for waiting in seconds (0 = no timeout)
        #[arg(long, default_value = "0")]
        timeout: String,

        /// Batch: stop on first non-zero code
        #[arg(long)]
        fail_fast: bool,
    },

    /// Watch a single task until it completes
    Watch {
        /// Task ID
        task_id: String,

        /// Timeout in seconds (0 = wait forever)
        #[arg(long, default_value = "0")]
        timeout: String,
    },

    /// Record a task's exit code (worker side)
    Complete {
        /// Task ID
        task_id: String,

        /// Exit code
        #[arg(long, allow_hyphen_values = true)]
        code: i32,
    },
}

#[derive(Subcommand, Debug)]
enum WorkCommand {
    /// Watch all tasks of a work until completion
    Watch {
        /// Work ID
        work_id: String,

        /// Global timeout in seconds (0 = none)
        #[arg(long, default_value = "0")]
        timeout: String,

        /// Stop if no new completions within this period (0 = never)
        #[arg(long, default_value = "0")]
        idle: String,

        /// Stream JSON events (task:done / progress)
        #[arg(long)]
        json: bool,
    },

    /// Show how many tasks of a work are done
    Status {
        /// Work ID
        work_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries results and JSON events
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let status = match run(args).await {
        Ok(status) => status,
        Err(e) => {
            let user_facing = e
                .downcast_ref::<wpok_foundation::Error>()
                .is_some_and(|err| err.is_user_facing());
            if user_facing {
                eprintln!("{}", e);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitStatus::Error
        }
    };

    ExitCode::from(status.code())
}

async fn run(args: Args) -> anyhow::Result<ExitStatus> {
    let mut config = WpokConfig::load()?;
    if let Some(store) = args.store {
        config = config.with_store_path(store);
    }
    tracing::debug!("Using task store {}", config.store_path()?.display());

    match args.command {
        Command::Tasks {
            command:
                TasksCommand::Create {
                    file,
                    batch,
                    wait,
                    timeout,
                    fail_fast,
                },
        } => {
            let options = commands::tasks::CreateOptions {
                batch,
                wait,
                timeout_secs: commands::parse_secs(&timeout),
                fail_fast,
            };
            commands::tasks::create(&config, &file, options).await
        }
        Command::Tasks {
            command: TasksCommand::Watch { task_id, timeout },
        } => {
            commands::tasks::watch(&config, &task_id, commands::parse_secs(&timeout)).await
        }
        Command::Tasks {
            command: TasksCommand::Complete { task_id, code },
        } => {
            commands::tasks::complete(&config, &task_id, code).await
        }
        Command::Work {
            command:
                WorkCommand::Watch {
                    work_id,
                    timeout,
                    idle,
                    json,
                },
        } => {
            let options = commands::work::WatchArgs {
                timeout_secs: commands::parse_secs(&timeout),
                idle_secs: commands::parse_secs(&idle),
                json,
            };
            commands::work::watch(&config, &work_id, options).await
        }
        Command::Work {
            command: WorkCommand::Status { work_id },
        } => {
            commands::work::status(&config, &work_id).await
        }
    }
}
