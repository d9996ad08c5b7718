use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use guardian::checks::default_registry;
use guardian::config::Settings;
use guardian::models::{SendRequest, TaskOutcome};
use guardian::pipeline::Pipeline;
use guardian::server::{self, AppState};
use guardian::tasks::TaskSource;
use guardian::tasks::sqlite::SqliteTaskStore;

#[derive(Parser)]
#[command(name = "guardian", version, about = "Screens prompts against per-user policy checks.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path for task assignments (use :memory: for ephemeral)
    #[arg(short, long, global = true)]
    db: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP ingress
    Serve {
        /// Address to bind, overrides SERVER_ADDR / SERVER_PORT
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Assign a check to a user
    Assign {
        #[arg(short, long)]
        user: Uuid,
        #[arg(short, long)]
        task: String,
    },
    /// Remove a check from a user
    Unassign {
        #[arg(short, long)]
        user: Uuid,
        #[arg(short, long)]
        task: String,
    },
    /// List the checks assigned to a user
    Tasks {
        #[arg(short, long)]
        user: Uuid,
    },
    /// Evaluate a single prompt and print the verdict
    Check {
        #[arg(short, long)]
        user: Uuid,
        #[arg(short, long)]
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let settings = Settings::from_env().context("invalid configuration")?;
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => settings.db_path.to_string_lossy().into_owned(),
    };
    let store = Arc::new(open_store(&db_path)?);

    match cli.command {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
            let pipeline = Pipeline::new(
                Arc::new(default_registry(&settings.external_api_url)),
                store,
                settings.pipeline_config(),
            );
            info!(
                workers = settings.worker_pool_size.get(),
                db = %db_path,
                "pipeline ready"
            );

            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind to {}", addr))?;
            server::serve(
                listener,
                AppState {
                    processor: Arc::new(pipeline),
                    request_timeout: settings.request_timeout,
                },
            )
            .await
        }
        Command::Assign { user, task } => {
            store.assign(user, &task)?;
            println!("✓ assigned {} to {}", task, user);
            Ok(())
        }
        Command::Unassign { user, task } => {
            if store.unassign(user, &task)? == 0 {
                println!("{} had no {} check", user, task);
            } else {
                println!("✓ removed {} from {}", task, user);
            }
            Ok(())
        }
        Command::Tasks { user } => {
            let tasks = store.user_tasks(user).await?;
            if tasks.is_empty() {
                println!("no checks assigned to {}", user);
            }
            for task in tasks {
                println!("  {}", task.task_type());
            }
            Ok(())
        }
        Command::Check { user, prompt } => {
            let pipeline = Pipeline::new(
                Arc::new(default_registry(&settings.external_api_url)),
                store,
                settings.pipeline_config(),
            );
            let report = pipeline.run(&SendRequest::new(user, prompt)).await?;

            for result in &report.results {
                match &result.outcome {
                    TaskOutcome::Passed => println!("  [{}] ✓ passed", result.task_type),
                    TaskOutcome::Rejected => println!("  [{}] ✗ rejected", result.task_type),
                    TaskOutcome::Errored(e) => println!("  [{}] ✗ {}", result.task_type, e),
                    TaskOutcome::Unregistered => {
                        println!("  [{}] ? no such check", result.task_type)
                    }
                }
            }
            if report.fetch_failed {
                println!("  (task list unavailable)");
            }
            println!("\n=> {}", report.verdict);
            Ok(())
        }
    }
}

fn open_store(path: &str) -> Result<SqliteTaskStore> {
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteTaskStore::open(path)
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
