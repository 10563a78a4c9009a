//! lazyd: dispatch daemon and operator interface.
//!
//! Applications register their own tasks and embed `Worker`/`SweepLoop` in
//! their binary. lazyd carries only the built-in sweep task, which is enough
//! to run crash recovery and inspect reschedule flags.

use lazy_dispatch::config::Config;
use lazy_dispatch::config::secrets::ExposeSecret;
use lazy_dispatch::db::Db;
use lazy_dispatch::dispatch::{DispatchContext, Dispatcher, Execution, FlagStore};
use lazy_dispatch::engine::{SweepLoop, Worker, WorkerConfig};
use lazy_dispatch::model::{TaskIdentity, validate_task_name};
use lazy_dispatch::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lazyd", about = "Coalescing task dispatch over Postgres and pgmq")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run queue workers and the periodic sweep
    Serve {
        /// Queues to consume (defaults to DISPATCH_DEFAULT_QUEUE)
        #[arg(long = "queue")]
        queues: Vec<String>,
        /// Do not run the periodic sweep in this process
        #[arg(long)]
        no_sweep: bool,
    },
    /// Run one crash-recovery sweep and print its report
    Sweep,
    /// Reschedule flag operations
    Flags {
        #[command(subcommand)]
        action: FlagsAction,
    },
    /// Print the lock name for a task invocation
    LockName {
        task: String,
        /// Positional args as a JSON array
        #[arg(long)]
        args: Option<String>,
    },
}

#[derive(Subcommand)]
enum FlagsAction {
    /// List outstanding reschedule flags, oldest first
    List,
    /// Delete a reschedule flag (drops the pending trigger)
    Clear { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::LockName { task, args } => cmd_lock_name(task, args),
        Command::Serve { queues, no_sweep } => cmd_serve(queues, no_sweep).await,
        Command::Sweep => {
            let config = Config::from_env()?;
            let _guard = init_telemetry(TelemetryConfig::new(
                config.otel_endpoint.clone(),
                config.log_level.clone(),
            ))?;
            let db = connect(&config).await?;
            let dispatcher = build_dispatcher(Arc::clone(&db), &config)?;
            cmd_sweep(&dispatcher).await
        }
        Command::Flags { action } => {
            let config = Config::from_env()?;
            let db = connect(&config).await?;
            match action {
                FlagsAction::List => cmd_flags_list(&db).await,
                FlagsAction::Clear { name } => cmd_flags_clear(&db, name).await,
            }
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

fn build_dispatcher(db: Arc<Db>, config: &Config) -> anyhow::Result<Arc<Dispatcher>> {
    let mut builder = Dispatcher::builder(db.clone(), db.clone(), db)
        .settings(config.dispatch_settings());
    if let Some(overrides) = config.route_overrides()? {
        builder = builder.route_overrides(overrides);
    }
    Ok(builder.build()?)
}

async fn cmd_serve(queues: Vec<String>, no_sweep: bool) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let db = connect(&config).await?;
    let dispatcher = build_dispatcher(Arc::clone(&db), &config)?;

    let queues = if queues.is_empty() {
        vec![config.default_queue.clone()]
    } else {
        queues
    };

    let workers: Vec<Worker> = queues
        .into_iter()
        .map(|queue| {
            Worker::new(
                Arc::clone(&db),
                Arc::clone(&dispatcher),
                WorkerConfig::for_queue(queue),
            )
        })
        .collect();
    let sweep = if no_sweep {
        None
    } else {
        Some(Arc::new(SweepLoop::new(
            Arc::clone(&dispatcher),
            config.sweep_interval,
        )?))
    };

    {
        let workers = workers.clone();
        let sweep = sweep.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            for worker in &workers {
                worker.shutdown();
            }
            if let Some(sweep) = sweep {
                sweep.shutdown();
            }
        });
    }

    let mut tasks = tokio::task::JoinSet::new();
    for worker in workers {
        tasks.spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!(queue = worker.queue(), "worker stopped: {e}");
            }
        });
    }
    if let Some(sweep) = sweep {
        tasks.spawn(async move { sweep.run().await });
    }
    while tasks.join_next().await.is_some() {}
    Ok(())
}

async fn cmd_sweep(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    match dispatcher.run_sweep(DispatchContext::autocommit()).await? {
        Execution::Completed { result, .. } | Execution::Requeued { result, .. } => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        other => println!("Sweep already running elsewhere ({})", other.label()),
    }
    Ok(())
}

async fn cmd_flags_list(db: &Db) -> anyhow::Result<()> {
    let flags = db.list().await?;
    if flags.is_empty() {
        println!("No reschedule flags.");
        return Ok(());
    }

    println!("{:<20}  NAME", "CREATED");
    println!("{}", "-".repeat(80));
    for flag in &flags {
        println!(
            "{:<20}  {}",
            flag.created_at.format("%Y-%m-%d %H:%M:%S"),
            flag.name
        );
    }
    println!("\n{} flag(s)", flags.len());
    Ok(())
}

async fn cmd_flags_clear(db: &Db, name: String) -> anyhow::Result<()> {
    if db.clear_flag(&name).await? {
        println!("Cleared: {name}");
    } else {
        println!("No flag named {name}");
    }
    Ok(())
}

fn cmd_lock_name(task: String, args: Option<String>) -> anyhow::Result<()> {
    validate_task_name(&task)?;
    let args: Vec<Value> = match args {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| anyhow::anyhow!("--args must be a JSON array: {e}"))?,
        None => Vec::new(),
    };
    println!("{}", TaskIdentity::new(task, args).lock_name());
    Ok(())
}
