//! overseer - mission execution core.
//!
//! Usage:
//!   overseer serve                  Serve the HTTP API
//!   overseer tasks <command>        Manage tasks in a task log
//!   overseer plan validate <file>   Validate a plan file
//!   overseer plan run <file>        Run a plan file as a mission

use clap::{Args, Parser, Subcommand};
use overseer::api::{self, ApiState};
use overseer::config::{ConfigLoader, OverseerConfig};
use overseer::core::types::TaskId;
use overseer::{
    CheckVerifier, EventBus, ExecutionPool, JsonlPatternStore, LoggingHandler, MemoryPatternStore,
    MissionContext, MissionId, NewTask, Overseer, PatternStore, PlanBuilder, Priority,
    RateLimiter, TaskStatus, TaskStore, TemplatePlanner, ToolRegistry,
};
use overseer::ratelimit::MemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// overseer - plan, execute and verify missions
#[derive(Parser)]
#[command(name = "overseer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to overseer.yaml (defaults apply when omitted)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Task log file (in-memory when omitted)
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,

        /// Disable request rate limiting
        #[arg(long)]
        no_rate_limit: bool,
    },

    /// Manage tasks in a task log
    Tasks(TasksArgs),

    /// Work with plan files
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
}

#[derive(Args)]
struct TasksArgs {
    /// Task log file (falls back to store.path from the config)
    #[arg(long, value_name = "FILE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: TaskCommands,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a task
    Add {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// 0 = critical, 1 = high, 2 = medium, 3 = low
        #[arg(short, long, default_value = "2")]
        priority: u8,

        /// Task this one depends on (repeatable)
        #[arg(long = "depends-on", value_name = "TASK_ID")]
        depends_on: Vec<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List tasks
    List {
        /// Only show tasks with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// List tasks ready to start
    Ready,

    /// Show task counts per status
    Stats,

    /// Mark a task completed
    Complete { id: String },

    /// Delete a task
    Delete { id: String },

    /// Rewrite the log with one record per live task
    Compact,
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Validate a plan file without running it
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a plan file as a mission
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Mission description (defaults to the plan's reasoning)
        #[arg(short, long)]
        mission: Option<String>,

        /// Maximum concurrent steps
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Force verification to fail (exercises retry and escalation)
        #[arg(long)]
        force_failure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => OverseerConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            store,
            no_rate_limit,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if store.is_some() {
                config.store.path = store;
            }
            if no_rate_limit {
                config.rate_limit.enabled = false;
            }
            serve(config).await?;
        }
        Commands::Tasks(args) => {
            let path = args
                .store
                .or_else(|| config.store.path.clone())
                .ok_or("no task log given: pass --store or set store.path")?;
            run_tasks(&path, args.command).await?;
        }
        Commands::Plan { command } => match command {
            PlanCommands::Validate { file } => validate_plan(&file)?,
            PlanCommands::Run {
                file,
                mission,
                concurrency,
                force_failure,
            } => {
                let mut config = config;
                if let Some(n) = concurrency {
                    config.pool.max_concurrency = n;
                }
                run_plan(config, &file, mission, force_failure).await?;
            }
        },
    }

    Ok(())
}

async fn open_store(path: Option<&Path>) -> Result<Arc<TaskStore>, Box<dyn std::error::Error>> {
    let store = match path {
        Some(path) => {
            let store = TaskStore::open_file(path).await?;
            info!("Task log: {}", path.display());
            store
        }
        None => TaskStore::in_memory(),
    };
    Ok(Arc::new(store))
}

/// Wire an overseer from configuration.
async fn build_overseer(
    config: &OverseerConfig,
    planner: TemplatePlanner,
    store: Arc<TaskStore>,
) -> Overseer {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let patterns: Arc<dyn PatternStore> = match &config.learning.path {
        Some(path) => Arc::new(JsonlPatternStore::new(path)),
        None => Arc::new(MemoryPatternStore::new()),
    };

    let registry = Arc::new(ToolRegistry::with_builtins());
    let builder = PlanBuilder::new(Arc::new(planner), registry);
    let pool = ExecutionPool::new(config.pool.clone()).with_event_bus(event_bus.clone());

    Overseer::new(builder, Arc::new(CheckVerifier::new()))
        .with_pool(pool)
        .with_retry_policy(config.retry.clone())
        .with_pattern_store(patterns)
        .with_task_store(store)
        .with_event_bus(event_bus)
}

/// Serve the HTTP API until Ctrl+C.
async fn serve(config: OverseerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config.store.path.as_deref()).await?;
    let planner = TemplatePlanner::from_templates(config.templates.clone());
    info!(
        "Loaded {} plan template(s): {}",
        config.templates.len(),
        planner.mission_types().join(", ")
    );

    let overseer = Arc::new(build_overseer(&config, planner, store.clone()).await);
    let mut state = ApiState::new(overseer.clone(), store);

    if config.rate_limit.enabled {
        let limiter = Arc::new(
            RateLimiter::new(
                Arc::new(MemoryBackend::new()),
                config.rate_limit.tiers.clone(),
            )
            .with_client_tiers(config.rate_limit.clients.clone()),
        );
        info!(
            "Rate limiting enabled; {} client(s) with assigned tiers",
            config.rate_limit.clients.len()
        );
        state = state.with_limiter(limiter.clone());

        // Periodically drop idle rate limit keys.
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                match limiter.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Purged {} idle rate limit key(s)", n),
                    Err(e) => warn!("Rate limit purge failed: {}", e),
                }
            }
        });
    } else {
        warn!("Rate limiting disabled");
    }

    let mut server = api::start_server(&config.api, state).await?;
    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            server.abort();
        }
        _ = &mut server => {
            info!("Server stopped");
        }
    }

    overseer.flush_learning().await;
    Ok(())
}

async fn run_tasks(path: &Path, command: TaskCommands) -> Result<(), Box<dyn std::error::Error>> {
    let store = TaskStore::open_file(path).await?;

    match command {
        TaskCommands::Add {
            title,
            description,
            priority,
            depends_on,
            tags,
        } => {
            let mut input = NewTask::new(title).with_priority(Priority::try_from(priority)?);
            if let Some(description) = description {
                input = input.with_description(description);
            }
            for dep in depends_on {
                input = input.depends_on(dep);
            }
            for tag in tags {
                input = input.with_tag(tag);
            }
            let task = store.create(input).await?;
            println!("{} [{}] {}", task.id, task.status, task.title);
        }
        TaskCommands::List { status } => {
            let filter = status
                .map(|s| serde_json::from_value::<TaskStatus>(serde_json::Value::String(s)))
                .transpose()?;
            let tasks = store.get_all().await;
            let tasks: Vec<_> = tasks
                .into_iter()
                .filter(|t| filter.is_none_or(|s| t.status == s))
                .collect();
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        TaskCommands::Ready => {
            for task in &store.get_ready().await {
                print_task(task);
            }
        }
        TaskCommands::Stats => {
            let stats = store.get_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        TaskCommands::Complete { id } => {
            let task = store.complete(&TaskId::new(&id)).await?;
            println!("{} [{}] {}", task.id, task.status, task.title);
        }
        TaskCommands::Delete { id } => {
            let task = store.delete(&TaskId::new(&id)).await?;
            println!("Deleted {}", task.id);
        }
        TaskCommands::Compact => {
            let kept = store.compact().await?;
            println!("Compacted log to {} record(s)", kept);
        }
    }

    Ok(())
}

fn print_task(task: &overseer::Task) {
    let priority: u8 = task.priority.into();
    if task.dependencies.is_empty() {
        println!("{} [{}] p{} {}", task.id, task.status, priority, task.title);
    } else {
        let deps: Vec<&str> = task.dependencies.iter().map(|d| d.as_str()).collect();
        println!(
            "{} [{}] p{} {} (depends on: {})",
            task.id,
            task.status,
            priority,
            task.title,
            deps.join(", ")
        );
    }
}

/// Validate a plan file without running it.
fn validate_plan(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating plan: {}", file.display());

    let response = ConfigLoader::load_plan(file)?;
    let builder = PlanBuilder::new(
        Arc::new(TemplatePlanner::new()),
        Arc::new(ToolRegistry::with_builtins()),
    );

    match builder.assemble(MissionId::new(), response, false) {
        Ok(plan) => {
            let order = plan.validate()?;
            println!(
                "Plan '{}' ({}) is valid: {} step(s), estimated cost {:.2}",
                plan.mission_type,
                plan.complexity,
                plan.len(),
                plan.estimated_cost
            );
            for id in &order {
                if let Some(step) = plan.step(id) {
                    if step.depends_on.is_empty() {
                        println!("  - {} [{}]", step.id, step.tool);
                    } else {
                        let deps: Vec<&str> = step.depends_on.iter().map(|d| d.as_str()).collect();
                        println!(
                            "  - {} [{}] (depends on: {})",
                            step.id,
                            step.tool,
                            deps.join(", ")
                        );
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Run a plan file through the full plan, execute, verify loop.
async fn run_plan(
    config: OverseerConfig,
    file: &Path,
    mission: Option<String>,
    force_failure: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = ConfigLoader::load_plan(file)?;
    let mission_type = response.mission_type.clone();
    let mission = mission.unwrap_or_else(|| {
        if response.reasoning.is_empty() {
            format!("run plan {}", file.display())
        } else {
            response.reasoning.clone()
        }
    });

    let store = open_store(config.store.path.as_deref()).await?;
    let planner = TemplatePlanner::new().with_template(response);
    let overseer = build_overseer(&config, planner, store).await;

    let mut ctx = MissionContext::new(mission).with_mission_type(mission_type);
    if force_failure {
        ctx = ctx.with_forced_failure();
    }

    let result = overseer.run(ctx).await?;
    overseer.flush_learning().await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        warn!("Mission ended in state {}", result.state);
    }
    Ok(())
}
