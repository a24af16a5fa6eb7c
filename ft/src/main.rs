//! famtasks - shared family task list
//!
//! CLI entry point: runs the HTTP API or acts on the task store directly.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info};

use famtasks::cli::{Cli, Command, OutputFormat, Scope, generate_after_help};
use famtasks::config::Config;
use famtasks::dates::{DateResolver, iso_millis};
use famtasks::domain::{ManualTask, Participants, RequestContext, Task, resolve_reference};
use famtasks::extract::Extractor;
use famtasks::ingest::IngestService;
use famtasks::llm::{LlmClient, OpenAIClient, create_client};
use famtasks::prompts::PromptLoader;
use famtasks::server::{self, AppState};
use famtasks::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("famtasks")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("famtasks.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(store_dir = %config.storage.store_dir, model = %config.llm.model, "famtasks loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { bind } => cmd_serve(&config, bind).await,
        Command::Add { text, scope } => cmd_add(&config, &text, &scope).await,
        Command::New {
            title,
            participants,
            due,
            scope,
        } => cmd_new(&config, title, participants, due, &scope).await,
        Command::List { scope, format } => cmd_list(&config, &scope, format).await,
        Command::Done { id, scope } => cmd_done(&config, &id, &scope).await,
        Command::Rm { id, scope } => cmd_rm(&config, &id, &scope).await,
        Command::When { phrase, now } => cmd_when(&config, &phrase, now.as_deref()),
        Command::Member { user, family } => cmd_member(&config, &user, &family).await,
        Command::Watch { scope, interval } => cmd_watch(&config, &scope, interval).await,
    }
}

/// Assemble the ingest service over the configured store
///
/// Commands that never reach the provider run without an API key.
fn open_service(config: &Config, needs_llm: bool) -> Result<IngestService> {
    debug!(needs_llm, "open_service: called");
    let llm: Arc<dyn LlmClient> = if needs_llm {
        config.validate()?;
        create_client(&config.llm)?
    } else {
        Arc::new(OpenAIClient::new(
            &config.llm.base_url,
            config.llm.get_api_key().unwrap_or_default(),
            &config.llm.model,
            config.llm.max_tokens,
            Duration::from_millis(config.llm.timeout_ms),
        )?)
    };

    let prompts = match &config.prompts.dir {
        Some(dir) => PromptLoader::new(dir),
        None => PromptLoader::embedded_only(),
    };
    let extractor = Extractor::new(llm, prompts).with_max_tokens(config.llm.max_tokens);
    let resolver = DateResolver::from_config(&config.dates)?;

    let store = StateManager::spawn(&config.storage.store_dir)?;

    Ok(IngestService::new(extractor, resolver, Arc::new(store)))
}

async fn context(service: &IngestService, scope: &Scope) -> Result<RequestContext> {
    Ok(service
        .resolve_context(scope.family.as_deref(), scope.user.as_deref())
        .await?)
}

/// Turn an ID prefix or slug fragment into a full task ID
async fn resolve_id(service: &IngestService, ctx: &RequestContext, reference: &str) -> Result<String> {
    debug!(%reference, "resolve_id: called");
    let tasks = service.list(ctx).await?;
    match resolve_reference(reference, tasks.iter().map(|t| t.id.as_str())) {
        Ok(Some(id)) => Ok(id),
        // Let the service report it as not found
        Ok(None) => Ok(reference.to_string()),
        Err(candidates) => Err(eyre::eyre!(
            "'{}' matches several tasks: {}",
            reference,
            candidates.join(", ")
        )),
    }
}

fn print_task(task: &Task, now: DateTime<Utc>) {
    let due = match (&task.due_iso, &task.due_text_raw) {
        (Some(iso), _) if task.is_overdue(now) => format!(" due {}", iso.red()),
        (Some(iso), _) => format!(" due {}", iso.yellow()),
        (None, Some(raw)) => format!(" ({})", raw.dimmed()),
        (None, None) => String::new(),
    };
    let participants = if task.participants.is_empty() {
        String::new()
    } else {
        format!(" [{}]", task.participants.join(", "))
    };
    println!("{} {}{}{}", task.id.cyan(), task.title.bold(), participants, due);
}

async fn cmd_serve(config: &Config, bind: Option<String>) -> Result<()> {
    debug!(?bind, "cmd_serve: called");
    let service = open_service(config, true)?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    println!("{} famtasks listening on {}", "✓".green(), bind.cyan());
    server::serve(&bind, Arc::new(AppState::new(service))).await
}

async fn cmd_add(config: &Config, text: &str, scope: &Scope) -> Result<()> {
    debug!(%text, "cmd_add: called");
    let service = open_service(config, true)?;
    let ctx = context(&service, scope).await?;
    let task = service.ingest(&ctx, text).await?;
    print!("{} ", "✓".green());
    print_task(&task, Utc::now());
    Ok(())
}

async fn cmd_new(
    config: &Config,
    title: String,
    participants: Option<String>,
    due: Option<String>,
    scope: &Scope,
) -> Result<()> {
    debug!(%title, "cmd_new: called");
    let service = open_service(config, false)?;
    let ctx = context(&service, scope).await?;
    let input = ManualTask {
        title,
        participants: participants.map(Participants::Text).unwrap_or_default(),
        due,
    };
    let task = service.create_manual(&ctx, input).await?;
    print!("{} ", "✓".green());
    print_task(&task, Utc::now());
    Ok(())
}

async fn cmd_list(config: &Config, scope: &Scope, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_list: called");
    let service = open_service(config, false)?;
    let ctx = context(&service, scope).await?;
    let tasks = service.list(&ctx).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks for {}", ctx.group_key);
            } else {
                let now = Utc::now();
                for task in &tasks {
                    print_task(task, now);
                }
            }
        }
    }
    Ok(())
}

async fn cmd_done(config: &Config, reference: &str, scope: &Scope) -> Result<()> {
    debug!(%reference, "cmd_done: called");
    let service = open_service(config, false)?;
    let ctx = context(&service, scope).await?;
    let id = resolve_id(&service, &ctx, reference).await?;
    let task = service.complete(&ctx, &id).await?;
    println!("{} Done: {}", "✓".green(), task.title);
    Ok(())
}

async fn cmd_rm(config: &Config, reference: &str, scope: &Scope) -> Result<()> {
    debug!(%reference, "cmd_rm: called");
    let service = open_service(config, false)?;
    let ctx = context(&service, scope).await?;
    let id = resolve_id(&service, &ctx, reference).await?;
    let task = service.delete(&ctx, &id).await?;
    println!("{} Deleted: {}", "✓".green(), task.id);
    Ok(())
}

fn cmd_when(config: &Config, phrase: &str, now: Option<&str>) -> Result<()> {
    debug!(%phrase, ?now, "cmd_when: called");
    let resolver = DateResolver::from_config(&config.dates)?;
    let now = match now {
        Some(text) => resolver
            .parse_datetime(text)
            .ok_or_else(|| eyre::eyre!("invalid --now value: '{}'", text))?,
        None => Utc::now(),
    };

    match resolver.resolve(phrase, now) {
        Some(resolved) => println!("{}", resolved.iso),
        None => {
            println!("{} could not resolve '{}' (reference {})", "✗".red(), phrase, iso_millis(&now));
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn cmd_member(config: &Config, user: &str, family: &str) -> Result<()> {
    debug!(%user, %family, "cmd_member: called");
    let service = open_service(config, false)?;
    let member = service.join(user, family).await?;
    println!("{} {} belongs to {}", "✓".green(), member.user_id.cyan(), member.group_key.cyan());
    Ok(())
}

/// Print the list on every change, polling for writes made by other processes
async fn cmd_watch(config: &Config, scope: &Scope, interval: u64) -> Result<()> {
    debug!(interval, "cmd_watch: called");
    let service = open_service(config, false)?;
    let ctx = context(&service, scope).await?;
    let mut snapshots = service.subscribe(&ctx);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut last: Option<Vec<String>> = None;

    loop {
        let tasks = tokio::select! {
            snapshot = snapshots.next() => match snapshot {
                Some(tasks) => tasks?,
                None => break,
            },
            _ = ticker.tick() => service.list(&ctx).await?,
            _ = tokio::signal::ctrl_c() => break,
        };

        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        if last.as_ref() == Some(&ids) {
            continue;
        }
        last = Some(ids);

        println!("{} {} task(s) for {}", "●".blue(), tasks.len(), ctx.group_key.cyan());
        let now = Utc::now();
        for task in &tasks {
            print_task(task, now);
        }
    }

    info!("watch stopped");
    Ok(())
}
