//! mesh-agent CLI
//!
//! Run one task, chat in a REPL, serve an agent from its mailbox, send
//! messages between agents, and inspect knowledge files and the journal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mesh_agent::agent::{load_agent_configs, Agent, AgentConfig, AgentRuntime};
use mesh_agent::config::Config;
use mesh_agent::events::AgentEvent;
use mesh_agent::knowledge::KnowledgeIndex;
use mesh_agent::mailbox::{CommandInterceptor, Mailbox, MailboxService, WatchBackend};
use mesh_agent::provider::{DecisionProvider, ProviderClient, ProviderConfig};
use mesh_agent::telemetry::Telemetry;
use mesh_agent::tool::truncate;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mesh-agent")]
#[command(about = "mesh-agent - knowledge-driven agents that call tools and each other", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: mesh_agent.yaml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Working directory for agents and relative paths
    #[arg(short = 'd', long, default_value = ".", global = true)]
    working_dir: PathBuf,

    /// Model to use, overrides the config file
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Provider preset: openrouter, openai, deepseek, moonshot
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Custom OpenAI-compatible endpoint, e.g. http://localhost:1234/v1
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Environment variable holding the API key for --base-url
    #[arg(long, default_value = "OPENAI_API_KEY", global = true)]
    api_key_env: String,

    /// OpenTelemetry collector endpoint (e.g., http://localhost:4318)
    #[arg(long, global = true)]
    otel_endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Clone)]
struct AgentArgs {
    /// Agent name; looked up in agents_dir when configured
    #[arg(short, long, default_value = "assistant")]
    name: String,

    /// Knowledge files or directories
    #[arg(short, long)]
    knowledge: Vec<PathBuf>,

    /// Round budget per task
    #[arg(long)]
    max_rounds: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task and print the answer
    Run {
        task: String,

        #[command(flatten)]
        agent: AgentArgs,

        /// Keep conversation between tasks (only matters for agent tools)
        #[arg(long)]
        stateful: bool,
    },

    /// Interactive session with a stateful agent
    Repl {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Answer requests arriving in the agent's mailbox until Ctrl-C
    Serve {
        #[command(flatten)]
        agent: AgentArgs,

        /// Mailbox watch backend, overrides the config file
        #[arg(long, value_enum)]
        backend: Option<WatchBackend>,
    },

    /// Send a message to an agent's mailbox
    Send {
        /// Recipient agent
        #[arg(long)]
        to: String,

        /// Sender mailbox replies go to
        #[arg(long, default_value = "cli")]
        from: String,

        content: String,

        /// Wait for the reply and print it
        #[arg(short, long)]
        wait: bool,
    },

    /// Manage the slash-command table used by `serve`
    Command {
        #[command(subcommand)]
        command: CommandCommands,
    },

    /// Parse knowledge files and query the index
    Knowledge {
        paths: Vec<PathBuf>,

        /// Keyword search over names, descriptions and categories
        #[arg(short, long)]
        search: Option<String>,

        /// Print the items referenced as @name in this text
        #[arg(long)]
        refs: Option<String>,

        /// Print items related to this item
        #[arg(long)]
        related: Option<String>,

        /// Heading level that declares items
        #[arg(long, default_value = "2")]
        heading_level: usize,
    },

    /// Show journal statistics
    Stats {
        /// Number of recent runs to show
        #[arg(long, default_value = "10")]
        runs: usize,
    },
}

#[derive(Subcommand)]
enum CommandCommands {
    /// Register a script as /name
    Add {
        name: String,
        script: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove /name
    Remove { name: String },
    /// List registered commands
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = if cli.working_dir.is_absolute() {
        cli.working_dir.clone()
    } else {
        std::env::current_dir()?.join(&cli.working_dir)
    }
    .canonicalize()
    .with_context(|| format!("working directory {} not found", cli.working_dir.display()))?;

    let mut config = Config::load(cli.config.as_deref(), &working_dir)?;
    config.llm = provider_config(&cli, config.llm.clone())?;
    config.telemetry.verbose |= cli.verbose;
    if cli.otel_endpoint.is_some() {
        config.telemetry.otel_endpoint = cli.otel_endpoint.clone();
    }

    match cli.command {
        Commands::Knowledge {
            paths,
            search,
            refs,
            related,
            heading_level,
        } => {
            let paths: Vec<PathBuf> = paths.iter().map(|p| config.resolve(p)).collect();
            show_knowledge(&paths, heading_level, search, refs, related);
            return Ok(());
        }
        Commands::Command { command } => return run_command_table(&config, command),
        _ => {}
    }

    let telemetry = Arc::new(Telemetry::init(&config.telemetry)?);

    match cli.command {
        Commands::Run { task, agent, stateful } => {
            let (runtime, renderer) = runtime_with_renderer(&telemetry);
            let mut agent_config = agent_config(&config, &agent)?;
            agent_config.stateful |= stateful;
            let mut agent = build_agent(agent_config, runtime)?;

            let outcome = agent.run(&task).await;
            drop(agent);
            let _ = renderer.await;

            println!("{}", outcome.to_text());
            if !outcome.is_completed() {
                anyhow::bail!("run {}", outcome.status);
            }
        }
        Commands::Repl { agent } => {
            let (runtime, _renderer) = runtime_with_renderer(&telemetry);
            let agent_config = agent_config(&config, &agent)?.with_stateful(true);
            let agent = build_agent(agent_config, runtime)?;
            run_repl(agent, &telemetry, &config.telemetry.log_dir).await?;
        }
        Commands::Serve { agent, backend } => {
            let (runtime, _renderer) = runtime_with_renderer(&telemetry);
            let agent_config = agent_config(&config, &agent)?;
            serve(&config, agent_config, runtime, backend).await?;
        }
        Commands::Send {
            to,
            from,
            content,
            wait,
        } => {
            let mailbox = Mailbox::open(config.mailbox_root(), &from)?;
            let id = mailbox.send(&to, &content).await?;
            println!("Sent {} to {}", id, to);
            if wait {
                let cancel = CancellationToken::new();
                let ctrl_c = cancel.clone();
                tokio::spawn(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    ctrl_c.cancel();
                });
                let reply = mailbox
                    .await_reply(id, config.mailbox.reply_timeout(), Duration::from_millis(200), &cancel)
                    .await?;
                println!("{}", reply.content);
            }
        }
        Commands::Stats { runs } => show_stats(&telemetry, runs)?,
        Commands::Knowledge { .. } | Commands::Command { .. } => unreachable!(),
    }

    Ok(())
}

/// Apply --provider, --base-url and --model on top of the configured provider
fn provider_config(cli: &Cli, configured: ProviderConfig) -> Result<ProviderConfig> {
    let mut provider = configured;
    if let Some(name) = &cli.provider {
        provider = ProviderConfig::preset(name)
            .with_context(|| format!("unknown provider preset '{}'", name))?;
    }
    if let Some(base_url) = &cli.base_url {
        provider = ProviderConfig::custom("Custom", base_url.clone(), cli.api_key_env.clone(), provider.default_model);
    }
    if let Some(model) = &cli.model {
        provider = provider.with_model(model.clone());
    }
    Ok(provider)
}

/// Config for the named agent: its YAML file under agents_dir, else a fresh one
fn agent_config(config: &Config, args: &AgentArgs) -> Result<AgentConfig> {
    let from_dir = config
        .agents_dir
        .as_ref()
        .map(|dir| load_agent_configs(&config.resolve(dir)))
        .and_then(|mut configs| configs.shift_remove(&args.name));

    let mut agent = match from_dir {
        Some(mut agent) => {
            agent.work_dir = config.resolve(&agent.work_dir);
            agent
        }
        None => AgentConfig::new(&args.name)
            .with_work_dir(&config.working_dir)
            .with_provider(config.llm.clone()),
    };
    for path in &args.knowledge {
        agent = agent.with_knowledge(config.resolve(path));
    }
    if let Some(max_rounds) = args.max_rounds {
        agent = agent.with_max_rounds(max_rounds);
    }
    if agent.mailbox_root.is_none() {
        agent = agent.with_mailbox_root(config.mailbox_root());
    }
    Ok(agent)
}

fn build_agent(config: AgentConfig, runtime: AgentRuntime) -> Result<Agent> {
    let provider: Arc<dyn DecisionProvider> = Arc::new(ProviderClient::new(config.provider.clone())?);
    Ok(Agent::with_runtime(config, provider, runtime)?)
}

/// Runtime wired to the journal and a console renderer for agent events.
///
/// The renderer finishes once every agent holding the sender is dropped.
fn runtime_with_renderer(telemetry: &Arc<Telemetry>) -> (AgentRuntime, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = render_event(&event) {
                eprintln!("{}", line);
            }
        }
    });
    let runtime = AgentRuntime::new()
        .with_telemetry(telemetry.clone())
        .with_events(tx);
    (runtime, renderer)
}

fn render_event(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::RunStart { agent, task, depth, .. } if *depth > 0 => {
            Some(format!("{}-> {}: {}", "  ".repeat(*depth), agent, truncate(task, 100)))
        }
        AgentEvent::KnowledgeInjected { agent, items } => {
            Some(format!("  [{}] knowledge: {}", agent, items.join(", ")))
        }
        AgentEvent::StepStart { agent, step } => Some(format!("  [{}] step: {}", agent, step)),
        AgentEvent::Thought { agent, text } => Some(format!("  [{}] {}", agent, truncate(text, 200))),
        AgentEvent::DecisionRejected { agent, round, error } => {
            Some(format!("  [{}] round {} rejected: {}", agent, round, error))
        }
        AgentEvent::ToolCallStart { agent, tool, arguments, .. } => Some(format!(
            "  [{}] {} {}",
            agent,
            tool,
            truncate(&arguments.to_string(), 120)
        )),
        AgentEvent::ToolCallEnd {
            agent,
            tool,
            output,
            is_error: true,
            ..
        } => Some(format!("  [{}] {} failed: {}", agent, tool, truncate(output, 200))),
        AgentEvent::AgentCreated { parent, child } => Some(format!("  [{}] created agent {}", parent, child)),
        AgentEvent::AgentDeleted { parent, child } => Some(format!("  [{}] deleted agent {}", parent, child)),
        AgentEvent::RunComplete {
            agent, status, rounds, ..
        } => Some(format!("  [{}] {} after {} round(s)", agent, status, rounds)),
        _ => None,
    }
}

async fn serve(
    config: &Config,
    agent_config: AgentConfig,
    runtime: AgentRuntime,
    backend: Option<WatchBackend>,
) -> Result<()> {
    let name = agent_config.name.clone();
    let work_dir = agent_config.work_dir.clone();
    let agent = build_agent(agent_config, runtime)?;

    let mut service = MailboxService::new(agent, config.mailbox_root())?
        .with_backend(backend.unwrap_or(config.mailbox.backend))
        .with_poll_interval(config.mailbox.poll_interval());
    if let Some(table) = &config.mailbox.commands_file {
        service = service.with_interceptor(CommandInterceptor::load(&work_dir, &config.resolve(table))?);
    }

    println!("Serving '{}' from {}", name, service.mailbox().dir().display());
    println!("Press Ctrl-C to stop.");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal.cancel();
    });

    let stats = service.run(shutdown).await;
    println!(
        "Stopped: {} processed, {} via commands, {} failed runs",
        stats.processed, stats.intercepted, stats.failed_runs
    );
    Ok(())
}

fn run_command_table(config: &Config, command: CommandCommands) -> Result<()> {
    let table = config
        .mailbox
        .commands_file
        .as_ref()
        .map(|p| config.resolve(p))
        .context("mailbox.commands_file is not set in the config")?;
    let mut interceptor = CommandInterceptor::load(&config.working_dir, &table)?;

    match command {
        CommandCommands::Add {
            name,
            script,
            description,
        } => {
            interceptor.register(&name, script, description)?;
            interceptor.save(&table)?;
            println!("Registered /{}", name);
        }
        CommandCommands::Remove { name } => {
            if interceptor.unregister(&name).is_some() {
                interceptor.save(&table)?;
                println!("Removed /{}", name);
            } else {
                println!("No command /{}", name);
            }
        }
        CommandCommands::List => {
            for (name, entry) in interceptor.commands() {
                println!(
                    "/{:<16} {:<40} used {} time(s)  {}",
                    name,
                    entry.script.display(),
                    entry.usage_count,
                    entry.description
                );
            }
        }
    }
    Ok(())
}

fn show_knowledge(
    paths: &[PathBuf],
    heading_level: usize,
    search: Option<String>,
    refs: Option<String>,
    related: Option<String>,
) {
    let index = KnowledgeIndex::build_with_level(paths, heading_level);
    for diagnostic in index.diagnostics() {
        eprintln!("warning: {}", diagnostic);
    }

    if let Some(keyword) = search {
        for item in index.search_by_keyword(&keyword) {
            println!("@{} [{}] {}", item.name, item.category, item.description);
        }
    } else if let Some(text) = refs {
        for name in index.detect_references(&text) {
            println!("@{}", name);
        }
    } else if let Some(name) = related {
        for item in index.get_related_items(&name) {
            println!("@{} [{}] {}", item.name, item.category, item.description);
        }
    } else {
        println!("{} items from {} file(s)", index.len(), index.files().len());
        for line in index.catalog() {
            println!("  {}", line);
        }
    }
}

fn show_stats(telemetry: &Telemetry, runs: usize) -> Result<()> {
    match telemetry.db_path() {
        Some(path) => println!("Journal: {}\n", path.display()),
        None => {
            println!("Journal disabled (telemetry.journal: false)");
            return Ok(());
        }
    }

    println!("Recent runs (last {}):", runs);
    println!("{:-<80}", "");
    let recent = telemetry.recent_runs(runs)?;
    if recent.is_empty() {
        println!("  No runs recorded.");
    }
    for run in recent {
        println!(
            "  {} | {} | {:<12} | {} | {} round(s), {} action(s)",
            &run.id[..8.min(run.id.len())],
            run.started_at,
            run.agent,
            run.status.as_deref().unwrap_or("running"),
            run.rounds.unwrap_or(0),
            run.action_count
        );
        println!("    {}", truncate(&run.task, 70));
    }

    println!("\nTool usage:");
    println!("{:-<80}", "");
    let tools = telemetry.action_stats()?;
    if tools.is_empty() {
        println!("  No actions recorded.");
    }
    for stats in tools {
        println!("  {}", stats);
    }
    Ok(())
}

fn print_repl_help() {
    println!("Commands:");
    println!("  /quit, /exit  - Exit the REPL");
    println!("  /tools        - List the agent's tools");
    println!("  /knowledge    - List indexed knowledge items");
    println!("  /history      - Show actions so far");
    println!("  /transcript   - Print the conversation");
    println!("  /stats        - Show journal statistics");
    println!("  /help         - Show this help");
}

async fn run_repl(mut agent: Agent, telemetry: &Telemetry, data_dir: &Path) -> Result<()> {
    println!("mesh-agent REPL ({})", agent.name());
    println!("Working directory: {}", agent.config().work_dir.display());
    println!("Session: {}", telemetry.session_id());
    println!();
    print_repl_help();
    println!();

    let mut rl = DefaultEditor::new()?;
    std::fs::create_dir_all(data_dir)?;
    let history_path = data_dir.join("history.txt");
    let _ = rl.load_history(&history_path);
    let prompt = format!("{}> ", agent.name());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match line {
                    "/quit" | "/exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    "/tools" => {
                        for definition in agent.registry().snapshot().definitions() {
                            println!("  {:20} {}", definition.name, truncate(&definition.description, 60));
                        }
                        continue;
                    }
                    "/knowledge" => {
                        for line in agent.knowledge().catalog() {
                            println!("  {}", line);
                        }
                        continue;
                    }
                    "/history" => {
                        for action in agent.history() {
                            let mark = if action.success { "ok" } else { "err" };
                            println!("  #{} {} [{}] {}", action.round, action.tool, mark, truncate(&action.result, 80));
                        }
                        continue;
                    }
                    "/transcript" => {
                        println!("{}", agent.transcript());
                        continue;
                    }
                    "/stats" => {
                        if let Err(e) = show_stats(telemetry, 5) {
                            eprintln!("Error: {}", e);
                        }
                        continue;
                    }
                    "/help" => {
                        print_repl_help();
                        continue;
                    }
                    _ => {}
                }

                let outcome = agent.run(line).await;
                println!("\n{}\n", outcome.to_text());
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}
