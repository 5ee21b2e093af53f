use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbor_core::config::{AppConfig, ModelConfig, ModelRole};
use arbor_core::event::{EventBus, TraceEvent};
use arbor_core::state::{AgentState, ToolResult};
use arbor_core::types::RunId;

use arbor_agent::{AgentGraphBuilder, BoundModel, Decider, TraceLogger, Workflow};
use arbor_llm::RetryingClient;
use arbor_tools::builtin::{analysis_registry, arithmetic_registry, research_registry};
use arbor_tools::ToolRegistry;

const ROLES: [ModelRole; 4] = [
    ModelRole::Planning,
    ModelRole::ToolCaller,
    ModelRole::Reasoning,
    ModelRole::Answer,
];

#[derive(Parser)]
#[command(name = "arbor", version, about = "Graph orchestration engine for tool-using agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "arbor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single agent graph on an objective
    Run {
        /// The objective (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        objective: Vec<String>,
        /// Override the configured step budget
        #[arg(long)]
        max_steps: Option<u32>,
        /// Node that chooses tool calls
        #[arg(long, value_enum, default_value = "step-executor")]
        decider: DeciderArg,
        /// Draft a plan before the first tool call
        #[arg(long)]
        planner: bool,
        /// Tools offered to the agent
        #[arg(long, value_enum, default_value = "all")]
        toolset: Toolset,
        /// Only print the final answer
        #[arg(long, short)]
        quiet: bool,
    },
    /// Run the research → analysis → synthesis workflow
    Workflow {
        /// The user request (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        request: Vec<String>,
        #[arg(long, short)]
        quiet: bool,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeciderArg {
    ToolCaller,
    StepExecutor,
}

impl From<DeciderArg> for Decider {
    fn from(arg: DeciderArg) -> Self {
        match arg {
            DeciderArg::ToolCaller => Decider::ToolCaller,
            DeciderArg::StepExecutor => Decider::StepExecutor,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toolset {
    Arithmetic,
    Research,
    Analysis,
    All,
}

impl Toolset {
    fn registry(self) -> ToolRegistry {
        match self {
            Self::Arithmetic => arithmetic_registry(),
            Self::Research => research_registry(),
            Self::Analysis => analysis_registry(),
            Self::All => ToolRegistry::with_builtins(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbor=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "arbor", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            objective,
            max_steps,
            decider,
            planner,
            toolset,
            quiet,
        } => {
            let objective = join_or_stdin(objective);
            if objective.trim().is_empty() {
                anyhow::bail!("objective is empty");
            }
            run_agent(&config, &objective, max_steps, decider.into(), planner, toolset, quiet).await?;
        }
        Commands::Workflow { request, quiet } => {
            let request = join_or_stdin(request);
            if request.trim().is_empty() {
                anyhow::bail!("request is empty");
            }
            run_workflow(&config, &request, quiet).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".arbor").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    eprintln!("Warning: No config file found. Set OPEN_ROUTER_API_KEY or create arbor.toml");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let model = if let Ok(key) = std::env::var("OPEN_ROUTER_API_KEY") {
        ModelConfig {
            api_key: Some(key),
            ..ModelConfig::new("openrouter", "openai/gpt-4o-mini")
        }
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        ModelConfig {
            api_key: Some(key),
            ..ModelConfig::new("openai", "gpt-4o-mini")
        }
    } else {
        // Default to Ollama (local)
        ModelConfig::new("ollama", "llama3.2")
    };

    AppConfig {
        agent: Default::default(),
        model,
        fallback_models: vec![],
        roles: Default::default(),
        log: None,
        workflow: Default::default(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn join_or_stdin(words: Vec<String>) -> String {
    let text = words.join(" ");
    if !text.is_empty() {
        return text;
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The default model with retry and fallbacks, plus one bound model per
/// explicitly configured role.
fn bind_models(config: &AppConfig) -> anyhow::Result<(BoundModel, Vec<(ModelRole, BoundModel)>)> {
    let default = BoundModel::new(arbor_llm::create_retrying_client(config)?, config.model.clone());
    let mut roles = Vec::new();
    for role in ROLES {
        if let Some(model) = config.roles.get(role) {
            let client = Arc::new(RetryingClient::new(
                arbor_llm::create_client(model)?,
                vec![],
                model.retry.clone().unwrap_or_default(),
            ));
            roles.push((role, BoundModel::new(client, model.clone())));
        }
    }
    Ok((default, roles))
}

/// Background consumers of one run's trace: the console printer and, when
/// enabled, the JSONL logger.
struct TraceSinks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TraceSinks {
    fn start(config: &AppConfig, bus: &Arc<EventBus>, run_id: &RunId, quiet: bool) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if !quiet {
            handles.push(tokio::spawn(print_events(bus.subscribe(), cancel.clone())));
        }
        if let Some(log) = config.log.as_ref().filter(|l| l.enabled) {
            let logger = TraceLogger::new(log.dir());
            eprintln!("[trace: {}]", logger.path_for(run_id).display());
            handles.push(logger.spawn(bus, run_id.clone(), cancel.clone()));
        }
        Self { cancel, handles }
    }

    async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.await.ok();
        }
    }
}

async fn print_events(
    mut rx: tokio::sync::broadcast::Receiver<TraceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            result = rx.recv() => match result {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };
        match event {
            TraceEvent::StepCompleted { node, step_index, delta, .. } => {
                let decision = delta
                    .decision
                    .map(|d| format!(" -> {} ({})", d.action, truncate(&d.reason, 80)))
                    .unwrap_or_default();
                eprintln!("[{:>2}] {}{}", step_index, node, decision);
                for err in &delta.errors {
                    eprintln!("     ! {:?}: {}", err.kind, truncate(&err.message, 160));
                }
            }
            TraceEvent::ToolFinished { name, result, .. } => match result {
                ToolResult::Ok { data, duration_ms } => {
                    eprintln!("     [{}: ok {}ms] {}", name, duration_ms, truncate(&data.to_string(), 160));
                }
                ToolResult::Failed { code, message, .. } => {
                    eprintln!("     [{}: {}] {}", name, code, truncate(&message, 160));
                }
            },
            TraceEvent::StageCompleted { stage, steps, total_tokens, tool_calls, .. } => {
                eprintln!(
                    "[stage {}: {} steps, {} tool calls, {} tokens]",
                    stage, steps, tool_calls, total_tokens
                );
            }
            TraceEvent::RunStarted { .. } | TraceEvent::ToolStarted { .. } | TraceEvent::RunFinished { .. } => {}
        }
    }
}

async fn run_agent(
    config: &AppConfig,
    objective: &str,
    max_steps: Option<u32>,
    decider: Decider,
    planner: bool,
    toolset: Toolset,
    quiet: bool,
) -> anyhow::Result<()> {
    let (model, roles) = bind_models(config)?;
    let event_bus = Arc::new(EventBus::default());
    let tools = toolset.registry().with_timeout_secs(config.agent.tool_timeout_secs);

    let mut builder = AgentGraphBuilder::new("agent")
        .with_model(model)
        .with_tools(Arc::new(tools))
        .with_decider(decider)
        .with_planner(planner)
        .with_tool_choice(config.agent.tool_choice)
        .with_recursion_limit(config.agent.recursion_limit)
        .with_event_bus(event_bus.clone());
    for (role, bound) in roles {
        builder = builder.with_role_model(role, bound);
    }
    let engine = builder.build()?;

    let run_id = RunId::new();
    let state = engine
        .initial_state(objective, vec![], max_steps.unwrap_or(config.agent.max_steps))
        .with_run_id(run_id.clone());

    let sinks = TraceSinks::start(config, &event_bus, &run_id, quiet);
    let result = engine.invoke(state).await;
    sinks.stop().await;

    let state = result?;
    println!("{}", state.last_assistant_text().unwrap_or_default());
    if !quiet {
        report(&state);
    }
    Ok(())
}

async fn run_workflow(config: &AppConfig, request: &str, quiet: bool) -> anyhow::Result<()> {
    let (model, roles) = bind_models(config)?;
    let event_bus = Arc::new(EventBus::default());

    let mut builder = Workflow::builder(model)
        .with_config(config.workflow.clone())
        .with_recursion_limit(config.agent.recursion_limit)
        .with_event_bus(event_bus.clone());
    for (role, bound) in roles {
        builder = builder.with_role_model(role, bound);
    }
    let workflow = builder.build()?;

    let run_id = RunId::new();
    let sinks = TraceSinks::start(config, &event_bus, &run_id, quiet);
    let result = workflow.run_with_id(request, run_id).await;
    sinks.stop().await;

    let outcome = result?;
    println!("{}", outcome.answer);
    if !quiet {
        eprintln!(
            "\n[done: {} tokens, {} errors]",
            outcome.total_tokens,
            outcome.errors.len()
        );
        for err in &outcome.errors {
            eprintln!("  {:?}: {}", err.kind, err.message);
        }
    }
    Ok(())
}

fn report(state: &AgentState) {
    eprintln!(
        "\n[done: {} steps, {} tool calls, {} tokens, {} errors]",
        state.step_count,
        state.tool_history.len(),
        state.total_tokens,
        state.errors.len()
    );
    for err in &state.errors {
        eprintln!("  {:?}: {}", err.kind, err.message);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
