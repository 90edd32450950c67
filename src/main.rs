//! Command-line front end: discover tools, check a setup, scaffold tools, chat.
//!
//! ```sh
//! agent-eval list-tools --tools-dir tools
//! agent-eval validate
//! agent-eval create-tool weather_lookup --output-dir tools
//! agent-eval chat --message "What's the weather in Paris?" --policy read-only
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agent_eval::agent::{AgentConfig, AgentEvent, AgentLoop, EventHandler, LoggingHandler};
use agent_eval::approval::{ApprovalHandler, ApprovalMode, ApprovalRequest};
use agent_eval::llm::ProviderBuilder;
use agent_eval::tool::builtin::builtin_source;
use agent_eval::tool::command::ToolManifest;
use agent_eval::tool::{DiscoveryReport, ManifestDirSource, ToolRegistry, ToolSource};

#[derive(Parser)]
#[command(name = "agent-eval", version, about = "Tool-calling agent with plugin discovery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all discovered tools
    ListTools {
        /// Directory of JSON tool manifests
        #[arg(long, default_value = "tools")]
        tools_dir: PathBuf,
    },
    /// Validate setup and show configuration
    Validate {
        #[arg(long, default_value = "tools")]
        tools_dir: PathBuf,
    },
    /// Create a new tool manifest template
    CreateTool {
        /// Name of the tool (letters, digits and underscores)
        name: String,
        #[arg(short, long, default_value = "tools")]
        output_dir: PathBuf,
    },
    /// Talk to the agent
    Chat {
        #[arg(long, default_value = "tools")]
        tools_dir: PathBuf,
        /// Send one message and exit instead of starting a session
        #[arg(short, long)]
        message: Option<String>,
        /// Tool round-trips allowed per message
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Approval policy: auto, read-only or ask
        #[arg(long)]
        policy: Option<ApprovalMode>,
        /// Write the conversation snapshot to this file on exit
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_eval=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::ListTools { tools_dir } => list_tools(&tools_dir),
        Command::Validate { tools_dir } => validate(&tools_dir),
        Command::CreateTool { name, output_dir } => create_tool(&name, &output_dir),
        Command::Chat {
            tools_dir,
            message,
            max_iterations,
            policy,
            save,
        } => {
            let mut config = AgentConfig::from_env()?;
            if let Some(max_iterations) = max_iterations {
                config.max_iterations = max_iterations;
            }
            if let Some(policy) = policy {
                config.approval.mode = policy;
            }
            config.validate()?;
            chat(config, &tools_dir, message, save.as_deref()).await
        }
    }
}

fn discover(tools_dir: &Path, interactive: bool) -> DiscoveryReport {
    let sources: Vec<Box<dyn ToolSource>> = vec![
        Box::new(builtin_source(interactive)),
        Box::new(ManifestDirSource::new(tools_dir)),
    ];
    ToolRegistry::discover(&sources)
}

fn list_tools(tools_dir: &Path) -> anyhow::Result<ExitCode> {
    let report = discover(tools_dir, false);
    if report.registry.is_empty() {
        println!("No tools found.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut names = report.registry.names();
    names.sort_unstable();
    println!("Found {} tools:", names.len());
    for name in names {
        println!("  • {name}");
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(tools_dir: &Path) -> anyhow::Result<ExitCode> {
    println!("Validating agent-eval setup...\n");
    let mut ok = true;

    match AgentConfig::from_env() {
        Ok(config) => {
            println!("✓ Configuration");
            println!("  model: {}", config.model.name);
            println!("  max iterations: {}", config.max_iterations);
            println!("  provider attempts: {}", config.retry.max_attempts);
            println!("  provider timeout: {:?}", config.provider_timeout);
            println!("  tool timeout: {:?}", config.tool_timeout);
            println!("  approval: {:?}", config.approval.mode);
        }
        Err(e) => {
            ok = false;
            println!("✗ Configuration: {e}");
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok() {
        println!("✓ OPENAI_API_KEY set");
    } else {
        println!("⚠ OPENAI_API_KEY not set");
    }

    println!("\nDiscovering tools in {}...", tools_dir.display());
    let report = discover(tools_dir, false);
    if report.registry.is_empty() {
        println!("⚠ No tools found");
    } else {
        println!("✓ Found {} tools", report.registry.len());
        for tool in &report.registry {
            let access = if tool.schema().read_only { "read-only" } else { "side effects" };
            println!("  • {} ({access}) from {}", tool.name(), tool.origin());
        }
    }
    for error in &report.errors {
        ok = false;
        println!("✗ {error}");
    }

    if ok {
        println!("\nValidation complete!");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("\nValidation found problems.");
        Ok(ExitCode::FAILURE)
    }
}

fn create_tool(name: &str, output_dir: &Path) -> anyhow::Result<ExitCode> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("tool name must be alphanumeric (underscores allowed)");
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let path = output_dir.join(format!("{name}.json"));

    if path.exists() && !confirm(&format!("File {} already exists. Overwrite?", path.display()))? {
        println!("Tool creation cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let manifest = ToolManifest::template(name);
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("writing {}", path.display()))?;

    println!("✓ Created tool manifest: {}", path.display());
    println!("\nNext steps:");
    println!("1. Write the command it runs ({})", manifest.command);
    println!("2. Update the description and parameters");
    println!("3. Mark it \"read_only\": true if it has no side effects");
    println!("4. The tool is discovered automatically from {}", output_dir.display());
    Ok(ExitCode::SUCCESS)
}

async fn chat(
    config: AgentConfig,
    tools_dir: &Path,
    message: Option<String>,
    save: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let report = discover(tools_dir, true);
    for error in &report.errors {
        tracing::warn!(%error, "Tool excluded");
    }

    let provider = ProviderBuilder::new()
        .with_timeout(config.provider_timeout)
        .build_openai()
        .context("creating provider (set OPENAI_API_KEY)")?;

    let config = AgentConfig {
        // ask_user and the approval prompt share stdin
        parallel_tool_calls: false,
        ..config
    };
    let mut agent = AgentLoop::new(provider, Arc::new(report.registry), config)
        .with_approver(Arc::new(StdinApprover))
        .with_event_handler(Arc::new(ConsoleEvents));

    let mut status = ExitCode::SUCCESS;
    match message {
        Some(message) => {
            if !respond(&mut agent, message).await {
                status = ExitCode::FAILURE;
            }
        }
        None => {
            println!("Type a message, or 'exit' to quit.");
            loop {
                print!("\nYou: ");
                io::stdout().flush()?;
                let Some(line) = read_line()? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if matches!(line, "exit" | "quit") {
                    break;
                }
                respond(&mut agent, line.to_string()).await;
            }
        }
    }

    let metrics = agent.metrics();
    println!(
        "\n[{} iterations, {} tool calls, {} tokens, {} errors, {:.1}s]",
        metrics.iteration_count,
        metrics.tool_call_count,
        metrics.total_tokens,
        metrics.error_count,
        metrics.elapsed.as_secs_f64()
    );

    if let Some(path) = save {
        let snapshot = agent.conversation().snapshot();
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Conversation saved to {}", path.display());
    }

    Ok(status)
}

async fn respond(agent: &mut AgentLoop, message: String) -> bool {
    match agent.submit(message).await {
        Ok(outcome) => {
            println!("\nAgent: {}", outcome.text);
            if !outcome.tools_used.is_empty() {
                println!("(tools used: {})", outcome.tools_used.join(", "));
            }
            true
        }
        Err(e) => {
            eprintln!("\nError: {e}");
            false
        }
    }
}

fn read_line() -> io::Result<Option<String>> {
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    Ok(read_line()?.is_some_and(|answer| {
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }))
}

/// Asks on the terminal before running a tool.
struct StdinApprover;

impl ApprovalHandler for StdinApprover {
    fn request_approval(&self, request: &ApprovalRequest<'_>) -> bool {
        let prompt = format!(
            "\nThe agent wants to run '{}' with {}. Allow?",
            request.tool_name, request.arguments
        );
        tokio::task::block_in_place(|| confirm(&prompt)).unwrap_or(false)
    }
}

/// Prints tool activity, and logs everything else.
struct ConsoleEvents;

impl EventHandler for ConsoleEvents {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::ToolCallProposed { call } => {
                println!("→ {}({})", call.name, call.arguments);
            }
            AgentEvent::ToolResult {
                tool_name,
                outcome: Err(failure),
                ..
            } => println!("✗ {tool_name}: {failure}"),
            AgentEvent::ToolResult { tool_name, .. } => println!("✓ {tool_name}"),
            _ => {}
        }
        LoggingHandler.on_event(event);
    }
}
