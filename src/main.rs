use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use quorum::config::{self, PromptTemplate, ProxySettings};
use quorum::render::BlockContent;
use quorum::repositories::{HistoryRepository, JsonHistoryRepository};
use quorum::{LlmService, ManagerOptions, RenderReconciler, SessionEvent, SessionManager};

/// Chat with several models at once from one prompt line.
#[derive(Debug, Parser)]
#[command(name = "quorum", version, about)]
struct Args {
    /// Model list (JSON: {"models": [{name, url, model, key?}]}).
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Prompt templates (JSON: {"templates": [{name, prompt}]}).
    #[arg(long, default_value = "prompts.json")]
    prompts: PathBuf,

    /// History file (defaults to the user config directory).
    #[arg(long)]
    history: Option<PathBuf>,

    /// Restore the previously saved conversation at startup.
    #[arg(long)]
    restore: bool,

    /// Proxy server as host:port for endpoint requests.
    #[arg(long)]
    proxy: Option<String>,

    /// Fail a run after this many seconds without stream activity.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print raw deltas as they arrive instead of waiting for settled panels.
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let models = config::load_models(&args.config)
        .await
        .with_context(|| format!("loading model config from {}", args.config.display()))?;
    anyhow::ensure!(
        !models.is_empty(),
        "no models configured in {}",
        args.config.display()
    );
    let templates = config::load_templates(&args.prompts).await;

    let proxy = args.proxy.map(|server| ProxySettings {
        enabled: true,
        server: Some(server),
    });
    let llm = Arc::new(LlmService::new(proxy.as_ref())?);
    let options = ManagerOptions {
        system_prompt: String::new(),
        inactivity_timeout: args.timeout.map(Duration::from_secs),
    };
    let (mut manager, mut events) = SessionManager::new(models, llm, options);
    let mut reconciler = RenderReconciler::new(manager.session_count());

    let repository = match args.history {
        Some(path) => JsonHistoryRepository::with_path(path),
        None => JsonHistoryRepository::new()?,
    };
    if args.restore {
        let histories = repository.load().await?;
        for (index, history) in histories.iter().enumerate() {
            reconciler.seed_history(index, history);
        }
        manager.restore_histories(histories);
    }

    print_models(&manager);
    println!("Type a message to send it to every enabled model; :help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim().to_owned();
                if line.is_empty() {
                    continue;
                }
                if let Some(command) = line.strip_prefix(':') {
                    if !handle_command(command, &mut manager, &mut reconciler, &repository, &templates).await? {
                        break;
                    }
                    continue;
                }
                for index in 0..manager.session_count() {
                    if manager.enabled(index) {
                        reconciler.begin_turn(index, &line);
                    }
                }
                manager.fan_out(&line).await;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(event, &manager, &mut reconciler, args.stream);
            }
        }
    }

    manager.stop_all().await;
    if let Err(e) = repository.save(&manager.export_histories()).await {
        warn!(error = %e, "failed to save conversation history");
    }
    Ok(())
}

fn print_models(manager: &SessionManager) {
    for index in 0..manager.session_count() {
        if let Some(model) = manager.model(index) {
            let state = if manager.enabled(index) { "on" } else { "off" };
            println!("  [{index}] {} ({}) [{state}]", model.name, model.model);
        }
    }
}

fn handle_event(
    event: SessionEvent,
    manager: &SessionManager,
    reconciler: &mut RenderReconciler,
    stream: bool,
) {
    let name = |index: usize| {
        manager
            .model(index)
            .map(|m| m.name)
            .unwrap_or_else(|| format!("#{index}"))
    };
    match event {
        SessionEvent::RunStarted { session } => {
            if stream {
                println!("── {} ──", name(session));
            }
        }
        SessionEvent::Delta { session, text } => {
            if stream {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            reconciler.apply_delta(session, &text);
        }
        SessionEvent::TurnFinished { session, text } => {
            if stream {
                println!();
            }
            if let Some(block) = reconciler.finish_turn(session, &text) {
                // In raw streaming mode the plain text is already on screen;
                // only the rich replacement is worth printing again.
                let body = match &block.content {
                    BlockContent::Rich(html) => html.as_str(),
                    BlockContent::Plain(_) if stream => return,
                    BlockContent::Plain(text) => text.as_str(),
                    BlockContent::Error(message) => message.as_str(),
                };
                println!("── {} ──\n{body}", name(session));
            }
        }
        SessionEvent::Error { session, message } => match session {
            Some(index) => {
                reconciler.fail_turn(index, &message);
                eprintln!("── {} error ──\n{message}", name(index));
            }
            None => eprintln!("error: {message}"),
        },
    }
}

async fn handle_command(
    command: &str,
    manager: &mut SessionManager,
    reconciler: &mut RenderReconciler,
    repository: &JsonHistoryRepository,
    templates: &[PromptTemplate],
) -> anyhow::Result<bool> {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") | Some("q") => return Ok(false),
        Some("clear") => {
            manager.clear_histories().await;
            reconciler.clear_all();
            repository.clear().await?;
            println!("cleared all conversations");
        }
        Some("on") | Some("off") => {
            let enabled = command.starts_with("on");
            match parts.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(index) if index < manager.session_count() => {
                    manager.set_enabled(index, enabled);
                    print_models(manager);
                }
                _ => println!("usage: :on <index> / :off <index>"),
            }
        }
        Some("template") => match parts.next() {
            Some(name) => {
                if let Some(template) = templates.iter().find(|t| t.name == name) {
                    manager.set_system_prompt(template.prompt.clone());
                    println!("using template '{name}'");
                } else {
                    println!("no template named '{name}'");
                }
            }
            None => {
                manager.set_system_prompt(String::new());
                for template in templates {
                    println!("  {}", template.name);
                }
                println!("system prompt cleared; :template <name> to select one");
            }
        },
        Some("save") => {
            repository.save(&manager.export_histories()).await?;
            println!("saved to {}", repository.storage_path());
        }
        Some("models") => print_models(manager),
        _ => {
            println!(":quit  :clear  :on <n>  :off <n>  :template [name]  :save  :models");
        }
    }
    Ok(true)
}
