mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use config::LarkConfig;
use lark_bus::SubscriptionRegistry;
use lark_core::{Orchestrator, Persona, RetryPolicy, StaticRetriever};
use lark_provider::{LlmClient, OpenAiCompatClient, StubClient};
use lark_schema::{ConversationId, InputEvent, ResponseEvent};
use lark_store::ConversationStore;

#[derive(Parser)]
#[command(name = "lark", version, about = "LARK conversational assistant core")]
struct Cli {
    #[arg(long, help = "Path to YAML config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Interactive chat on stdin/stdout")]
    Chat {
        #[arg(long, default_value = "local", help = "Conversation ID")]
        conversation: String,
        #[arg(long, help = "Decode replies as structured commands")]
        command_mode: bool,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LarkConfig::load(path)?,
        None => LarkConfig::default(),
    };

    match cli.command {
        Commands::Validate => {
            println!(
                "Config valid. model={} api_base={} retries={}",
                config.model, config.api_base, config.max_retries
            );
            Ok(())
        }
        Commands::Chat {
            conversation,
            command_mode,
        } => run_chat(config, conversation, command_mode).await,
    }
}

async fn run_chat(config: LarkConfig, conversation: String, command_mode: bool) -> Result<()> {
    let client: Arc<dyn LlmClient> = match std::env::var(&config.api_key_env) {
        Ok(key) if !key.is_empty() => {
            Arc::new(OpenAiCompatClient::new(key, &config.api_base))
        }
        _ => {
            tracing::warn!(
                env = %config.api_key_env,
                "api key not set; using offline stub client"
            );
            Arc::new(StubClient)
        }
    };

    let persona = match &config.persona_file {
        Some(path) => Persona::from_file("lark", path)?,
        None => Persona::lark(),
    };

    let registry = SubscriptionRegistry::new();
    let mut orchestrator = Orchestrator::new(
        client,
        ConversationStore::new(),
        registry.clone(),
        persona,
        &config.model,
    )
    .with_retry_policy(RetryPolicy {
        max_retries: config.max_retries,
        backoff: Duration::from_millis(config.backoff_ms),
    });
    if !config.snippets.is_empty() {
        orchestrator =
            orchestrator.with_retriever(Arc::new(StaticRetriever::new(config.snippets.clone())));
    }
    let orchestrator = Arc::new(orchestrator);

    let id = ConversationId::new(conversation);
    let (_handle, mut responses) = registry.subscribe_channel(&id);
    tokio::spawn(async move {
        while let Some(event) = responses.recv().await {
            match event {
                ResponseEvent::Reply { content, command } => match command {
                    Some(cmd) => println!("lark[{:?}]> {content}", cmd.action),
                    None => println!("lark> {content}"),
                },
                ResponseEvent::Failed { error } => eprintln!("error: {error}"),
            }
        }
    });

    println!("LARK ready. Type your message, /quit to exit.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }
        let mut event = InputEvent::text(id.clone(), input);
        if command_mode {
            event = event.with_command_decoding();
        }
        orchestrator.receive_input(event).await;
    }

    orchestrator.close(&id).await;
    Ok(())
}
