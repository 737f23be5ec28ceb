//! relay - terminal chat front end for agent backends
//!
//! - `@alias` / `/alias` mentions route turns to agents, tools and notebooks
//! - Streams the agent's answer as it is reconstructed
//! - Answers human-in-the-loop questions inline and resumes the turn

use anyhow::Result;
use clap::{Parser, Subcommand};

use relay_core::{paths, ClientConfig, MentionParser, MentionRegistry};

mod session;

/// relay - chat with an agent backend from the terminal
#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Terminal chat front end for agent backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session (default)
    Chat {
        /// Send fresh turns to the agent endpoint instead of the chat endpoint
        #[arg(long)]
        agent: bool,

        /// Continue an existing conversation
        #[arg(long)]
        thread: Option<String>,
    },

    /// Parse a message and print the routing directives as JSON
    Parse {
        /// Message text, e.g. "@presse Schreibe einen Text"
        text: String,
    },
}

fn init_logging() -> Result<()> {
    // Log to file; stdout belongs to the conversation.
    let log_dir = paths::ensure_logs_dir()?;
    let log_file = std::fs::File::create(log_dir.join("relay.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("Failed to set up logging: {}, continuing without log file", e);
    }

    let config = ClientConfig::load()?;

    match cli.command {
        Some(Commands::Parse { text }) => {
            let mut registry = MentionRegistry::with_builtins();
            registry.register_dynamic(config.dynamic_mentionables());
            let parsed = MentionParser::new(&registry, &config.default_agent_id).parse(&text);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Some(Commands::Chat { agent, thread }) => {
            let mut session = session::Session::new(&config, agent, thread)?;
            session.run().await?;
        }
        None => {
            let mut session = session::Session::new(&config, false, None)?;
            session.run().await?;
        }
    }

    Ok(())
}
