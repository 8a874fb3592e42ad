mod chat_client;
mod cli;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::{Result, bail};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use crate::chat_client::{ChatClient, DEFAULT_ENDPOINT};
use crate::cli::chat::{ChatContext, ChatWidget, Transcript};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base URL of the chat server; messages are posted to `<endpoint>/chat`
    #[arg(long, env = "CHAT_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Send a single message, print the reply and exit
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat {
        /// Send a single message, print the reply and exit
        #[arg(short, long)]
        input: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let (input, verbose) = match cli.command {
        Some(Commands::Chat { input, verbose }) => (input, verbose || cli.verbose),
        None => (cli.input, cli.verbose),
    };

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Logs go to stderr so they stay out of the transcript.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let endpoint = match parse_endpoint(&cli.endpoint) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            eprintln!("Invalid chat endpoint: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let client = ChatClient::new(&endpoint)?;
    info!("Starting chat widget against {}", client.chat_url());

    let widget = ChatWidget::new(Transcript::new(Box::new(io::stdout())), Arc::new(client));

    let mut chat_context = ChatContext::new(Box::new(io::stdout()), input, widget);
    chat_context.run().await
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported scheme '{}', expected http or https", url.scheme());
    }
    if url.query().is_some() || url.fragment().is_some() {
        bail!("endpoint must not carry a query or fragment");
    }
    Ok(url)
}
