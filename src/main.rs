mod ui;

use clap::Parser;
use courier_assist::config::{
    app_dir, DEFAULT_ENDPOINT, DEFAULT_SESSION_COOKIE, DEFAULT_SUPPORT_PHONE,
};
use courier_assist::store::default_store_path;
use courier_assist::{AssistantClient, ClientConfig, FileStore, TurnOutcome};
use futures::StreamExt;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "courier-assist", about = "Chat with the courier booking assistant")]
struct Cli {
    /// Base URL of the booking site
    #[arg(long, env = "ASSIST_BASE_URL")]
    base_url: String,

    /// Path of the streaming chat endpoint
    #[arg(long, env = "ASSIST_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Phone number offered when the assistant is unreachable
    #[arg(long, env = "ASSIST_SUPPORT_PHONE", default_value = DEFAULT_SUPPORT_PHONE)]
    support_phone: String,

    /// Cookie name that identifies an existing site session
    #[arg(long, env = "ASSIST_SESSION_COOKIE", default_value = DEFAULT_SESSION_COOKIE)]
    session_cookie: String,

    /// JSON file holding `session_id` and `csrf_token`
    #[arg(long, env = "ASSIST_STORE")]
    store: Option<PathBuf>,

    /// Log file for interactive mode
    #[arg(long, env = "ASSIST_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Send a single message, print the reply and exit
    #[arg(short, long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = ClientConfig::new(cli.base_url)
        .with_endpoint(cli.endpoint)
        .with_support_phone(cli.support_phone)
        .with_session_cookie(cli.session_cookie);
    let store = FileStore::new(cli.store.unwrap_or_else(default_store_path));
    tracing::info!(store = %store.path().display(), "starting assistant client");

    let client = Arc::new(AssistantClient::builder(config).store(store).build()?);

    match cli.message {
        Some(text) => run_once(client, text).await,
        None => ui::run_tui(client),
    }
}

fn init_logging(cli: &Cli) -> MainResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cli.message.is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    // The terminal UI owns stdout and stderr, so log to a file.
    let path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| app_dir().join("client.log"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

async fn run_once(client: Arc<AssistantClient>, text: String) -> MainResult<()> {
    let mut updates = client.subscribe();
    let mut turn = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send_message(&text).await }
    });

    let mut stdout = std::io::stdout();
    let mut printed = 0;
    let result = loop {
        tokio::select! {
            result = &mut turn => break result?,
            Some(state) = updates.next() => {
                if let Some(active) = state.active_message() {
                    if let Some(delta) = active.content.get(printed..) {
                        write!(stdout, "{}", delta)?;
                        stdout.flush()?;
                        printed = active.content.len();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => client.cancel(),
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            // The assistant bubble already holds the user-facing text.
            if let Some(last) = client.messages().last() {
                writeln!(stdout, "{}", last.content.get(printed..).unwrap_or_default())?;
            }
            return Err(err.into());
        }
    };

    if outcome == TurnOutcome::Busy || outcome == TurnOutcome::EmptyInput {
        return Ok(());
    }

    let Some(reply) = client.messages().last().cloned() else {
        return Ok(());
    };
    writeln!(stdout, "{}", reply.content.get(printed..).unwrap_or_default())?;

    for call in &reply.tool_calls {
        eprintln!("tool: {}", call.tool);
    }
    if let Some(handoff) = &reply.handoff {
        writeln!(stdout, "{}", serde_json::to_string_pretty(handoff)?)?;
    }
    if outcome == TurnOutcome::Cancelled {
        eprintln!("(stopped)");
    }

    Ok(())
}
