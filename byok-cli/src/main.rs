use anyhow::{anyhow, bail, Context, Result};
use byok_core::config::{self, ClientConfig, SecretString};
use byok_core::protocol::{Attachment, Credentials, NewApiKey};
use byok_core::{ChatEvent, ChatSession, SendState};
use clap::{Parser, Subcommand};
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Chat with your own provider keys", long_about = None)]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token from a previous login
    #[arg(long, env = "BYOK_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is up
    Health,
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BYOK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log in and print the bearer token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BYOK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the logged-in account
    Whoami,
    /// List providers, or the models of one provider
    Providers {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Manage provider keys
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Manage threads
    Threads {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Print the messages of a thread
    History { thread: String },
    /// Send a message, streaming the reply
    Send {
        /// Existing thread; a new one is created when omitted
        #[arg(long)]
        thread: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// File to attach
        #[arg(long)]
        file: Option<PathBuf>,
        /// Ask for a single JSON reply
        #[arg(long)]
        no_stream: bool,
        message: String,
    },
    /// Replay the user message behind an assistant message
    Retry {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        message_id: String,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    List,
    Add {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "BYOK_PROVIDER_KEY", hide_env_values = true)]
        key: String,
    },
    Delete { id: String },
}

#[derive(Subcommand)]
enum ThreadAction {
    List,
    Delete { id: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "byok_core=debug,byok=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.server.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        config.server.token = Some(SecretString::new(token.clone()));
    }
    config.validate()?;
    Ok(config)
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") | Some("md") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

async fn read_attachment(path: &Path) -> Result<Attachment> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment::new(file_name, guess_mime(path), data.into()))
}

/// Print deltas as they arrive; returns whether any were printed
async fn render_events(mut rx: UnboundedReceiver<ChatEvent>) -> Result<bool> {
    let mut out = stdout();
    let mut streamed = false;
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::Delta(delta) => {
                streamed = true;
                write!(out, "{}", delta)?;
                out.flush()?;
            }
            ChatEvent::StateChanged(SendState::Succeeded) if streamed => {
                writeln!(out)?;
            }
            ChatEvent::ThreadCreated { thread_id } => {
                eprintln!("[thread {}]", thread_id);
            }
            ChatEvent::StateChanged(SendState::Failed) if streamed => {
                writeln!(out)?;
            }
            _ => {}
        }
    }
    Ok(streamed)
}

/// Run one send or retry with a live event printer
async fn run_exchange(
    session: ChatSession,
    rx: UnboundedReceiver<ChatEvent>,
    retry_of: Option<String>,
) -> Result<()> {
    let printer = tokio::spawn(render_events(rx));
    let result = match &retry_of {
        Some(message_id) => session.retry(message_id).await,
        None => session.send().await,
    };
    // closing the event channel ends the printer
    drop(session);
    let streamed = printer.await??;

    let outcome = result.map_err(|err| anyhow!(err.notice()))?;
    if !streamed {
        println!("{}", outcome.content);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let (session, rx) = ChatSession::from_config(&config)?;
    let api = session.api().clone();

    match cli.command {
        Commands::Health => {
            let health = api.health().await?;
            println!("{} ({})", health.status, health.timestamp);
        }
        Commands::Register { email, password } => {
            let user = api.register(&Credentials::new(email, password)).await?;
            println!("registered {} ({})", user.email, user.id);
        }
        Commands::Login { email, password } => {
            let token = api.login(&Credentials::new(email, password)).await?;
            println!("{}", token.access_token.expose_secret());
        }
        Commands::Whoami => {
            let user = api.current_user().await?;
            println!("{} ({})", user.email, user.id);
        }
        Commands::Providers { provider: Some(provider) } => {
            let models = api.provider_models(&provider).await?;
            for model in models.models {
                println!("{}", model);
            }
        }
        Commands::Providers { provider: None } => {
            let catalog = api.catalog().await?;
            for provider in &catalog.providers {
                println!(
                    "{} ({}): {}",
                    provider.name,
                    provider.id,
                    catalog.models_for(&provider.id).join(", ")
                );
            }
        }
        Commands::Keys { action: KeyAction::List } => {
            for key in api.list_keys().await? {
                let state = if key.is_active { "active" } else { "inactive" };
                println!(
                    "{}  {}/{}  {}  [{}]",
                    key.id, key.provider, key.model_name, key.key_name, state
                );
            }
        }
        Commands::Keys {
            action: KeyAction::Add { provider, model, name, key },
        } => {
            let created = session
                .add_key(&NewApiKey {
                    provider,
                    model_name: model,
                    api_key: SecretString::new(key),
                    key_name: name,
                })
                .await?;
            println!("stored key {}", created.id);
        }
        Commands::Keys { action: KeyAction::Delete { id } } => {
            session.delete_key(&id).await?;
            println!("deleted key {}", id);
        }
        Commands::Threads { action: ThreadAction::List } => {
            for thread in api.list_threads().await? {
                println!(
                    "{}  {}  {}/{}  {}",
                    thread.id, thread.updated_at, thread.provider, thread.model_name, thread.title
                );
            }
        }
        Commands::Threads { action: ThreadAction::Delete { id } } => {
            api.delete_thread(&id).await?;
            println!("deleted thread {}", id);
        }
        Commands::History { thread } => {
            session.open_thread(&thread).await?;
            for message in session.messages() {
                println!(
                    "[{}] {} {}: {}",
                    message.id, message.created_at, message.role, message.content
                );
            }
        }
        Commands::Send {
            thread,
            provider,
            model,
            file,
            no_stream,
            message,
        } => {
            apply_selection(&session, provider, model)?;
            session.set_streaming(!no_stream);
            if let Some(thread) = thread {
                session.open_thread(&thread).await?;
            }
            if let Some(path) = file {
                session.attach(Some(read_attachment(&path).await?));
            }
            session.set_compose(message);
            run_exchange(session, rx, None).await?;
        }
        Commands::Retry {
            thread,
            provider,
            model,
            message_id,
        } => {
            apply_selection(&session, provider, model)?;
            session.open_thread(&thread).await?;
            run_exchange(session, rx, Some(message_id)).await?;
        }
    }

    Ok(())
}

fn apply_selection(
    session: &ChatSession,
    provider: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let current = session.selection();
    match (provider.or(current.provider), model.or(current.model_name)) {
        (Some(provider), Some(model)) => {
            session.select_model(provider, model);
            Ok(())
        }
        (None, _) => bail!("no provider selected; pass --provider or set chat.default_provider"),
        (_, None) => bail!("no model selected; pass --model or set chat.default_model"),
    }
}
