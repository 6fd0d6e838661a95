use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use paperdesk::net::{Connector, TungsteniteConnector};
use paperdesk::services::{ChatService, UploadService};
use paperdesk::state::SessionPhase;
use paperdesk::{
    ChatController, ClientConfig, ConfigError, Level, Notifier, SessionError, SessionOptions, UploadController,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use wire::FileStatus;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing auth token; pass --token or set PAPERDESK_TOKEN")]
    MissingToken,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{failed} of {total} file(s) failed to upload")]
    UploadFailed { failed: usize, total: usize },
    #[error("session ended with an error: {0}")]
    Aborted(String),
    #[error("interrupted")]
    Interrupted,
}

#[derive(Parser, Debug)]
#[command(name = "paperdesk", about = "Upload documents and chat about them over the realtime API")]
struct Cli {
    #[arg(long, env = "PAPERDESK_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "PAPERDESK_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files as one batch and follow their progress.
    Upload(UploadArgs),
    /// Ask one question and stream the answer.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct UploadArgs {
    #[arg(long, env = "PAPERDESK_USER_ID")]
    user_id: String,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct ChatArgs {
    #[arg(long, env = "PAPERDESK_INDEX_PATH")]
    index: String,

    #[arg(long = "pdf-id")]
    pdf_ids: Vec<String>,

    #[arg(long, help = "Continue an existing conversation")]
    conversation_id: Option<String>,

    #[arg(required = true, num_args = 1..)]
    message: Vec<String>,
}

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: Level, title: &str, message: &str) {
        let tag = match level {
            Level::Success => "ok",
            Level::Info => "info",
            Level::Warning => "warn",
            Level::Error => "error",
        };
        eprintln!("[{tag}] {title}: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config = ClientConfig::from_lookup(|key| {
            if key == "PAPERDESK_API_URL" {
                Some(api_url.clone())
            } else {
                std::env::var(key).ok()
            }
        })?;
    }
    let token = cli.token.ok_or(CliError::MissingToken)?;
    tracing::debug!(api_url = %config.api_url, "cli: configured");
    let connector: Arc<dyn Connector> = Arc::new(TungsteniteConnector);

    match cli.command {
        Command::Upload(args) => run_upload(&config, connector, token, args).await,
        Command::Chat(args) => run_chat(&config, connector, token, args).await,
    }
}

async fn run_upload(
    config: &ClientConfig,
    connector: Arc<dyn Connector>,
    token: String,
    args: UploadArgs,
) -> Result<(), CliError> {
    let slot = Arc::new(UploadService::slot(config, connector));
    let controller = UploadController::new(
        slot,
        token,
        args.user_id,
        SessionOptions::from(config),
        Arc::new(ConsoleNotifier),
    );

    let mut rx = controller.subscribe();
    controller.upload_files(&args.files).await?;

    let mut printed: HashMap<String, (FileStatus, u32)> = HashMap::new();
    let unmount = || {
        controller.unmount();
    };
    let state = follow(&mut rx, unmount, |state| {
        for record in &state.files {
            let shown = (record.status, whole_percent(record.progress));
            if printed.get(&record.filename) != Some(&shown) {
                println!("{:<40} {:<10} {:>3}%", record.filename, shown.0.as_str(), shown.1);
                printed.insert(record.filename.clone(), shown);
            }
        }
        state.phase == SessionPhase::Disconnected
    })
    .await?;

    if let Some(error) = state.error {
        return Err(CliError::Aborted(error));
    }
    let failed = state.failed_count();
    if failed > 0 {
        return Err(CliError::UploadFailed {
            failed,
            total: state.files.len(),
        });
    }
    Ok(())
}

async fn run_chat(
    config: &ClientConfig,
    connector: Arc<dyn Connector>,
    token: String,
    args: ChatArgs,
) -> Result<(), CliError> {
    let slot = Arc::new(ChatService::slot(config, connector));
    let controller = ChatController::new(
        slot,
        token,
        args.index,
        SessionOptions::from(config),
        Arc::new(ConsoleNotifier),
    );
    if let Some(conversation_id) = args.conversation_id {
        controller.resume_conversation(conversation_id);
    }

    let mut rx = controller.subscribe();
    controller.send_message(&args.message.join(" "), args.pdf_ids).await?;

    let mut shown = 0;
    let unmount = || {
        controller.unmount();
    };
    let state = follow(&mut rx, unmount, |state| {
        if let Some(record) = &state.current {
            for fragment in record.content.iter().skip(shown) {
                print!("{fragment}");
            }
            shown = record.content.len();
        }
        state.phase == SessionPhase::Disconnected
    })
    .await?;
    println!();

    if let Some(error) = state.error {
        return Err(CliError::Aborted(error));
    }
    if let Some(conversation_id) = state.conversation_id {
        eprintln!("conversation: {conversation_id}");
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_percent(progress: f64) -> u32 {
    progress.round().clamp(0.0, 100.0) as u32
}

/// Feed every state snapshot to `on_state` until it returns `true`.
///
/// Ctrl-C unmounts the controller and ends the wait.
async fn follow<T: Clone>(
    rx: &mut watch::Receiver<T>,
    unmount: impl Fn(),
    mut on_state: impl FnMut(&T) -> bool,
) -> Result<T, CliError> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        let state = rx.borrow_and_update().clone();
        if on_state(&state) {
            return Ok(state);
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(state);
                }
            }
            _ = &mut interrupt => {
                unmount();
                return Err(CliError::Interrupted);
            }
        }
    }
}
