use chatsync::conversation::Snapshot;
use chatsync::message::{Alignment, CanonicalMessage};
use chatsync::session::{self, SessionHandle};
use chatsync::transport::{ApiClient, ChatApi, OutboundMessage};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

const LINE_WIDTH: usize = 72;

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Follow and answer one WhatsApp conversation from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: CHATSYNC_CONFIG_PATH or ~/.chatsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Print the chat history of the configured contact and exit.
    History {
        /// Config file path (default: CHATSYNC_CONFIG_PATH or ~/.chatsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Send one text message to the configured contact.
    Send {
        /// Config file path (default: CHATSYNC_CONFIG_PATH or ~/.chatsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Message text.
        text: String,
    },

    /// Show the conversation and follow live messages until Ctrl-C.
    Watch {
        /// Config file path (default: CHATSYNC_CONFIG_PATH or ~/.chatsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Like watch, and every line typed on stdin is sent to the contact.
    Chat {
        /// Config file path (default: CHATSYNC_CONFIG_PATH or ~/.chatsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("chatsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::History { config }) => run_history(config).await,
        Some(Commands::Send { config, text }) => run_send(config, text).await,
        Some(Commands::Watch { config }) => run_watch(config, false).await,
        Some(Commands::Chat { config }) => run_watch(config, true).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(chatsync::config::default_config_path);
    let dir = chatsync::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_history(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = chatsync::config::load_config(config_path)?;
    let contact = chatsync::config::resolve_contact(&config)
        .ok_or_else(|| anyhow::anyhow!("no contact configured; set contact.phone or CHATSYNC_CONTACT"))?;
    let api = ApiClient::new(config.api.base_url.clone());
    let records = api.fetch_history(&contact).await?;
    for record in records {
        println!("{}", render_line(&chatsync::message::normalize_history(record)));
    }
    Ok(())
}

async fn run_send(config_path: Option<std::path::PathBuf>, text: String) -> anyhow::Result<()> {
    let (config, _) = chatsync::config::load_config(config_path)?;
    let options = session::SessionOptions::from_config(&config)?;
    let credentials = options.credentials.as_ref().ok_or_else(|| {
        anyhow::anyhow!("no credentials configured; set auth.email/auth.password or CHATSYNC_EMAIL/CHATSYNC_PASSWORD")
    })?;
    let api = ApiClient::new(config.api.base_url.clone());
    let tokens = api.authenticate(credentials).await?;
    let access = tokens
        .access
        .ok_or_else(|| anyhow::anyhow!("token response carried no access token"))?;
    let message = OutboundMessage::from_user(&options.contact, &options.sender_label, &text);
    api.send_message(&access, &message).await?;
    println!("sent");
    Ok(())
}

async fn run_watch(config_path: Option<std::path::PathBuf>, interactive: bool) -> anyhow::Result<()> {
    let (config, _) = chatsync::config::load_config(config_path)?;
    let handle = session::start(&config).await?;
    let mut view = handle.view();
    let mut printed = 0;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = interactive;

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    log::info!("session ended");
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                printed = print_new(&snapshot, printed);
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => send_line(&handle, line.trim()).await,
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let final_view = handle.shutdown().await;
    print_new(&final_view, printed);
    Ok(())
}

async fn send_line(handle: &SessionHandle, line: &str) {
    if line.is_empty() {
        return;
    }
    if let Err(e) = handle.send(line).await {
        eprintln!("send failed: {}", e);
    }
}

/// Print messages past `printed`; the conversation only grows, except when the history
/// replaces it, in which case everything is printed again.
fn print_new(snapshot: &Snapshot, printed: usize) -> usize {
    let start = if printed > snapshot.len() { 0 } else { printed };
    for msg in &snapshot[start..] {
        println!("{}", render_line(msg));
    }
    snapshot.len()
}

/// Customer messages on the left, everyone else right-aligned.
fn render_line(msg: &CanonicalMessage) -> String {
    let who = msg
        .sender
        .clone()
        .unwrap_or_else(|| msg.role.to_string());
    let line = if who.is_empty() {
        msg.body.clone()
    } else {
        format!("[{}] {}", who, msg.body)
    };
    match msg.alignment() {
        Alignment::Start => line,
        Alignment::End => format!("{:>width$}", line, width = LINE_WIDTH),
    }
}
