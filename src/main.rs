use clap::{Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use whatsapp_broadcaster::commands::{self, AppState, BroadcastRequest, Recipient, RecipientType};
use whatsapp_broadcaster::config;
use whatsapp_broadcaster::database::Database;

#[derive(Parser)]
#[command(
    name = "whatsapp-broadcaster",
    version,
    about = "Send one message to many WhatsApp contacts or groups through UltraMsg"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level regardless of the configured level.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored gateway accounts.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Broadcast a message to every recipient in a JSON file.
    Send {
        /// Stored account to send from.
        #[arg(short, long)]
        account: i64,
        /// JSON array of `{"name": .., "phone": ..}` objects.
        #[arg(short, long)]
        recipients: String,
        /// Message text, used as the caption when an image is attached.
        #[arg(short, long, default_value = "")]
        text: String,
        /// Image to attach.
        #[arg(short, long)]
        image: Option<String>,
        /// Pause before each send, in milliseconds.
        #[arg(short, long)]
        delay_ms: Option<u64>,
        #[arg(long, value_enum, default_value_t = RecipientKind::Contact)]
        recipient_type: RecipientKind,
    },
    /// Show past broadcasts, or the deliveries of one of them.
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Show or reset the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Delete history older than the given number of days.
    Cleanup {
        #[arg(short, long)]
        days: Option<i32>,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    Add {
        name: String,
        instance_id: String,
        token: String,
    },
    List,
    Remove {
        id: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecipientKind {
    Contact,
    Group,
}

impl From<RecipientKind> for RecipientType {
    fn from(kind: RecipientKind) -> Self {
        match kind {
            RecipientKind::Contact => RecipientType::Contact,
            RecipientKind::Group => RecipientType::Group,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_config = config::load_config()?;
    let level = if cli.verbose { "debug" } else { app_config.log_level.as_str() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("Starting WhatsApp Broadcaster");

    let database = Database::init_database().await?;
    if let Err(e) = config::auto_cleanup(&database, &app_config).await {
        log::warn!("Auto-cleanup failed: {}", e);
    }

    let state = Arc::new(AppState::new(app_config, database)?);

    match cli.command {
        Commands::Account { action } => match action {
            AccountAction::Add { name, instance_id, token } => {
                let id = commands::add_account(&state, name, instance_id, token).await?;
                println!("Account added with id {}", id);
            }
            AccountAction::List => {
                for account in commands::get_accounts(&state).await? {
                    println!(
                        "{:>4}  {:<24} instance{:<16} token {}  used {} times",
                        account.id,
                        account.name,
                        whatsapp_broadcaster::broadcast::hosts::clean_instance_id(&account.instance_id),
                        account.masked_token(),
                        account.use_count
                    );
                }
            }
            AccountAction::Remove { id } => {
                commands::delete_account(&state, id).await?;
                println!("Account {} removed", id);
            }
        },
        Commands::Send {
            account,
            recipients,
            text,
            image,
            delay_ms,
            recipient_type,
        } => {
            let recipients_json = tokio::fs::read_to_string(&recipients).await?;
            let recipients: Vec<Recipient> = serde_json::from_str(&recipients_json)?;

            let request = BroadcastRequest {
                account_id: account,
                recipients,
                text,
                image_path: image,
                recipient_type: recipient_type.into(),
                delay_ms,
            };
            run_broadcast(state, request).await?;
        }
        Commands::History { limit, session } => match session {
            Some(session_id) => {
                for entry in commands::get_session_deliveries(&state, &session_id).await? {
                    println!(
                        "{:<7} {:<20} {:<24} {}",
                        entry.status,
                        entry.phone,
                        entry.name,
                        entry.error.or(entry.host).unwrap_or_default()
                    );
                }
            }
            None => {
                for summary in commands::get_broadcast_history(&state, limit).await? {
                    println!(
                        "{}  {:<10} {}/{} sent, {} failed  {}  ({})",
                        summary.id,
                        summary.status,
                        summary.sent,
                        summary.total,
                        summary.failed,
                        summary.started_at.unwrap_or_default(),
                        summary.account_name.unwrap_or_else(|| "deleted account".to_string())
                    );
                }
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&state.config)?);
                println!("# {}", config::get_config_path()?.display());
            }
            ConfigAction::Reset => {
                let defaults = config::reset_config()?;
                println!("{}", serde_json::to_string_pretty(&defaults)?);
            }
        },
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(state.config.history_retention_days as i32);
            let (sessions, deliveries) = commands::cleanup_old_data(&state, days).await?;
            println!("Removed {} broadcasts and {} deliveries", sessions, deliveries);
        }
    }

    Ok(())
}

/// Run one broadcast in the foreground, reading `p`, `d <ms>` and `q`
/// from stdin while it runs.
async fn run_broadcast(state: Arc<AppState>, request: BroadcastRequest) -> anyhow::Result<()> {
    let session_id = commands::start_broadcast(&state, request).await?;
    println!("Broadcast {} started. Type p to pause/resume, d <ms> to change the delay, q to stop.", session_id);

    {
        let state = state.clone();
        let session_id = session_id.clone();
        ctrlc::set_handler(move || {
            if let Err(e) = commands::cancel_broadcast(&state, &session_id) {
                log::warn!("Could not cancel broadcast: {}", e);
            }
        })?;
    }

    let input = {
        let state = state.clone();
        let session_id = session_id.clone();
        let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                if let Err(e) = apply_console_line(&state, &session_id, &line) {
                    log::warn!("{}", e);
                }
            }
        })
    };

    let reporter = {
        let state = state.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticker.tick().await;
                let Ok(progress) = commands::get_broadcast_progress(&state, &session_id) else {
                    break;
                };
                if progress.status.is_finished() {
                    break;
                }
                log::info!(
                    "[{}] {}/{} sent, {} failed, now: {}, about {}s left",
                    progress.status.as_str(),
                    progress.sent,
                    progress.total,
                    progress.failed,
                    progress.current,
                    progress.estimated_time_remaining.unwrap_or(0)
                );
            }
        })
    };

    let progress = commands::wait_for_broadcast(&state, &session_id).await?;
    input.abort();
    reporter.abort();

    println!(
        "Broadcast {}: {} sent, {} failed of {} in {}s",
        progress.status.as_str(),
        progress.sent,
        progress.failed,
        progress.total,
        progress.elapsed_seconds()
    );
    for failure in progress.failed_deliveries() {
        println!(
            "  failed {} ({}): {}",
            failure.name,
            failure.phone,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

/// Forward lines from `reader` on a dedicated thread. A read still pending
/// when the broadcast ends must not hold up runtime shutdown.
fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> UnboundedReceiver<String> {
    let (line_tx, line_rx) = unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    line_rx
}

fn apply_console_line(state: &AppState, session_id: &str, line: &str) -> anyhow::Result<()> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("p"), _) => {
            let paused = commands::toggle_broadcast_pause(state, session_id)?;
            println!("{}", if paused { "Paused" } else { "Resumed" });
        }
        (Some("d"), Some(ms)) => match ms.parse::<u64>() {
            Ok(ms) => commands::set_broadcast_delay(state, session_id, ms)?,
            Err(_) => println!("Delay must be a number of milliseconds"),
        },
        (Some("q"), _) => commands::cancel_broadcast(state, session_id)?,
        _ => {}
    }
    Ok(())
}
