use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::broadcast::{ImageUploader, MessageDispatcher, MessageGateway, UltraMsgClient, UploadRetryConfig};
use crate::config::Config;
use crate::database::{BroadcastSummary, Database, DeliveryHistoryEntry};
use crate::errors::{AppError, AppResult};
use crate::image_processor;
use crate::security::InputValidator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub phone: String,
}

/// Credentials of one gateway tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub instance_id: String,
    pub token: String,
}

impl Account {
    pub fn new(instance_id: &str, token: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub id: i64,
    pub name: String,
    pub instance_id: String,
    pub token: String,
    pub use_count: i64,
    pub last_used_at: Option<String>,
}

impl StoredAccount {
    pub fn account(&self) -> Account {
        Account::new(&self.instance_id, &self.token)
    }

    pub fn masked_token(&self) -> String {
        let visible: String = self.token.chars().take(4).collect();
        format!("{}****", visible)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Group,
    #[default]
    Contact,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Group => "group",
            RecipientType::Contact => "contact",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOptions {
    pub text: String,
    pub image_url: Option<String>,
    pub recipients: Vec<Recipient>,
    /// Informational only
    pub recipient_type: RecipientType,
    pub account: Account,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub recipient_id: String,
    pub name: String,
    pub phone: String,
    pub delivered: bool,
    pub host: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendProgress {
    pub sent: usize,
    pub failed: usize,
    pub current: String,
    pub total: usize,
    pub status: SessionStatus,
    pub estimated_time_remaining: Option<u64>, // seconds
    pub started_at: Option<DateTime<Utc>>,
    pub deliveries: Vec<DeliveryRecord>,
}

impl SendProgress {
    pub fn elapsed_seconds(&self) -> i64 {
        self.started_at
            .map(|started| (Utc::now() - started).num_seconds())
            .unwrap_or(0)
    }

    pub fn failed_deliveries(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.deliveries.iter().filter(|d| !d.delivered)
    }
}

/// An image ready for upload, with an optional inline `data:` URL preview.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub preview: Option<String>,
}

impl MediaFile {
    pub async fn from_path(path: &str, config: &Config) -> AppResult<Self> {
        image_processor::load_media_file(path, config).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub account_id: i64,
    pub recipients: Vec<Recipient>,
    pub text: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub recipient_type: RecipientType,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

struct BroadcastSession {
    dispatcher: Arc<MessageDispatcher>,
    task: Option<JoinHandle<()>>,
}

/// Everything the commands need, shared by the CLI.
pub struct AppState {
    pub config: Config,
    pub database: Database,
    gateway: Arc<dyn MessageGateway>,
    sessions: Mutex<HashMap<String, BroadcastSession>>,
}

impl AppState {
    pub fn new(config: Config, database: Database) -> AppResult<Self> {
        let gateway = UltraMsgClient::new(
            Duration::from_secs(config.upload_timeout_secs),
            Duration::from_secs(config.send_timeout_secs),
        )?;
        Ok(Self::with_gateway(config, database, Arc::new(gateway)))
    }

    pub fn with_gateway(config: Config, database: Database, gateway: Arc<dyn MessageGateway>) -> Self {
        Self {
            config,
            database,
            gateway,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn dispatcher(&self, session_id: &str) -> AppResult<Arc<MessageDispatcher>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| AppError::Internal("Session registry lock poisoned".to_string()))?;
        sessions
            .get(session_id)
            .map(|session| session.dispatcher.clone())
            .ok_or_else(|| AppError::not_found("broadcast", session_id))
    }
}

pub async fn get_accounts(state: &AppState) -> AppResult<Vec<StoredAccount>> {
    state.database.get_all_accounts().await
}

pub async fn add_account(
    state: &AppState,
    name: String,
    instance_id: String,
    token: String,
) -> AppResult<i64> {
    InputValidator::validate_account_name(&name)?;
    InputValidator::validate_instance_id(&instance_id)?;
    InputValidator::validate_token(&token)?;

    state
        .database
        .insert_account(name.trim(), instance_id.trim(), token.trim())
        .await
}

pub async fn delete_account(state: &AppState, id: i64) -> AppResult<()> {
    if id <= 0 {
        return Err(AppError::validation("id", "Invalid account ID"));
    }
    state.database.delete_account(id).await
}

/// Normalize phones, drop unusable ones and de-duplicate by phone, keeping
/// the first occurrence.
pub fn prepare_recipients(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(recipients.len());

    for (index, mut recipient) in recipients.into_iter().enumerate() {
        match InputValidator::normalize_phone(&recipient.phone) {
            Ok(phone) => {
                if !seen.insert(phone.clone()) {
                    log::info!("Skipping duplicate recipient {} ({})", recipient.name, phone);
                    continue;
                }
                recipient.phone = phone;
                if recipient.id.trim().is_empty() {
                    recipient.id = format!("row-{}", index + 1);
                }
                prepared.push(recipient);
            }
            Err(e) => {
                log::warn!("Skipping recipient {}: {}", recipient.name, e);
            }
        }
    }

    prepared
}

/// Validate, host the image (if any) and start a broadcast in the background.
///
/// Image upload happens before any recipient is contacted; if it fails
/// without a fallback the broadcast does not start.
pub async fn start_broadcast(state: &Arc<AppState>, request: BroadcastRequest) -> AppResult<String> {
    InputValidator::validate_message(&request.text, request.image_path.is_some())?;
    let delay_ms = request.delay_ms.unwrap_or(state.config.default_delay_ms);
    InputValidator::validate_delay_ms(delay_ms)?;

    let stored = state.database.get_account_by_id(request.account_id).await?;
    let account = stored.account();

    let recipients = prepare_recipients(request.recipients);
    if recipients.is_empty() {
        return Err(AppError::validation("recipients", "No valid recipients to send to"));
    }

    let dispatcher = Arc::new(
        MessageDispatcher::new(state.gateway.clone(), state.config.hosts.clone())
            .with_poll_interval(Duration::from_millis(state.config.poll_interval_ms)),
    );

    let image_url = match &request.image_path {
        Some(path) => {
            let media = MediaFile::from_path(path, &state.config).await?;
            let uploader = ImageUploader::new(
                state.gateway.clone(),
                state.config.hosts.clone(),
                dispatcher.controls(),
            )
            .with_retry_config(UploadRetryConfig {
                backoff: Duration::from_millis(state.config.upload_backoff_ms),
            });
            Some(
                uploader
                    .upload_image_with_retry(&media, &account, state.config.upload_attempts)
                    .await?,
            )
        }
        None => None,
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    state
        .database
        .create_broadcast_session(&session_id, stored.id, recipients.len() as i64)
        .await?;
    state.database.update_account_usage(stored.id).await?;

    let options = SendOptions {
        text: request.text,
        image_url,
        recipients,
        recipient_type: request.recipient_type,
        account,
        delay_ms,
    };

    dispatcher.begin_run();
    let task_state = Arc::clone(state);
    let task_dispatcher = dispatcher.clone();
    let task_session_id = session_id.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = task_dispatcher.send_message(options).await {
            log::error!("Broadcast {} did not run: {}", task_session_id, e);
        }

        let progress = task_dispatcher.progress();
        if let Err(e) = task_state
            .database
            .record_deliveries_batch(&task_session_id, &progress.deliveries)
            .await
        {
            log::error!("Failed to record deliveries for {}: {}", task_session_id, e);
        }
        if let Err(e) = task_state
            .database
            .finish_broadcast_session(
                &task_session_id,
                progress.sent as i64,
                progress.failed as i64,
                progress.status,
            )
            .await
        {
            log::error!("Failed to close broadcast session {}: {}", task_session_id, e);
        }
    });

    state
        .sessions
        .lock()
        .map_err(|_| AppError::Internal("Session registry lock poisoned".to_string()))?
        .insert(
            session_id.clone(),
            BroadcastSession {
                dispatcher,
                task: Some(task),
            },
        );

    log::info!("Started broadcast session: {}", session_id);
    Ok(session_id)
}

pub fn get_broadcast_progress(state: &AppState, session_id: &str) -> AppResult<SendProgress> {
    Ok(state.dispatcher(session_id)?.progress())
}

pub fn toggle_broadcast_pause(state: &AppState, session_id: &str) -> AppResult<bool> {
    Ok(state.dispatcher(session_id)?.toggle_pause())
}

pub fn set_broadcast_delay(state: &AppState, session_id: &str, delay_ms: u64) -> AppResult<()> {
    InputValidator::validate_delay_ms(delay_ms)?;
    state.dispatcher(session_id)?.set_current_delay_ms(delay_ms);
    Ok(())
}

pub fn cancel_broadcast(state: &AppState, session_id: &str) -> AppResult<()> {
    let dispatcher = state.dispatcher(session_id)?;
    dispatcher.set_is_sending(false);
    log::info!("Cancellation requested for broadcast {}", session_id);
    Ok(())
}

/// Wait until the broadcast finished and its history is stored, then drop
/// the session. Its history stays available from the database.
pub async fn wait_for_broadcast(state: &AppState, session_id: &str) -> AppResult<SendProgress> {
    let (dispatcher, task) = {
        let mut sessions = state
            .sessions
            .lock()
            .map_err(|_| AppError::Internal("Session registry lock poisoned".to_string()))?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::not_found("broadcast", session_id))?;
        (session.dispatcher.clone(), session.task.take())
    };

    let joined = match task {
        Some(task) => task
            .await
            .map_err(|e| AppError::Internal(format!("Broadcast task failed: {}", e))),
        None => Ok(()),
    };

    state
        .sessions
        .lock()
        .map_err(|_| AppError::Internal("Session registry lock poisoned".to_string()))?
        .remove(session_id);

    joined?;
    Ok(dispatcher.progress())
}

pub async fn get_broadcast_history(state: &AppState, limit: i64) -> AppResult<Vec<BroadcastSummary>> {
    state.database.get_broadcast_history(limit.clamp(1, 500)).await
}

pub async fn get_session_deliveries(
    state: &AppState,
    session_id: &str,
) -> AppResult<Vec<DeliveryHistoryEntry>> {
    state.database.get_session_deliveries(session_id).await
}

pub async fn cleanup_old_data(state: &AppState, days: i32) -> AppResult<(u64, u64)> {
    if days <= 0 {
        return Err(AppError::validation("days", "Must be greater than 0"));
    }
    let sessions = state.database.cleanup_old_broadcast_sessions(days).await?;
    let deliveries = state.database.cleanup_old_delivery_history(days).await?;
    Ok((sessions, deliveries))
}
