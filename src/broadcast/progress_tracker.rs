use crate::commands::{DeliveryRecord, Recipient, SendProgress, SessionStatus};
use crate::errors::{safe_progress_read, safe_progress_update, ProgressState};

/// Start a fresh run: counters back to zero, `total` set to the list size.
pub fn reset_progress(progress_state: &ProgressState, total: usize) {
    safe_progress_update(progress_state, "reset", |progress| {
        *progress = SendProgress {
            total,
            status: SessionStatus::Running,
            current: "Starting broadcast".to_string(),
            started_at: Some(chrono::Utc::now()),
            ..SendProgress::default()
        };
    });
}

pub fn update_progress_current(progress_state: &ProgressState, current: String) {
    safe_progress_update(progress_state, "current status update", |progress| {
        log::debug!("Progress: {}", current);
        progress.current = current;
    });
}

pub fn update_progress_status(progress_state: &ProgressState, status: SessionStatus) {
    safe_progress_update(progress_state, "status update", |progress| {
        progress.status = status;
    });
}

/// Record a recipient the gateway confirmed
pub fn update_progress_success(progress_state: &ProgressState, recipient: &Recipient, host: &str) {
    safe_progress_update(progress_state, "success update", |progress| {
        if progress.sent + progress.failed >= progress.total {
            log::warn!("Ignoring success for {} beyond total", recipient.name);
            return;
        }
        progress.sent += 1;
        progress.current = format!("Sent to {}", recipient.name);
        progress.deliveries.push(DeliveryRecord {
            recipient_id: recipient.id.clone(),
            name: recipient.name.clone(),
            phone: recipient.phone.clone(),
            delivered: true,
            host: Some(host.to_string()),
            error: None,
        });

        log::info!(
            "Progress: Sent to {} ({}/{})",
            recipient.name,
            progress.sent + progress.failed,
            progress.total
        );
    });
}

/// Record a recipient no host accepted
pub fn update_progress_failure(progress_state: &ProgressState, recipient: &Recipient, error: String) {
    safe_progress_update(progress_state, "failure update", |progress| {
        if progress.sent + progress.failed >= progress.total {
            log::warn!("Ignoring failure for {} beyond total", recipient.name);
            return;
        }
        progress.failed += 1;
        progress.current = format!("Failed to send to {}", recipient.name);

        log::warn!(
            "Progress: Failed to send to {} - {} ({}/{})",
            recipient.name,
            error,
            progress.sent + progress.failed,
            progress.total
        );

        progress.deliveries.push(DeliveryRecord {
            recipient_id: recipient.id.clone(),
            name: recipient.name.clone(),
            phone: recipient.phone.clone(),
            delivered: false,
            host: None,
            error: Some(error),
        });
    });
}

/// Estimate seconds left from the pacing delay and remaining recipients.
pub fn update_time_estimate(progress_state: &ProgressState, delay_ms: u64) {
    safe_progress_update(progress_state, "time estimate update", |progress| {
        let remaining = progress.total.saturating_sub(progress.sent + progress.failed) as u64;
        let estimated_seconds = remaining * delay_ms / 1000;
        progress.estimated_time_remaining = Some(estimated_seconds);

        if estimated_seconds > 0 {
            log::debug!(
                "ETA updated: {}m {}s (remaining: {})",
                estimated_seconds / 60,
                estimated_seconds % 60,
                remaining
            );
        }
    });
}

pub fn mark_session_completed(progress_state: &ProgressState) {
    safe_progress_update(progress_state, "mark completed", |progress| {
        progress.status = SessionStatus::Completed;
        progress.estimated_time_remaining = Some(0);
        progress.current = format!(
            "Finished: {} sent, {} failed",
            progress.sent, progress.failed
        );

        log::info!(
            "Broadcast completed: {}/{} sent, {} failed",
            progress.sent,
            progress.total,
            progress.failed
        );
    });
}

pub fn mark_session_cancelled(progress_state: &ProgressState) {
    safe_progress_update(progress_state, "mark cancelled", |progress| {
        progress.status = SessionStatus::Cancelled;
        progress.estimated_time_remaining = Some(0);
        progress.current = "Broadcast stopped".to_string();

        log::info!(
            "Broadcast cancelled with {} sent and {} failed of {}",
            progress.sent,
            progress.failed,
            progress.total
        );
    });
}

/// Snapshot of the latest progress, if the lock is usable.
pub fn read_progress(progress_state: &ProgressState) -> Option<SendProgress> {
    safe_progress_read(progress_state, "snapshot", |progress| progress.clone())
}
