use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

use crate::commands::{Recipient, SendOptions, SendProgress, SessionStatus};
use crate::errors::{AppError, AppResult, ProgressState};

use super::controls::BroadcastControls;
use super::gateway_client::MessageGateway;
use super::hosts::{ordered_hosts, HostEndpoint};
use super::progress_tracker::*;

/// Upper bound on how long a pause, delay change or stop can go unnoticed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

enum Pacing {
    Ready,
    Paused,
    Cancelled,
}

/// Sends one message to every recipient of a broadcast, one at a time.
pub struct MessageDispatcher {
    gateway: Arc<dyn MessageGateway>,
    hosts: Vec<HostEndpoint>,
    controls: Arc<BroadcastControls>,
    progress_state: ProgressState,
    poll_interval: Duration,
    /// Set by `begin_run`, consumed by the next `send_message`
    run_started: AtomicBool,
}

impl MessageDispatcher {
    pub fn new(gateway: Arc<dyn MessageGateway>, hosts: Vec<HostEndpoint>) -> Self {
        Self {
            gateway,
            hosts,
            controls: Arc::new(BroadcastControls::default()),
            progress_state: Arc::new(Mutex::new(SendProgress::default())),
            poll_interval: DEFAULT_POLL_INTERVAL,
            run_started: AtomicBool::new(false),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn controls(&self) -> Arc<BroadcastControls> {
        self.controls.clone()
    }

    pub fn progress_state(&self) -> ProgressState {
        self.progress_state.clone()
    }

    /// Latest progress; counters may move between two calls.
    pub fn progress(&self) -> SendProgress {
        read_progress(&self.progress_state).unwrap_or_default()
    }

    pub fn is_sending(&self) -> bool {
        self.controls.is_sending()
    }

    pub fn toggle_pause(&self) -> bool {
        let paused = self.controls.toggle_pause();
        if self.controls.is_sending() {
            if paused {
                update_progress_status(&self.progress_state, SessionStatus::Paused);
                update_progress_current(&self.progress_state, "Paused".to_string());
            } else {
                update_progress_status(&self.progress_state, SessionStatus::Running);
                update_progress_current(&self.progress_state, "Resuming".to_string());
            }
        }
        log::info!("Broadcast {}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn set_current_delay_ms(&self, delay_ms: u64) {
        log::info!("Pacing delay set to {}ms", delay_ms);
        self.controls.set_current_delay_ms(delay_ms);
    }

    /// `false` stops the broadcast at its next check point.
    pub fn set_is_sending(&self, sending: bool) {
        self.controls.set_is_sending(sending);
    }

    /// Mark a run as started before `send_message` is scheduled, so a stop
    /// requested in between is not lost.
    pub fn begin_run(&self) {
        self.raise_sending_flags();
        self.run_started.store(true, Ordering::SeqCst);
    }

    fn raise_sending_flags(&self) {
        self.controls.set_paused(false);
        self.controls.set_is_sending(true);
    }

    /// Deliver `options.text` (and image, if any) to every recipient in order.
    ///
    /// Per-recipient failures are counted and never abort the run. Returns
    /// once the list is exhausted or the run was cancelled.
    pub async fn send_message(&self, options: SendOptions) -> AppResult<()> {
        let image_url = options
            .image_url
            .as_deref()
            .filter(|url| !url.trim().is_empty());

        let already_started = self.run_started.swap(false, Ordering::SeqCst);

        if options.text.trim().is_empty() && image_url.is_none() {
            if already_started {
                self.controls.set_is_sending(false);
            }
            return Err(AppError::validation(
                "text",
                "Message text or an image is required",
            ));
        }

        reset_progress(&self.progress_state, options.recipients.len());
        self.controls.set_current_delay_ms(options.delay_ms);
        if !already_started {
            self.raise_sending_flags();
        }

        let hosts = ordered_hosts(&self.hosts, &options.account);

        log::info!(
            "Starting broadcast to {} {} recipients ({}ms pacing, image: {})",
            options.recipients.len(),
            options.recipient_type.as_str(),
            options.delay_ms,
            image_url.is_some()
        );

        let mut index = 0;
        let mut cancelled = false;

        while index < options.recipients.len() {
            let recipient = &options.recipients[index];

            if !self.wait_while_paused(recipient).await {
                cancelled = true;
                break;
            }

            match self.wait_before_send(recipient).await {
                Pacing::Ready => {}
                // Paused mid-wait: come back to the same recipient
                Pacing::Paused => continue,
                Pacing::Cancelled => {
                    cancelled = true;
                    break;
                }
            }

            update_progress_current(
                &self.progress_state,
                format!("Sending to {}", recipient.name),
            );

            let outcome = self
                .deliver(&hosts, &options, image_url, recipient)
                .await;

            if !self.controls.is_sending() {
                log::info!(
                    "Broadcast stopped while sending to {}, discarding the result",
                    recipient.name
                );
                cancelled = true;
                break;
            }

            match outcome {
                Ok(host) => update_progress_success(&self.progress_state, recipient, &host),
                Err(e) => update_progress_failure(&self.progress_state, recipient, e.to_string()),
            }
            update_time_estimate(&self.progress_state, self.controls.current_delay_ms());

            index += 1;
        }

        if cancelled {
            mark_session_cancelled(&self.progress_state);
        } else {
            mark_session_completed(&self.progress_state);
        }

        self.controls.set_is_sending(false);
        self.controls.set_paused(false);
        Ok(())
    }

    /// Block while paused. Returns `false` if the run was stopped.
    async fn wait_while_paused(&self, recipient: &Recipient) -> bool {
        let mut was_paused = false;

        loop {
            if !self.controls.is_sending() {
                return false;
            }
            if !self.controls.is_paused() {
                if was_paused {
                    update_progress_status(&self.progress_state, SessionStatus::Running);
                    log::info!("Resuming with {}", recipient.name);
                }
                return true;
            }

            if !was_paused {
                update_progress_status(&self.progress_state, SessionStatus::Paused);
                update_progress_current(
                    &self.progress_state,
                    format!("Paused before {}", recipient.name),
                );
                was_paused = true;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Wait out the pacing delay in poll-sized steps, re-reading the delay
    /// each step.
    async fn wait_before_send(&self, recipient: &Recipient) -> Pacing {
        let mut waited = Duration::ZERO;

        loop {
            if !self.controls.is_sending() {
                return Pacing::Cancelled;
            }
            if self.controls.is_paused() {
                log::debug!("Pause requested while waiting for {}", recipient.name);
                return Pacing::Paused;
            }

            let delay = self.controls.current_delay();
            if waited >= delay {
                return Pacing::Ready;
            }

            let remaining = delay - waited;
            update_progress_current(
                &self.progress_state,
                format!(
                    "Waiting {}s before sending to {}",
                    remaining.as_millis().div_ceil(1000),
                    recipient.name
                ),
            );

            let step = remaining.min(self.poll_interval);
            sleep(step).await;
            waited += step;
        }
    }

    /// Try each host once in preference order; the first confirmed send wins.
    async fn deliver(
        &self,
        hosts: &[HostEndpoint],
        options: &SendOptions,
        image_url: Option<&str>,
        recipient: &Recipient,
    ) -> AppResult<String> {
        let mut last_error: Option<AppError> = None;

        for host in hosts {
            let result = match image_url {
                Some(image) => {
                    self.gateway
                        .send_image(host, &options.account, &recipient.phone, image, &options.text)
                        .await
                }
                None => {
                    self.gateway
                        .send_chat(host, &options.account, &recipient.phone, &options.text)
                        .await
                }
            };

            match result {
                Ok(response) if response.is_sent() => return Ok(host.base_url.clone()),
                Ok(response) => {
                    let reason = response.describe_failure();
                    log::warn!(
                        "{} refused message for {}: {}",
                        host.base_url,
                        recipient.name,
                        reason
                    );
                    last_error = Some(AppError::gateway(&host.base_url, reason));
                }
                Err(e) => {
                    log::warn!(
                        "Sending to {} via {} failed: {}",
                        recipient.name,
                        host.base_url,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Config("No gateway hosts configured".to_string())))
    }
}
