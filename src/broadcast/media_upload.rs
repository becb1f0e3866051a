use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::commands::{Account, MediaFile};
use crate::errors::{AppError, AppResult};

use super::controls::BroadcastControls;
use super::gateway_client::MessageGateway;
use super::hosts::{host_for_attempt, ordered_hosts, HostEndpoint};

pub const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct UploadRetryConfig {
    /// Fixed pause between two upload attempts
    pub backoff: Duration,
}

impl Default for UploadRetryConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(1500),
        }
    }
}

/// Hosts a broadcast image on the gateway's media store.
pub struct ImageUploader {
    gateway: Arc<dyn MessageGateway>,
    hosts: Vec<HostEndpoint>,
    controls: Arc<BroadcastControls>,
    retry_config: UploadRetryConfig,
}

impl ImageUploader {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        hosts: Vec<HostEndpoint>,
        controls: Arc<BroadcastControls>,
    ) -> Self {
        Self {
            gateway,
            hosts,
            controls,
            retry_config: UploadRetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: UploadRetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn is_uploading(&self) -> bool {
        self.controls.is_uploading()
    }

    /// Upload `file` and return a public URL for it.
    ///
    /// Attempts rotate across the account's ordered hosts. Rejections and
    /// transport errors are retried alike. When every attempt fails, the
    /// file's inline preview (a `data:` URL) is returned instead if one
    /// exists; otherwise the last error is returned.
    pub async fn upload_image_with_retry(
        &self,
        file: &MediaFile,
        account: &Account,
        retries: u32,
    ) -> AppResult<String> {
        let _uploading = self.controls.begin_upload();

        let ordered = ordered_hosts(&self.hosts, account);
        let attempts = retries.max(1) as usize;
        let mut last_error: Option<AppError> = None;

        for attempt in 0..attempts {
            let Some(host) = host_for_attempt(&ordered, attempt) else {
                last_error = Some(AppError::Config("No gateway hosts configured".to_string()));
                break;
            };

            log::info!(
                "Uploading {} via {} (attempt {}/{})",
                file.file_name,
                host.base_url,
                attempt + 1,
                attempts
            );

            match self.gateway.upload_media(host, account, file).await {
                Ok(response) => {
                    if let Some(url) = response.url.as_ref().filter(|url| !url.is_empty()) {
                        log::info!("Image hosted at {}", url);
                        return Ok(url.clone());
                    }

                    let reason = response
                        .error_message()
                        .unwrap_or_else(|| "response did not include a url".to_string());
                    log::warn!(
                        "Upload attempt {} rejected by {}: {}",
                        attempt + 1,
                        host.base_url,
                        reason
                    );
                    last_error = Some(AppError::gateway(&host.base_url, reason));
                }
                Err(e) => {
                    log::warn!(
                        "Upload attempt {} to {} failed: {}",
                        attempt + 1,
                        host.base_url,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt + 1 < attempts {
                sleep(self.retry_config.backoff).await;
            }
        }

        if let Some(preview) = &file.preview {
            log::warn!(
                "All {} upload attempts failed for {}, embedding inline preview instead",
                attempts,
                file.file_name
            );
            return Ok(preview.clone());
        }

        Err(last_error.unwrap_or_else(|| AppError::upload_failed("no upload attempts were made")))
    }
}
