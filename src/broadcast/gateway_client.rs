use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::commands::{Account, MediaFile};
use crate::errors::{AppError, AppResult};

use super::hosts::HostEndpoint;

/// Operations the broadcaster needs from a messaging gateway host.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn upload_media(
        &self,
        host: &HostEndpoint,
        account: &Account,
        file: &MediaFile,
    ) -> AppResult<MediaUploadResponse>;

    async fn send_chat(
        &self,
        host: &HostEndpoint,
        account: &Account,
        to: &str,
        body: &str,
    ) -> AppResult<SendResponse>;

    async fn send_image(
        &self,
        host: &HostEndpoint,
        account: &Account,
        to: &str,
        image: &str,
        caption: &str,
    ) -> AppResult<SendResponse>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaUploadResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl MediaUploadResponse {
    /// Explicit rejection reported by the gateway, from `error` or `message`.
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .or(self.message.as_ref())
            .map(value_to_text)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub sent: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl SendResponse {
    /// The gateway reports `sent` as either a boolean or the string "true".
    pub fn is_sent(&self) -> bool {
        match &self.sent {
            Some(Value::Bool(sent)) => *sent,
            Some(Value::String(sent)) => sent == "true",
            _ => false,
        }
    }

    pub fn describe_failure(&self) -> String {
        self.error
            .as_ref()
            .or(self.message.as_ref())
            .map(value_to_text)
            .unwrap_or_else(|| "gateway did not confirm delivery".to_string())
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    token: &'a str,
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ImagePayload<'a> {
    token: &'a str,
    to: &'a str,
    image: &'a str,
    caption: &'a str,
}

/// reqwest-backed client for the UltraMsg REST API
pub struct UltraMsgClient {
    client: Client,
    upload_timeout: Duration,
    send_timeout: Duration,
}

impl UltraMsgClient {
    pub fn new(upload_timeout: Duration, send_timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("whatsapp-broadcaster/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            upload_timeout,
            send_timeout,
        })
    }

    async fn read_json<T: DeserializeOwned>(host: &HostEndpoint, response: Response) -> AppResult<T> {
        let status = response.status();
        let body = response.text().await?;

        log::debug!(
            "Gateway {} responded {} (first 300 chars): {}",
            host.base_url,
            status,
            &body[..floor_char_boundary(&body, 300)]
        );

        serde_json::from_str(&body).map_err(|_| {
            AppError::gateway(
                &host.base_url,
                format!(
                    "HTTP {} with non-JSON body: {}",
                    status,
                    &body[..floor_char_boundary(&body, 200)]
                ),
            )
        })
    }

    async fn post_json<P: Serialize + ?Sized>(
        &self,
        host: &HostEndpoint,
        url: &str,
        payload: &P,
    ) -> AppResult<SendResponse> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(self.send_timeout)
            .send()
            .await?;

        Self::read_json(host, response).await
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let mut index = max;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[async_trait]
impl MessageGateway for UltraMsgClient {
    async fn upload_media(
        &self,
        host: &HostEndpoint,
        account: &Account,
        file: &MediaFile,
    ) -> AppResult<MediaUploadResponse> {
        let url = host.instance_url(account, "media/upload");

        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)?;
        let form = multipart::Form::new().part("file", part);

        log::debug!("Uploading {} to {}", file.file_name, url);

        let response = self
            .client
            .post(&url)
            .query(&[("token", account.token.as_str())])
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;

        Self::read_json(host, response).await
    }

    async fn send_chat(
        &self,
        host: &HostEndpoint,
        account: &Account,
        to: &str,
        body: &str,
    ) -> AppResult<SendResponse> {
        let url = host.instance_url(account, "messages/chat");
        let payload = ChatPayload {
            token: &account.token,
            to,
            body,
        };
        self.post_json(host, &url, &payload).await
    }

    async fn send_image(
        &self,
        host: &HostEndpoint,
        account: &Account,
        to: &str,
        image: &str,
        caption: &str,
    ) -> AppResult<SendResponse> {
        let url = host.instance_url(account, "messages/image");
        let payload = ImagePayload {
            token: &account.token,
            to,
            image,
            caption,
        };
        self.post_json(host, &url, &payload).await
    }
}
