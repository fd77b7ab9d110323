//! Telegram Bot API delivery backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::dispatch::Messenger;
use crate::error::DeliveryError;
use crate::store::Destination;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Messenger implementation that posts to the Bot API sendMessage method
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            bot_token: bot_token.into(),
        })
    }

    fn payload<'a>(destination: &Destination, text: &'a str) -> SendMessage<'a> {
        let (chat_id, thread_id) = destination.delivery_key();
        SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: false,
            message_thread_id: thread_id,
        }
    }
}

#[async_trait]
impl Messenger for TelegramNotifier {
    async fn deliver(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = Self::payload(destination, text);

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError(format!("sendMessage request failed: {}", e)))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError(format!("Malformed Bot API response: {}", e)))?;

        if !body.ok {
            return Err(DeliveryError(format!(
                "Bot API rejected sendMessage ({}): {}",
                status,
                body.description.unwrap_or_else(|| "no description".into()),
            )));
        }

        debug!("sendMessage delivered to chat {}", payload.chat_id);
        Ok(())
    }
}
