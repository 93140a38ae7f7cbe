use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chanwatch_core::alerting::{AccountAlert, AdminAlertSink};
use chanwatch_core::notifier::{ReviewNotice, ReviewerNotifier};
use chanwatch_types::events::ReviewAction;
use chanwatch_types::models::{DeliveryHandle, ProcessingStatus, Reviewer};

/// Longest text the Bot API accepts in one message.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Callback data prefix of the inert status button left on resolved items.
pub const ACKNOWLEDGED_PREFIX: &str = "done:";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Bot API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bot API rejected the call ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("Bot API rate limited, retry after {0}s")]
    RateLimited(u64),
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: SentChat,
}

#[derive(Debug, Deserialize)]
struct SentChat {
    id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineButton {
    fn action(text: &str, action: ReviewAction) -> Self {
        Self {
            text: text.to_string(),
            url: None,
            callback_data: Some(action.to_string()),
        }
    }

    fn link(text: &str, url: &str) -> Self {
        Self {
            text: text.to_string(),
            url: Some(url.to_string()),
            callback_data: None,
        }
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct MessageRef {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct EditReplyMarkup<'a> {
    chat_id: i64,
    message_id: i64,
    reply_markup: &'a InlineKeyboardMarkup,
}

#[derive(Serialize)]
struct AnswerCallback<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Bot API client used for reviewer notifications and admin alerts.
#[derive(Clone)]
pub struct BotClient {
    client: Client,
    base_url: String,
    token: String,
}

impl BotClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, payload: &P) -> Result<T, DeliveryError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let response: ApiResponse<T> = self.client.post(&url).json(payload).send().await?.json().await?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                error_code: Some(429),
                parameters,
                ..
            } => Err(DeliveryError::RateLimited(
                parameters.and_then(|p| p.retry_after).unwrap_or(1),
            )),
            ApiResponse {
                error_code,
                description,
                ..
            } => Err(DeliveryError::Api {
                code: error_code.unwrap_or_default(),
                description: description.unwrap_or_else(|| format!("{} returned no result", method)),
            }),
        }
    }

    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<DeliveryHandle, DeliveryError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text,
                    parse_mode,
                    disable_web_page_preview: true,
                    reply_markup: markup,
                },
            )
            .await?;
        Ok(DeliveryHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<(), DeliveryError> {
        let _: bool = self
            .call("answerCallbackQuery", &AnswerCallback { callback_query_id, text })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReviewerNotifier for BotClient {
    async fn deliver(&self, chat_id: i64, notice: &ReviewNotice) -> anyhow::Result<DeliveryHandle> {
        let (text, markup) = render_notice(notice);
        let handle = self.send(chat_id, &text, Some("HTML"), Some(&markup)).await?;
        debug!("Sent work item {} as message {}", notice.processing_id, handle.message_id);
        Ok(handle)
    }

    async fn retract(&self, handle: &DeliveryHandle) -> anyhow::Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                &MessageRef {
                    chat_id: handle.chat_id,
                    message_id: handle.message_id,
                },
            )
            .await?;
        Ok(())
    }

    async fn acknowledge(&self, handle: &DeliveryHandle, status: ProcessingStatus) -> anyhow::Result<()> {
        let markup = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineButton {
                text: outcome_label(status).to_string(),
                url: None,
                callback_data: Some(format!("{}{}", ACKNOWLEDGED_PREFIX, handle.message_id)),
            }]],
        };
        // editMessageReplyMarkup answers with the edited message.
        let _: serde_json::Value = self
            .call(
                "editMessageReplyMarkup",
                &EditReplyMarkup {
                    chat_id: handle.chat_id,
                    message_id: handle.message_id,
                    reply_markup: &markup,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        for chunk in split_message(text) {
            self.send(chat_id, &chunk, None, None).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AdminAlertSink for BotClient {
    async fn send_account_alert(&self, admin: &Reviewer, alert: &AccountAlert) -> anyhow::Result<()> {
        let (text, markup) = render_alert(alert);
        self.send(admin.telegram_id, &text, Some("HTML"), Some(&markup)).await?;
        Ok(())
    }
}

// -- Rendering --

pub fn render_notice(notice: &ReviewNotice) -> (String, InlineKeyboardMarkup) {
    let keywords = if notice.keywords.is_empty() {
        "-".to_string()
    } else {
        notice.keywords.iter().map(|k| escape_html(k)).collect::<Vec<_>>().join(", ")
    };

    let text = format!(
        "<b>{}</b>\nPublished: {}\nKeywords: {}\n\n{}",
        escape_html(&notice.channel_title),
        escape_html(&notice.published),
        keywords,
        escape_html(&notice.preview),
    );

    let mut top = Vec::new();
    if let Some(url) = &notice.url {
        top.push(InlineButton::link("Open source", url));
    }
    let mut decisions = Vec::new();
    for action in &notice.actions {
        match action {
            ReviewAction::ShowFull(_) => top.push(InlineButton::action("Show full text", *action)),
            ReviewAction::Processed(_) => decisions.push(InlineButton::action("Processed", *action)),
            ReviewAction::Postponed(_) => decisions.push(InlineButton::action("Postpone", *action)),
            ReviewAction::RepairAccount(_) => {}
        }
    }

    let inline_keyboard = [top, decisions].into_iter().filter(|row| !row.is_empty()).collect();
    (text, InlineKeyboardMarkup { inline_keyboard })
}

pub fn render_alert(alert: &AccountAlert) -> (String, InlineKeyboardMarkup) {
    let mut text = format!(
        "<b>Worker account needs attention</b>\nAccount: {} (#{})\nPhone: {}\nReason: {}",
        escape_html(&alert.name),
        alert.account_id,
        escape_html(&alert.phone),
        escape_html(&alert.reason),
    );
    if let Some(description) = alert.description.as_deref().filter(|d| !d.trim().is_empty()) {
        text.push_str(&format!("\nNote: {}", escape_html(description)));
    }

    let markup = InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineButton::action("Re-authorize", alert.repair)]],
    };
    (text, markup)
}

fn outcome_label(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::Processed => "Processed",
        ProcessingStatus::Postponed => "Postponed",
        ProcessingStatus::Ignored => "Handled by someone else",
        ProcessingStatus::Pending => "Pending",
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Split on character boundaries into Bot API sized chunks.
fn split_message(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(MAX_MESSAGE_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
