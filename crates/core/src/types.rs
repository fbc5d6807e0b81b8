use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Order record stored under `/<orders>/<orderId>`.
///
/// Only the fields needed to address and label a notification are typed;
/// everything else written by the order application is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "codigo", default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
    #[serde(rename = "fcmToken", default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// Returns the recipient token when one is present and non-blank.
    pub fn recipient_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Returns the human-facing order code: `codigo`, else a legacy `code` field.
    pub fn display_code(&self) -> Option<String> {
        self.code
            .clone()
            .or_else(|| self.extra.get("code").and_then(code_text))
            .filter(|code| !code.trim().is_empty())
    }
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(code_text))
}

/// A single write to an order's status attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub order_id: String,
    pub previous: Option<String>,
    pub current: String,
}

impl StatusChange {
    pub fn new(
        order_id: impl Into<String>,
        previous: Option<String>,
        current: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            previous,
            current: current.into(),
        }
    }
}

/// Web-push presentation hints attached to each message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationHints {
    pub link: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for PresentationHints {
    fn default() -> Self {
        Self {
            link: "https://seu-site.com/index.html".to_string(),
            icon: "/img/logo.png".to_string(),
            badge: "/img/badge.png".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

/// Outbound push message in the shape accepted by the FCM HTTP v1 API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub notification: NotificationContent,
    pub data: MessageData,
    pub webpush: WebpushConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

/// Side-channel data delivered to the client app. FCM requires string values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageData {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "codigo")]
    pub code: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebpushConfig {
    pub fcm_options: WebpushFcmOptions,
    pub notification: WebpushNotification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebpushFcmOptions {
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebpushNotification {
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

/// Why an invocation ended without dispatching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    OrderMissing,
    OrderUnavailable,
    TokenMissing,
    UnknownStatus(String),
}

impl SkipReason {
    /// Returns the metrics label associated with the reason.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::OrderMissing => "skipped_order_missing",
            Self::OrderUnavailable => "skipped_order_unavailable",
            Self::TokenMissing => "skipped_token_missing",
            Self::UnknownStatus(_) => "skipped_unknown_status",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderMissing => write!(f, "order record not found"),
            Self::OrderUnavailable => write!(f, "order record could not be read"),
            Self::TokenMissing => write!(f, "order has no recipient token"),
            Self::UnknownStatus(status) => write!(f, "no template for status {status:?}"),
        }
    }
}
