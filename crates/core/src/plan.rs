use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::status::{lookup_template, StatusTemplate};
use crate::types::{
    MessageData, NotificationContent, Order, PresentationHints, PushMessage, SkipReason,
    StatusChange, WebpushConfig, WebpushFcmOptions, WebpushNotification,
};

/// Result of evaluating a status change against the order record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Skip(SkipReason),
    Send(PushMessage),
}

impl Plan {
    /// Returns the message to dispatch, if any.
    pub fn message(&self) -> Option<&PushMessage> {
        match self {
            Self::Send(message) => Some(message),
            Self::Skip(_) => None,
        }
    }

    /// Produces a redacted JSON representation suitable for logs.
    pub fn redacted(&self) -> Value {
        match self {
            Self::Skip(reason) => json!({
                "action": "skip",
                "reason": reason.metric_label(),
            }),
            Self::Send(message) => json!({
                "action": "send",
                "title": message.notification.title,
                "status": message.data.status,
                "token": "***",
            }),
        }
    }
}

/// Decides what, if anything, should be sent for a status change.
///
/// The order record is checked before the template, so an order without a
/// recipient is reported as such even when its status is unknown.
pub fn plan(
    change: &StatusChange,
    order: Option<&Order>,
    hints: &PresentationHints,
    issued_at: DateTime<Utc>,
) -> Plan {
    let Some(order) = order else {
        return Plan::Skip(SkipReason::OrderMissing);
    };
    let Some(token) = order.recipient_token() else {
        return Plan::Skip(SkipReason::TokenMissing);
    };
    let Some((status, template)) = lookup_template(&change.current) else {
        return Plan::Skip(SkipReason::UnknownStatus(change.current.clone()));
    };

    let code = order
        .display_code()
        .unwrap_or_else(|| change.order_id.clone());

    Plan::Send(PushMessage {
        token: token.to_string(),
        notification: NotificationContent {
            title: template.title.to_string(),
            body: compose_body(&code, template),
        },
        data: MessageData {
            order_id: change.order_id.clone(),
            code,
            status: status.as_str().to_string(),
            timestamp: issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        },
        webpush: WebpushConfig {
            fcm_options: WebpushFcmOptions {
                link: hints.link.clone(),
            },
            notification: WebpushNotification {
                icon: hints.icon.clone(),
                badge: hints.badge.clone(),
                vibrate: hints.vibrate.clone(),
            },
        },
    })
}

/// Formats the customer-facing body, prefixed with the order code.
pub fn compose_body(code: &str, template: &StatusTemplate) -> String {
    format!("Pedido {code}: {}", template.body)
}
