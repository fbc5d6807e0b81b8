use order_notify_core::PushMessage;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::auth::{AccessTokenSource, AuthError};

/// Client for the FCM HTTP v1 `messages:send` endpoint.
#[derive(Clone)]
pub struct MessagingClient {
    http: Client,
    base_url: Url,
    project_id: String,
    tokens: AccessTokenSource,
}

impl MessagingClient {
    /// `base_url` is the API root, e.g. `https://fcm.googleapis.com/v1/`.
    pub fn new(
        project_id: impl Into<String>,
        base_url: Url,
        tokens: AccessTokenSource,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            project_id: project_id.into(),
            tokens,
        }
    }

    /// Sends a single message and returns the provider-assigned message name.
    pub async fn send(&self, message: &PushMessage) -> Result<SendReceipt, MessagingError> {
        let url = self
            .base_url
            .join(&format!("projects/{}/messages:send", self.project_id))?;

        let mut request = self.http.post(url).json(&SendRequest { message });
        if let Some(token) = self.tokens.access_token().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        parse_receipt(response).await
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a PushMessage,
}

/// Successful send response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    pub name: String,
}

/// Errors produced by the messaging client.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to obtain access token: {0}")]
    Auth(#[from] AuthError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} ({}): {body}", .error_code.as_deref().unwrap_or("no error code"))]
    Status {
        status: StatusCode,
        error_code: Option<String>,
        body: String,
    },
}

impl MessagingError {
    /// Returns `true` when FCM reports the registration token as no longer valid.
    pub fn is_unregistered_token(&self) -> bool {
        match self {
            Self::Status {
                status, error_code, ..
            } => error_code.as_deref() == Some("UNREGISTERED") || *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }

    /// Returns the metrics label associated with the failure.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Auth(_) => "auth",
            Self::Http(_) => "transport",
            Self::Status { .. } if self.is_unregistered_token() => "unregistered",
            Self::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => "quota",
            Self::Status { status, .. } if status.is_server_error() => "unavailable",
            Self::Status { .. } => "rejected",
        }
    }
}

async fn parse_receipt(response: Response) -> Result<SendReceipt, MessagingError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        let error_code = extract_error_code(&body);
        return Err(MessagingError::Status {
            status,
            error_code,
            body,
        });
    }

    Ok(response.json().await?)
}

/// Pulls the FCM `errorCode` detail out of a Google API error body, falling
/// back to the generic `error.status`.
fn extract_error_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("details")
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|detail| detail.get("errorCode").and_then(Value::as_str))
        })
        .or_else(|| error.get("status").and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use httpmock::prelude::*;
    use order_notify_core::{plan, Order, PresentationHints, StatusChange};
    use serde_json::json;

    fn client(server: &MockServer) -> MessagingClient {
        MessagingClient::new(
            "demo-project",
            Url::parse(&server.url("/v1/")).expect("url"),
            AccessTokenSource::fixed("ya29.token"),
            Client::builder().build().expect("client"),
        )
    }

    fn message() -> PushMessage {
        let order = Order {
            code: Some("0007".to_string()),
            fcm_token: Some("tok_xyz".to_string()),
            ..Order::default()
        };
        let issued_at: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("time")
            .with_timezone(&Utc);
        plan(
            &StatusChange::new("abc123", None, "Em Preparo"),
            Some(&order),
            &PresentationHints::default(),
            issued_at,
        )
        .message()
        .cloned()
        .expect("message")
    }

    #[tokio::test]
    async fn send_posts_message_envelope() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/demo-project/messages:send")
                    .header("Authorization", "Bearer ya29.token")
                    .json_body(json!({
                        "message": {
                            "token": "tok_xyz",
                            "notification": {
                                "title": "👨‍🍳 Preparando seu Pedido!",
                                "body": "Pedido 0007: Estamos preparando seu pedido com muito carinho!"
                            },
                            "data": {
                                "orderId": "abc123",
                                "codigo": "0007",
                                "status": "Em Preparo",
                                "timestamp": "2024-01-01T00:00:00.000Z"
                            },
                            "webpush": {
                                "fcm_options": { "link": "https://seu-site.com/index.html" },
                                "notification": {
                                    "icon": "/img/logo.png",
                                    "badge": "/img/badge.png",
                                    "vibrate": [200, 100, 200]
                                }
                            }
                        }
                    }));
                then.status(200).json_body(json!({
                    "name": "projects/demo-project/messages/0:1500415314455276%31bd1c9631bd1c96"
                }));
            })
            .await;

        let receipt = client.send(&message()).await.expect("send");
        mock.assert_async().await;
        assert!(receipt.name.starts_with("projects/demo-project/messages/"));
    }

    #[tokio::test]
    async fn unregistered_token_is_classified() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/projects/demo-project/messages:send");
                then.status(404).json_body(json!({
                    "error": {
                        "code": 404,
                        "message": "Requested entity was not found.",
                        "status": "NOT_FOUND",
                        "details": [{
                            "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                            "errorCode": "UNREGISTERED"
                        }]
                    }
                }));
            })
            .await;

        let err = client.send(&message()).await.expect_err("should error");
        assert!(err.is_unregistered_token());
        assert_eq!(err.metric_label(), "unregistered");
        match err {
            MessagingError::Status { error_code, .. } => {
                assert_eq!(error_code.as_deref(), Some("UNREGISTERED"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn quota_and_outage_are_not_token_failures() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/projects/demo-project/messages:send");
                then.status(429).json_body(json!({
                    "error": { "code": 429, "status": "RESOURCE_EXHAUSTED", "details": [{
                        "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                        "errorCode": "QUOTA_EXCEEDED"
                    }]}
                }));
            })
            .await;

        let err = client.send(&message()).await.expect_err("should error");
        assert!(!err.is_unregistered_token());
        assert_eq!(err.metric_label(), "quota");
    }

    #[test]
    fn error_code_falls_back_to_status() {
        let body = json!({ "error": { "code": 503, "status": "UNAVAILABLE" } }).to_string();
        assert_eq!(extract_error_code(&body).as_deref(), Some("UNAVAILABLE"));
        assert_eq!(extract_error_code("<html>bad gateway</html>"), None);
    }
}
