use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use order_notify_core::{plan, Plan, PresentationHints, SkipReason, StatusChange};
use order_notify_firebase::{
    AccessTokenSource, AuthError, ConditionalDelete, DatabaseError, MessagingClient,
    MessagingError, RealtimeDatabaseClient, ServiceAccountKey,
};
use order_notify_util::{AppConfig, Credentials, NotificationSettings};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const TOKEN_FIELD: &str = "fcmToken";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// How a single status change invocation ended. None of these are errors to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Skipped(SkipReason),
    Sent { message_name: String },
    DispatchFailed { error: String, token_pruned: bool },
}

impl NotifyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(reason) => reason.metric_label(),
            Self::Sent { .. } => "sent",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Skipped(reason) => json!({
                "outcome": self.label(),
                "detail": reason.to_string(),
            }),
            Self::Sent { message_name } => json!({
                "outcome": self.label(),
                "message": message_name,
            }),
            Self::DispatchFailed { token_pruned, .. } => json!({
                "outcome": self.label(),
                "token_pruned": token_pruned,
            }),
        }
    }
}

/// Reacts to order status writes by pushing the matching template to the
/// order's device.
///
/// Holds the database and messaging handles built once at startup; no other
/// state survives between invocations.
#[derive(Clone)]
pub struct StatusChangeNotifier {
    database: RealtimeDatabaseClient,
    messaging: MessagingClient,
    orders_path: String,
    hints: PresentationHints,
    prune_stale_tokens: bool,
}

impl StatusChangeNotifier {
    pub fn new(
        database: RealtimeDatabaseClient,
        messaging: MessagingClient,
        orders_path: impl Into<String>,
        hints: PresentationHints,
        prune_stale_tokens: bool,
    ) -> Self {
        Self {
            database,
            messaging,
            orders_path: orders_path.into(),
            hints,
            prune_stale_tokens,
        }
    }

    /// Builds the platform clients described by the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, SetupError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let tokens = match &config.firebase.credentials {
            Credentials::StaticToken(token) => AccessTokenSource::fixed(token.clone()),
            Credentials::ServiceAccountFile(path) => {
                let key = ServiceAccountKey::from_file(path)?;
                AccessTokenSource::service_account(&key, http.clone())?
            }
            Credentials::Anonymous => AccessTokenSource::anonymous(),
        };
        if config.environment.is_production() && config.firebase.credentials == Credentials::Anonymous {
            warn!(
                stage = "app",
                "no Firebase credentials configured; requests will be unauthenticated"
            );
        }
        info!(
            stage = "app",
            credentials = tokens.mode(),
            project_id = %config.firebase.project_id,
            "firebase clients configured"
        );

        let database = RealtimeDatabaseClient::new(
            &config.firebase.database_url,
            tokens.clone(),
            http.clone(),
        )?;
        let messaging = MessagingClient::new(
            config.firebase.project_id.clone(),
            config.firebase.fcm_base_url.clone(),
            tokens,
            http,
        );

        Ok(Self::new(
            database,
            messaging,
            config.orders_path.clone(),
            presentation_hints(&config.notification),
            config.prune_stale_tokens,
        ))
    }

    pub fn orders_path(&self) -> &str {
        &self.orders_path
    }

    /// Handles one status write: read, plan, dispatch.
    ///
    /// Always completes; every failure is logged and folded into the outcome.
    pub async fn handle(&self, change: &StatusChange, issued_at: DateTime<Utc>) -> NotifyOutcome {
        let order_id = change.order_id.as_str();
        info!(
            stage = "notifier",
            order_id,
            previous = change.previous.as_deref().unwrap_or("<none>"),
            current = %change.current,
            "order status changed"
        );

        let order = match self.database.fetch_order(&self.orders_path, order_id).await {
            Ok(order) => order,
            Err(err) => {
                error!(stage = "notifier", order_id, error = %err, "failed to read order record");
                return self.finish(NotifyOutcome::Skipped(SkipReason::OrderUnavailable));
            }
        };

        let decision = plan(change, order.as_ref(), &self.hints, issued_at);
        debug!(stage = "notifier", order_id, plan = %decision.redacted(), "planned notification");
        let message = match decision {
            Plan::Send(message) => message,
            Plan::Skip(reason) => {
                info!(stage = "notifier", order_id, reason = %reason, "notification not sent");
                return self.finish(NotifyOutcome::Skipped(reason));
            }
        };

        let start = Instant::now();
        let result = self.messaging.send(&message).await;
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(receipt) => {
                histogram!("notification_dispatch_seconds", "result" => "ok").record(elapsed);
                info!(
                    stage = "dispatch",
                    order_id,
                    status = %message.data.status,
                    response = %receipt.name,
                    "notification sent"
                );
                NotifyOutcome::Sent {
                    message_name: receipt.name,
                }
            }
            Err(err) => {
                histogram!("notification_dispatch_seconds", "result" => "error").record(elapsed);
                error!(
                    stage = "dispatch",
                    order_id,
                    kind = err.metric_label(),
                    error = %err,
                    "failed to send notification"
                );
                let token_pruned = self.prune_if_stale(order_id, &message.token, &err).await;
                NotifyOutcome::DispatchFailed {
                    error: err.to_string(),
                    token_pruned,
                }
            }
        };

        self.finish(outcome)
    }

    /// Removes the order's token after an unregistered-token failure, unless
    /// the client has stored a different token since it was read.
    async fn prune_if_stale(&self, order_id: &str, token: &str, err: &MessagingError) -> bool {
        if !self.prune_stale_tokens || !err.is_unregistered_token() {
            return false;
        }

        let expected = Value::String(token.to_string());
        match self
            .database
            .delete_child_if(&self.orders_path, order_id, TOKEN_FIELD, &expected)
            .await
        {
            Ok(ConditionalDelete::Deleted) => {
                counter!("stale_tokens_pruned_total").increment(1);
                info!(stage = "prune", order_id, "removed unregistered recipient token");
                true
            }
            Ok(ConditionalDelete::Changed) => {
                info!(
                    stage = "prune",
                    order_id,
                    "recipient token changed after dispatch; kept"
                );
                false
            }
            Err(prune_err) => {
                error!(
                    stage = "prune",
                    order_id,
                    error = %prune_err,
                    "failed to remove unregistered recipient token"
                );
                false
            }
        }
    }

    fn finish(&self, outcome: NotifyOutcome) -> NotifyOutcome {
        counter!("notifications_total", "outcome" => outcome.label()).increment(1);
        outcome
    }
}

fn presentation_hints(settings: &NotificationSettings) -> PresentationHints {
    PresentationHints {
        link: settings.click_link.clone(),
        icon: settings.icon.clone(),
        badge: settings.badge.clone(),
        vibrate: settings.vibrate.clone(),
    }
}

/// Errors raised while wiring the platform clients at startup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid credentials: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid database configuration: {0}")]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use httpmock::MockServer;
    use url::Url;

    pub const ORDERS_PATH: &str = "delivery_pedidos";
    pub const PROJECT_ID: &str = "demo-project";
    pub const SEND_PATH: &str = "/v1/projects/demo-project/messages:send";

    pub fn notifier(
        database: &MockServer,
        fcm: &MockServer,
        prune_stale_tokens: bool,
    ) -> StatusChangeNotifier {
        let http = reqwest::Client::builder().build().expect("client");
        let tokens = AccessTokenSource::fixed("owner");
        let database = RealtimeDatabaseClient::new(&database.url("/"), tokens.clone(), http.clone())
            .expect("database client");
        let messaging = MessagingClient::new(
            PROJECT_ID,
            Url::parse(&fcm.url("/v1/")).expect("url"),
            tokens,
            http,
        );
        StatusChangeNotifier::new(
            database,
            messaging,
            ORDERS_PATH,
            PresentationHints::default(),
            prune_stale_tokens,
        )
    }

    pub fn order_path(order_id: &str) -> String {
        format!("/{ORDERS_PATH}/{order_id}.json")
    }

    pub fn token_path(order_id: &str) -> String {
        format!("/{ORDERS_PATH}/{order_id}/fcmToken.json")
    }
}
