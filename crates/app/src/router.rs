use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use order_notify_util::ClientBootstrap;

use crate::notifier::StatusChangeNotifier;
use crate::{telemetry, trigger};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    notifier: StatusChangeNotifier,
    trigger_secret: Arc<[u8]>,
    client: Arc<ClientBootstrap>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        notifier: StatusChangeNotifier,
        trigger_secret: Arc<[u8]>,
        client: ClientBootstrap,
    ) -> Self {
        Self {
            metrics,
            notifier,
            trigger_secret,
            client: Arc::new(client),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn notifier(&self) -> &StatusChangeNotifier {
        &self.notifier
    }

    pub fn trigger_secret(&self) -> &[u8] {
        &self.trigger_secret
    }

    pub fn client_bootstrap(&self) -> &ClientBootstrap {
        &self.client
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/client-config", get(client_config))
        .route("/triggers/order-status", post(trigger::handle))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Public web-client bootstrap values; these are not secrets.
async fn client_config(State(state): State<AppState>) -> Json<ClientBootstrap> {
    Json(state.client_bootstrap().clone())
}
