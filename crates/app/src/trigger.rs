use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use order_notify_core::StatusChange;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub(crate) const HEADER_TIMESTAMP: &str = "X-Trigger-Timestamp";
pub(crate) const HEADER_SIGNATURE: &str = "X-Trigger-Signature";

const MAX_SKEW_SECS: i64 = 600;

/// Change event posted by the database trigger binding.
#[derive(Debug, Deserialize)]
struct TriggerPayload {
    path: String,
    #[serde(default)]
    before: Value,
    #[serde(default)]
    after: Value,
}

/// Handles a signed status write.
///
/// Only updates of an existing status notify: a status written for the first
/// time, or rewritten with the same value, is acknowledged as `ignored`.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    match accept(&state, &headers, &body) {
        Ok(change) => {
            if let Some(reason) = ignore_reason(&change) {
                counter!("trigger_requests_total", "result" => "ignored").increment(1);
                info!(
                    stage = "trigger",
                    order_id = %change.order_id,
                    reason,
                    "status write ignored"
                );
                let body = json!({
                    "outcome": "ignored",
                    "detail": reason,
                    "order_id": change.order_id,
                });
                return Ok((StatusCode::OK, Json(body)).into_response());
            }
            counter!("trigger_requests_total", "result" => "accepted").increment(1);
            Ok(dispatch(&state, change).await)
        }
        Err(problem) => {
            counter!("trigger_requests_total", "result" => problem.problem_type()).increment(1);
            warn!(
                stage = "trigger",
                status = problem.status().as_u16(),
                problem = problem.problem_type(),
                "trigger request rejected"
            );
            Err(problem)
        }
    }
}

/// Authenticates the request and turns it into a status change.
fn accept(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<StatusChange, ProblemResponse> {
    let timestamp_raw = get_required_header(headers, HEADER_TIMESTAMP)?;
    let signature = get_required_header(headers, HEADER_SIGNATURE)?;

    let timestamp = parse_timestamp(timestamp_raw)
        .map_err(|err| ProblemResponse::bad_request("invalid_timestamp", err))?;

    let now = state.now();
    let skew = now.signed_duration_since(timestamp).num_seconds().abs();
    if skew > MAX_SKEW_SECS {
        return Err(ProblemResponse::bad_request(
            "timestamp_out_of_range",
            "timestamp outside the allowed ±10 minute window",
        ));
    }

    verify_signature(state.trigger_secret(), timestamp_raw, body, signature)
        .map_err(|err| ProblemResponse::new(StatusCode::FORBIDDEN, "invalid_signature", err))?;

    let payload: TriggerPayload = serde_json::from_slice(body).map_err(|err| {
        ProblemResponse::bad_request("invalid_json", format!("failed to parse payload: {err}"))
    })?;

    let order_id = parse_status_path(&payload.path, state.notifier().orders_path())
        .ok_or_else(|| {
            ProblemResponse::bad_request(
                "invalid_path",
                format!(
                    "path must look like /{}/<orderId>/status",
                    state.notifier().orders_path()
                ),
            )
        })?;

    let current = match payload.after {
        Value::String(status) => status,
        _ => {
            return Err(ProblemResponse::bad_request(
                "invalid_status",
                "after must be a string status value",
            ))
        }
    };
    let previous = match payload.before {
        Value::String(status) => Some(status),
        _ => None,
    };

    Ok(StatusChange::new(order_id, previous, current))
}

fn ignore_reason(change: &StatusChange) -> Option<&'static str> {
    match change.previous.as_deref() {
        None => Some("status_created"),
        Some(previous) if previous == change.current => Some("status_unchanged"),
        Some(_) => None,
    }
}

async fn dispatch(state: &AppState, change: StatusChange) -> Response {
    let invocation_id = Uuid::new_v4();
    let start = Instant::now();
    let span = info_span!(
        "invocation",
        %invocation_id,
        order_id = %change.order_id
    );

    let outcome = state
        .notifier()
        .handle(&change, state.now())
        .instrument(span)
        .await;

    let mut body = outcome.to_json();
    if let Some(object) = body.as_object_mut() {
        object.insert("order_id".to_string(), Value::String(change.order_id));
        object.insert(
            "invocation_id".to_string(),
            Value::String(invocation_id.to_string()),
        );
        object.insert(
            "latency_ms".to_string(),
            Value::from(start.elapsed().as_secs_f64() * 1000.0),
        );
    }

    (StatusCode::OK, Json(body)).into_response()
}

/// Extracts the order id from `/<orders>/<orderId>/status`.
fn parse_status_path(path: &str, orders_path: &str) -> Option<String> {
    let mut segments = path.trim_start_matches('/').trim_end_matches('/').split('/');
    let collection = segments.next()?;
    let order_id = segments.next()?;
    let leaf = segments.next()?;
    if segments.next().is_some()
        || collection != orders_path
        || leaf != "status"
        || order_id.is_empty()
    {
        return None;
    }
    Some(order_id.to_string())
}

fn get_required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ProblemResponse::bad_request("missing_header", format!("missing header {name}"))
        })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC3339 timestamp: {err}"))
}

fn verify_signature(
    secret: &[u8],
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> Result<(), String> {
    let hex_part = provided
        .strip_prefix("sha256=")
        .ok_or_else(|| "signature must start with 'sha256='".to_string())?;
    let provided_bytes =
        hex::decode(hex_part).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}
