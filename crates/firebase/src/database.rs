use order_notify_core::Order;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::auth::{AccessTokenSource, AuthError};

const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

/// Result of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalDelete {
    Deleted,
    /// The stored value no longer matched; nothing was removed.
    Changed,
}

/// Client for the Realtime Database REST API.
#[derive(Clone)]
pub struct RealtimeDatabaseClient {
    http: Client,
    base_url: Url,
    base_query: Vec<(String, String)>,
    tokens: AccessTokenSource,
}

impl RealtimeDatabaseClient {
    /// Creates a client rooted at `database_url`.
    ///
    /// Query parameters on the URL (such as the emulator's `ns`) are kept and
    /// sent with every request.
    pub fn new(
        database_url: &str,
        tokens: AccessTokenSource,
        http: Client,
    ) -> Result<Self, DatabaseError> {
        let mut base_url = Url::parse(database_url)?;
        if base_url.cannot_be_a_base() {
            return Err(DatabaseError::InvalidBaseUrl(database_url.to_string()));
        }
        let base_query = base_url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        base_url.set_query(None);

        Ok(Self {
            http,
            base_url,
            base_query,
            tokens,
        })
    }

    /// Reads `/<collection>/<order_id>`. A JSON `null` means the order does not exist.
    pub async fn fetch_order(
        &self,
        collection: &str,
        order_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let url = self.url_for(&[collection, order_id])?;
        let response = self.request(Method::GET, url).await?.send().await?;
        let response = ensure_success(response).await?;

        match response.json::<Value>().await? {
            Value::Null => Ok(None),
            value @ Value::Object(_) => Ok(Some(serde_json::from_value(value)?)),
            other => Err(DatabaseError::UnexpectedShape(type_name(&other))),
        }
    }

    /// Removes `/<collection>/<order_id>/<child>` only while it still holds `expected`.
    ///
    /// The current value is read with its ETag and the delete is sent with
    /// `if-match`, so a value rewritten in between is left in place.
    pub async fn delete_child_if(
        &self,
        collection: &str,
        order_id: &str,
        child: &str,
        expected: &Value,
    ) -> Result<ConditionalDelete, DatabaseError> {
        let url = self.url_for(&[collection, order_id, child])?;

        let response = self
            .request(Method::GET, url.clone())
            .await?
            .header(ETAG_REQUEST_HEADER, "true")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let etag = response
            .headers()
            .get(header::ETAG)
            .cloned()
            .ok_or(DatabaseError::MissingEtag)?;
        let current: Value = response.json().await?;
        if &current != expected {
            return Ok(ConditionalDelete::Changed);
        }

        let response = self
            .request(Method::DELETE, url)
            .await?
            .header(header::IF_MATCH, etag)
            .send()
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(ConditionalDelete::Changed);
        }
        ensure_success(response).await?;
        Ok(ConditionalDelete::Deleted)
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url, DatabaseError> {
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(DatabaseError::InvalidPath(segments.join("/")));
        }

        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| DatabaseError::InvalidBaseUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            if let Some((last, parents)) = segments.split_last() {
                path.extend(parents);
                path.push(&format!("{last}.json"));
            }
        }
        if !self.base_query.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.base_query {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
    ) -> Result<reqwest::RequestBuilder, DatabaseError> {
        let builder = self.http.request(method, url);
        Ok(match self.tokens.access_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors produced by the Realtime Database client.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("database url cannot be used as a base: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid database path: {0}")]
    InvalidPath(String),
    #[error("failed to obtain access token: {0}")]
    Auth(#[from] AuthError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode order record: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("expected an object at order path, found {0}")]
    UnexpectedShape(&'static str),
    #[error("database response did not carry an ETag")]
    MissingEtag,
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<Response, DatabaseError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(DatabaseError::Status { status, body });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer, tokens: AccessTokenSource) -> RealtimeDatabaseClient {
        RealtimeDatabaseClient::new(
            &server.url("/"),
            tokens,
            Client::builder().build().expect("client"),
        )
        .expect("database client")
    }

    #[tokio::test]
    async fn fetch_order_parses_record() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::fixed("owner"));

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/delivery_pedidos/abc123.json")
                    .header("Authorization", "Bearer owner");
                then.status(200).json_body(json!({
                    "codigo": "0007",
                    "fcmToken": "tok_xyz",
                    "status": "Em Preparo",
                    "cliente": "Maria"
                }));
            })
            .await;

        let order = client
            .fetch_order("delivery_pedidos", "abc123")
            .await
            .expect("fetch order")
            .expect("order present");
        mock.assert_async().await;

        assert_eq!(order.code.as_deref(), Some("0007"));
        assert_eq!(order.recipient_token(), Some("tok_xyz"));
        assert_eq!(order.extra.get("cliente"), Some(&json!("Maria")));
    }

    #[tokio::test]
    async fn fetch_order_returns_none_for_null() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/delivery_pedidos/missing.json");
                then.status(200).body("null");
            })
            .await;

        let order = client
            .fetch_order("delivery_pedidos", "missing")
            .await
            .expect("fetch order");
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn preserves_namespace_query_from_base_url() {
        let server = MockServer::start_async().await;
        let client = RealtimeDatabaseClient::new(
            &server.url("/?ns=demo-project"),
            AccessTokenSource::anonymous(),
            Client::new(),
        )
        .expect("database client");

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/orders/o-1.json")
                    .query_param("ns", "demo-project");
                then.status(200).json_body(json!({ "codigo": "1" }));
            })
            .await;

        client.fetch_order("orders", "o-1").await.expect("fetch");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_object_record_is_rejected() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/o-1.json");
                then.status(200).json_body(json!("Pendente"));
            })
            .await;

        let err = client
            .fetch_order("orders", "o-1")
            .await
            .expect_err("string record should error");
        assert!(matches!(err, DatabaseError::UnexpectedShape("string")));
    }

    #[tokio::test]
    async fn conditional_delete_sends_if_match() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::fixed("owner"));

        let read = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/delivery_pedidos/abc123/fcmToken.json")
                    .header("X-Firebase-ETag", "true")
                    .header("Authorization", "Bearer owner");
                then.status(200)
                    .header("ETag", "etag-1")
                    .json_body(json!("stale"));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/delivery_pedidos/abc123/fcmToken.json")
                    .header("if-match", "etag-1");
                then.status(200).body("null");
            })
            .await;

        let result = client
            .delete_child_if("delivery_pedidos", "abc123", "fcmToken", &json!("stale"))
            .await
            .expect("delete");
        read.assert_async().await;
        delete.assert_async().await;
        assert_eq!(result, ConditionalDelete::Deleted);
    }

    #[tokio::test]
    async fn conditional_delete_keeps_rewritten_value() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/o-1/fcmToken.json");
                then.status(200)
                    .header("ETag", "etag-2")
                    .json_body(json!("fresh"));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE);
                then.status(200).body("null");
            })
            .await;

        let result = client
            .delete_child_if("orders", "o-1", "fcmToken", &json!("stale"))
            .await
            .expect("delete");
        delete.assert_hits_async(0).await;
        assert_eq!(result, ConditionalDelete::Changed);
    }

    #[tokio::test]
    async fn conditional_delete_treats_precondition_failure_as_changed() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/o-1/fcmToken.json");
                then.status(200)
                    .header("ETag", "etag-3")
                    .json_body(json!("stale"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/orders/o-1/fcmToken.json");
                then.status(412).json_body(json!({ "error": "ETag mismatch" }));
            })
            .await;

        let result = client
            .delete_child_if("orders", "o-1", "fcmToken", &json!("stale"))
            .await
            .expect("delete");
        assert_eq!(result, ConditionalDelete::Changed);
    }

    #[tokio::test]
    async fn conditional_delete_requires_etag() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/o-1/fcmToken.json");
                then.status(200).json_body(json!("stale"));
            })
            .await;

        let err = client
            .delete_child_if("orders", "o-1", "fcmToken", &json!("stale"))
            .await
            .expect_err("missing etag should error");
        assert!(matches!(err, DatabaseError::MissingEtag));
    }

    #[tokio::test]
    async fn error_status_returns_message() {
        let server = MockServer::start_async().await;
        let client = client(&server, AccessTokenSource::anonymous());

        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders/o-1.json");
                then.status(401)
                    .json_body(json!({ "error": "Permission denied" }));
            })
            .await;

        let err = client
            .fetch_order("orders", "o-1")
            .await
            .expect_err("should error");
        match err {
            DatabaseError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(body.contains("Permission denied"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_segments_and_opaque_urls() {
        let client = RealtimeDatabaseClient::new(
            "https://demo.firebaseio.com",
            AccessTokenSource::anonymous(),
            Client::new(),
        )
        .expect("database client");
        assert!(matches!(
            client.url_for(&["orders", ""]),
            Err(DatabaseError::InvalidPath(_))
        ));
        assert_eq!(
            client.url_for(&["orders", "o 1"]).expect("url").as_str(),
            "https://demo.firebaseio.com/orders/o%201.json"
        );

        assert!(matches!(
            RealtimeDatabaseClient::new("mailto:ops@example.com", AccessTokenSource::anonymous(), Client::new()),
            Err(DatabaseError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            RealtimeDatabaseClient::new("SUA_DATABASE_URL", AccessTokenSource::anonymous(), Client::new()),
            Err(DatabaseError::Url(_))
        ));
    }
}
