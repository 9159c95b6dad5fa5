//! PostgREST client (the REST face of the hosted Postgres backend).
//!
//! Thin: every call is one HTTP request against `<url>/rest/v1/<table>`.
//! Selects carry `order=id.asc` with `limit`/`offset` when paged, because the
//! server silently truncates a response at its `max-rows` setting.
//! Writes ask for `Prefer: return=representation` so the server-normalized
//! row comes back and can be mirrored locally.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::types::format_timestamp;

use super::{RemoteError, RemoteErrorKind, RemoteStore, SelectFilter};

/// Postgres "insufficient_privilege", raised by row-level security.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";
/// PostgREST "no rows" for single-object responses.
const PGRST_NO_ROWS: &str = "PGRST116";

/// Error body shape returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

pub struct PostgrestClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    /// Session token of the signed-in user; falls back to the anon key.
    access_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for PostgrestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestClient")
            .field("base_url", &self.base_url)
            .field("has_session", &self.access_token.read().is_some())
            .finish()
    }
}

impl PostgrestClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        if config.url.trim().is_empty() || config.anon_key.trim().is_empty() {
            tracing::error!("remote url or anon key missing; remote calls will fail");
        }
        let http = HttpClient::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                RemoteError::with_kind(format!("http client: {e}"), RemoteErrorKind::Rejected)
            })?;
        Ok(Self {
            http,
            base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            api_key: config.anon_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the signed-in user's token (or clear it on sign-out).
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        self.http
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    fn select_request(&self, table: &str, filter: &SelectFilter) -> RequestBuilder {
        let mut query = vec![("select".to_string(), "*".to_string())];
        if let Some(since) = filter.updated_since {
            query.push((
                "updated_at".to_string(),
                format!("gte.{}", format_timestamp(since)),
            ));
        }
        if let Some(limit) = filter.limit {
            query.push(("order".to_string(), "id.asc".to_string()));
            query.push(("limit".to_string(), limit.to_string()));
            query.push(("offset".to_string(), filter.offset.to_string()));
        }
        self.request(Method::GET, table).query(&query)
    }

    fn by_id(&self, method: Method, table: &str, id: &str) -> RequestBuilder {
        self.request(method, table)
            .query(&[("id", format!("eq.{id}"))])
    }
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn select(&self, table: &str, filter: &SelectFilter) -> Result<Vec<Value>, RemoteError> {
        match send(self.select_request(table, filter)).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(unexpected_shape("select", &other)),
        }
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value, RemoteError> {
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(row);
        first_row(send(req).await?).ok_or_else(|| {
            RemoteError::with_kind("insert returned no row", RemoteErrorKind::Rejected)
        })
    }

    async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<Value, RemoteError> {
        let req = self
            .by_id(Method::PATCH, table, id)
            .header("Prefer", "return=representation")
            .json(patch);
        first_row(send(req).await?).ok_or_else(|| {
            RemoteError::with_kind(
                format!("no row with id \"{id}\" in {table}"),
                RemoteErrorKind::NotFound,
            )
        })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        send(self.by_id(Method::DELETE, table, id)).await.map(|_| ())
    }
}

// ============================================================================
// Response handling
// ============================================================================

async fn send(req: RequestBuilder) -> Result<Value, RemoteError> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    let body = resp.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(classify_response(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| {
        RemoteError::with_kind(format!("invalid JSON from server: {e}"), RemoteErrorKind::Rejected)
    })
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::new(format!("request failed: {e}"))
}

/// Map an HTTP failure onto a [`RemoteErrorKind`].
fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.clone();

    let kind = if code.as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE)
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        RemoteErrorKind::Unauthorized
    } else if status == StatusCode::NOT_FOUND || code.as_deref() == Some(PGRST_NO_ROWS) {
        RemoteErrorKind::NotFound
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RemoteErrorKind::Transient
    } else {
        RemoteErrorKind::Rejected
    };

    let mut message = parsed
        .message
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
        message = format!("{message}: {details}");
    }

    let err = RemoteError::with_kind(message, kind);
    match code {
        Some(code) => err.with_code(code),
        None => err,
    }
}

/// Representation responses are arrays; take the single affected row.
fn first_row(body: Value) -> Option<Value> {
    match body {
        Value::Array(rows) => rows.into_iter().next(),
        Value::Object(_) => Some(body),
        _ => None,
    }
}

fn unexpected_shape(operation: &str, body: &Value) -> RemoteError {
    let shape = match body {
        Value::Object(_) => "object",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "bool",
        Value::Array(_) | Value::Null => "array",
    };
    RemoteError::with_kind(
        format!("{operation} returned a {shape}, expected an array"),
        RemoteErrorKind::Rejected,
    )
}
