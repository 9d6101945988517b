//! GraphQL client for the API proxy.
//!
//! Wraps reqwest and turns every failure into the closed [`RequestError`]
//! shape the governor classifies:
//! - non-success HTTP status -> `Http`
//! - success status carrying an `errors` list -> `Message` (or `Http` when an
//!   entry reports its own status)
//! - no response at all -> `Transport`

use super::model::EntryChanges;
use super::mutations::{batch_variables, entry_variables, SAVE_ENTRY_MUTATION, UPDATE_ENTRIES_MUTATION};
use super::EntryMutator;
use crate::classify::{RequestError, TransportKind};
use crate::config::NetworkConfig;
use crate::error::{ListEditError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Longest slice of a non-JSON error body kept in an error message.
const MAX_BODY_EXCERPT: usize = 200;

/// Client for the GraphQL endpoint exposed by the proxy.
pub struct GraphQlClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl GraphQlClient {
    /// Create a client with the default request timeout.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|e| ListEditError::Config {
            message: format!("Invalid API endpoint {}: {}", endpoint, e),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ListEditError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            token: None,
            timeout,
        })
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one GraphQL request and return its `data` member.
    pub async fn execute(&self, query: &str, variables: Value) -> std::result::Result<Value, RequestError> {
        let body = json!({ "query": query, "variables": variables });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        debug!("POST {} -> {}", self.endpoint, status);

        interpret_response(status, &text)
    }
}

#[async_trait]
impl EntryMutator for GraphQlClient {
    async fn update_entries(
        &self,
        ids: &[i64],
        changes: &EntryChanges,
    ) -> std::result::Result<(), RequestError> {
        self.execute(UPDATE_ENTRIES_MUTATION, batch_variables(ids, changes))
            .await
            .map(|_| ())
    }

    async fn update_entry(
        &self,
        id: i64,
        changes: &EntryChanges,
    ) -> std::result::Result<(), RequestError> {
        self.execute(SAVE_ENTRY_MUTATION, entry_variables(id, changes))
            .await
            .map(|_| ())
    }
}

/// Map a proxy response onto the `data` payload or a [`RequestError`].
pub fn interpret_response(status: u16, body: &str) -> std::result::Result<Value, RequestError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let errors = parsed.as_ref().and_then(graphql_errors);

    if !(200..300).contains(&status) {
        let message = match errors {
            Some((_, message)) => message,
            None => fallback_message(status, body),
        };
        return Err(RequestError::http(status, message));
    }

    let Some(parsed) = parsed else {
        return Err(RequestError::message(format!(
            "Invalid JSON response: {}",
            excerpt(body)
        )));
    };

    if let Some((embedded_status, message)) = errors {
        return Err(match embedded_status {
            Some(status) => RequestError::http(status, message),
            None => RequestError::message(message),
        });
    }

    match parsed.get("data") {
        Some(data) if !data.is_null() => Ok(data.clone()),
        _ => Err(RequestError::message("Response contained no data")),
    }
}

/// Joined messages of a non-empty `errors` list, plus the first numeric status.
fn graphql_errors(body: &Value) -> Option<(Option<u16>, String)> {
    let errors = body.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }

    let status = errors.iter().find_map(|e| {
        e.get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
    });
    let message = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("; ");

    Some((status, message))
}

fn fallback_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('<') {
        return excerpt(trimmed);
    }
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown status")
        .to_string()
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Classify a reqwest failure that produced no HTTP response.
fn transport_error(err: reqwest::Error) -> RequestError {
    let kind = if err.is_timeout() {
        TransportKind::Timeout
    } else if is_connection_reset(&err) {
        TransportKind::ConnectionReset
    } else {
        TransportKind::Other
    };
    RequestError::transport(kind, err.to_string())
}

fn is_connection_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let text = cause.to_string().to_lowercase();
        if text.contains("connection reset") || text.contains("connection closed before message completed") {
            return true;
        }
        current = cause.source();
    }
    false
}
