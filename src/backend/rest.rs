use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};

use crate::backend::{Backend, BackendResponse, Filter, FilterOp};
use crate::config::BackendConfig;
use crate::error::{CrewError, Result};

/// HTTP client for a PostgREST-style table API plus `/functions/v1/<name>`.
///
/// Failures are never raised from here; they come back as the same loosely
/// shaped `{message, status, context: {body}}` payload the function runtime
/// uses, so one normalizer handles every path.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    config: BackendConfig,
}

impl RestBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(CrewError::Config("backend base URL is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| CrewError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url.trim_end_matches('/'), table)
    }

    fn function_url(&self, function: &str) -> String {
        format!(
            "{}/functions/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            function
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, builder: RequestBuilder) -> BackendResponse {
        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Remote request failed before a response");
                let message = if e.is_timeout() {
                    format!("Request timed out: {}", e)
                } else {
                    format!("Failed to fetch: network connection error ({})", e)
                };
                return BackendResponse::err(json!({ "message": message }));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                return BackendResponse::err(json!({
                    "message": format!("Failed to read response: connection dropped ({})", e),
                    "status": status.as_u16(),
                }));
            }
        };
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            BackendResponse::ok(body)
        } else {
            tracing::debug!(status = status.as_u16(), "Remote request rejected");
            BackendResponse::err(json!({
                "message": format!("Request failed with status {}", status.as_u16()),
                "status": status.as_u16(),
                "context": { "status": status.as_u16(), "body": body },
            }))
        }
    }
}

/// Render a filter as PostgREST query pairs (`col=eq.v`, `col=in.(a,b)`).
pub fn filter_query(filter: &Filter) -> Vec<(String, String)> {
    filter
        .clauses
        .iter()
        .map(|(column, op)| {
            let rendered = match op {
                FilterOp::Eq(v) => format!("eq.{}", scalar(v)),
                FilterOp::In(vs) => format!(
                    "in.({})",
                    vs.iter().map(scalar).collect::<Vec<_>>().join(",")
                ),
            };
            (column.clone(), rendered)
        })
        .collect()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, filter: &Filter) -> BackendResponse {
        let builder = self
            .request(Method::GET, self.table_url(table))
            .query(&[("select", "*")])
            .query(&filter_query(filter));
        self.send(builder).await
    }

    async fn write(&self, table: &str, filter: &Filter, patch: Value) -> BackendResponse {
        let builder = self
            .request(Method::PATCH, self.table_url(table))
            .query(&filter_query(filter))
            .header("Prefer", "return=representation")
            .json(&patch);
        self.send(builder).await
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResponse {
        let builder = self
            .request(Method::POST, self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        self.send(builder).await
    }

    async fn invoke(&self, function: &str, body: Value) -> BackendResponse {
        let builder = self
            .request(Method::POST, self.function_url(function))
            .json(&body);
        self.send(builder).await
    }
}
