//! Contract with the remote Backend-as-a-Service.
//!
//! Every call answers with a `{data, error}` pair whose error side is loosely
//! shaped. Callers never inspect that payload directly; they go through
//! [`BackendResponse::into_result`], which runs [`normalize_error`].
//!
//! - [`Backend`]: the request/response surface (tables + serverless functions)
//! - [`RestBackend`](rest::RestBackend): HTTP implementation
//! - [`normalize_error`]: the single place error payloads are interpreted

pub mod normalize;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;

pub use normalize::{normalize_error, RemoteError, GENERIC_ERROR_MESSAGE};
pub use rest::RestBackend;

use crate::error::Result;

/// Raw answer from the remote collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    pub data: Option<Value>,
    pub error: Option<Value>,
}

impl BackendResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: Value) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    /// Data on success, a classified error otherwise. A `data.error` field
    /// counts as a failure even when the transport reported none.
    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = normalize_error(&self) {
            return Err(err.into());
        }
        Ok(self.data.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    In(Vec<Value>),
}

/// Row filter; all clauses must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<(String, FilterOp)>,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::default().and_eq(column, value)
    }

    pub fn in_list<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut filter = Self::default();
        filter.clauses.push((
            column.to_string(),
            FilterOp::In(values.into_iter().map(Into::into).collect()),
        ));
        filter
    }

    pub fn and_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses
            .push((column.to_string(), FilterOp::Eq(value.into())));
        self
    }

    /// Whether a JSON row satisfies every clause.
    pub fn matches(&self, row: &Value) -> bool {
        self.clauses.iter().all(|(column, op)| {
            let Some(field) = row.get(column) else {
                return false;
            };
            match op {
                FilterOp::Eq(v) => field == v,
                FilterOp::In(vs) => vs.contains(field),
            }
        })
    }
}

/// The remote data store and function runtime.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, filter: &Filter) -> BackendResponse;

    async fn write(&self, table: &str, filter: &Filter, patch: Value) -> BackendResponse;

    async fn insert(&self, table: &str, row: Value) -> BackendResponse;

    async fn invoke(&self, function: &str, body: Value) -> BackendResponse;
}
