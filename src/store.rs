use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::{Backend, BackendResponse, Filter, RemoteError};
use crate::config::AuthPolicy;
use crate::error::{CrewError, ErrorKind, Result};
use crate::model::{AssignmentSet, Helper, Job, PaymentStatus};

pub const JOBS_TABLE: &str = "jobs";
pub const HELPERS_TABLE: &str = "team_members";
pub const PAYMENTS_TABLE: &str = "payments";

/// Typed access to the remote rows the coordinator touches.
///
/// Every mutation targets a row by id and returns the row the remote side
/// wrote, never a locally patched copy. Every remote failure is classified
/// here, reconnect grace included, so all callers see the same kind.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn Backend>,
    auth: AuthPolicy,
    connected_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl JobStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            auth: AuthPolicy::default(),
            connected_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Classify expired-credential answers with `auth`. A connection time in
    /// the policy replaces the recorded one.
    pub fn with_auth_policy(self, auth: AuthPolicy) -> Self {
        if auth.connected_at.is_some() {
            self.set_credential_connected_at(auth.connected_at);
        }
        Self { auth, ..self }
    }

    pub fn auth_policy(&self) -> &AuthPolicy {
        &self.auth
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Record when the remote credential was last connected. Clones share it.
    pub fn set_credential_connected_at(&self, at: Option<DateTime<Utc>>) {
        *self.connected_at.write().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn checked(&self, resp: BackendResponse) -> Result<Value> {
        resp.into_result().map_err(|err| match err {
            CrewError::Remote(remote) => {
                let connected_at = *self.connected_at.read().unwrap_or_else(|e| e.into_inner());
                CrewError::Remote(remote.with_reconnect_grace(&self.auth, connected_at, Utc::now()))
            }
            other => other,
        })
    }

    pub async fn fetch_job(&self, job_id: Uuid) -> Result<Job> {
        let data = self
            .backend
            .select(JOBS_TABLE, &Filter::eq("id", job_id.to_string()))
            .await;
        let data = self.checked(data)?;
        first_row(data, job_id)
    }

    pub async fn fetch_jobs(&self, job_ids: &[Uuid]) -> Result<Vec<Job>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::in_list("id", job_ids.iter().map(|id| id.to_string()));
        let data = self
            .backend
            .select(JOBS_TABLE, &filter)
            .await;
        let data = self.checked(data)?;
        decode_rows(data)
    }

    pub async fn fetch_all_jobs(&self) -> Result<Vec<Job>> {
        let data = self
            .backend
            .select(JOBS_TABLE, &Filter::default())
            .await;
        let data = self.checked(data)?;
        decode_rows(data)
    }

    pub async fn fetch_helpers(&self) -> Result<Vec<Helper>> {
        let data = self
            .backend
            .select(HELPERS_TABLE, &Filter::default())
            .await;
        let data = self.checked(data)?;
        decode_rows(data)
    }

    pub async fn write_assignment(&self, job_id: Uuid, helpers: &AssignmentSet) -> Result<Job> {
        let patch = json!({ "assigned_helper_ids": helpers });
        self.patch_job(job_id, patch).await
    }

    pub async fn reschedule(&self, job_id: Uuid, date: NaiveDate) -> Result<Job> {
        let patch = json!({ "scheduled_date": date });
        self.patch_job(job_id, patch).await
    }

    /// Record a manual payment, then flag the job as paid.
    ///
    /// The payment row is keyed by job: a retry after a failed flag update
    /// reuses the row left by the earlier attempt instead of adding another.
    pub async fn mark_paid(&self, job: &Job) -> Result<Job> {
        let existing = self
            .backend
            .select(PAYMENTS_TABLE, &Filter::eq("job_id", job.id.to_string()))
            .await;
        let existing = self.checked(existing)?;
        if decode_rows::<Value>(existing)?.is_empty() {
            let row = json!({
                "job_id": job.id,
                "amount_cents": job.amount_due_cents,
                "method": "manual",
                "recorded_at": Utc::now(),
            });
            let inserted = self.backend.insert(PAYMENTS_TABLE, row).await;
            self.checked(inserted)?;
        } else {
            tracing::info!(job_id = %job.id, "Payment already recorded, updating job only");
        }
        self.patch_job(job.id, json!({ "payment_status": PaymentStatus::Paid }))
            .await
    }

    async fn patch_job(&self, job_id: Uuid, patch: Value) -> Result<Job> {
        let data = self
            .backend
            .write(JOBS_TABLE, &Filter::eq("id", job_id.to_string()), patch)
            .await;
        let data = self.checked(data)?;
        first_row(data, job_id)
    }
}

/// Rows from a response that may be an array, a single object, or null.
pub fn decode_rows<T: DeserializeOwned>(data: Value) -> Result<Vec<T>> {
    let rows = match data {
        Value::Null => Vec::new(),
        Value::Array(rows) => rows,
        single => vec![single],
    };
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| CrewError::Decode(e.to_string())))
        .collect()
}

fn first_row(data: Value, job_id: Uuid) -> Result<Job> {
    decode_rows::<Job>(data)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            RemoteError::new(ErrorKind::NotFound, format!("Job {} was not found", job_id)).into()
        })
}
