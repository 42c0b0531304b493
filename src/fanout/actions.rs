use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::coordinator::AssignmentCoordinator;
use crate::error::{CrewError, Result};
use crate::fanout::{BulkAction, BulkExecutor, ItemSuccess};
use crate::messaging::{MessageTemplate, Recipient, RecipientDirectory};
use crate::model::{Job, PaymentStatus};
use crate::store::JobStore;

/// Compose the reminder for one job, or fail if it has nowhere to go.
pub fn compose_reminder(job: &Job, template: &MessageTemplate, business_name: &str) -> Result<Recipient> {
    let handle = job
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(CrewError::MissingPrerequisite {
            job_id: job.id,
            what: "a phone number",
        })?;
    Ok(Recipient {
        id: job.id,
        name: job.customer_name.clone(),
        handle: handle.to_string(),
        message: template.render_for_job(job, business_name),
    })
}

/// The real per-job operations behind a bulk run.
pub struct JobActions {
    coordinator: Arc<AssignmentCoordinator>,
    business_name: String,
}

impl JobActions {
    pub fn new(coordinator: Arc<AssignmentCoordinator>, business_name: impl Into<String>) -> Self {
        Self {
            coordinator,
            business_name: business_name.into(),
        }
    }

    fn store(&self) -> &JobStore {
        self.coordinator.store()
    }

    /// Run a write against one job while holding its operation lock.
    async fn locked<F, Fut>(&self, job_id: Uuid, op: F) -> Result<ItemSuccess>
    where
        F: FnOnce(Job) -> Fut,
        Fut: std::future::Future<Output = Result<Job>>,
    {
        let _permit = self
            .coordinator
            .locks()
            .try_acquire(job_id)
            .ok_or(CrewError::OperationInProgress(job_id))?;
        let fresh = self.store().fetch_job(job_id).await?;
        let written = op(fresh).await?;
        Ok(ItemSuccess {
            job: Some(written),
            outbound: None,
        })
    }
}

#[async_trait]
impl BulkExecutor for JobActions {
    async fn apply(&self, job: &Job, action: &BulkAction) -> Result<ItemSuccess> {
        match action {
            BulkAction::Assign { helper_ids } => {
                let outcome = self.coordinator.assign_for_bulk(job.id, helper_ids).await?;
                Ok(ItemSuccess {
                    job: Some(outcome.job),
                    outbound: None,
                })
            }
            BulkAction::Reschedule { date } => {
                let date = *date;
                self.locked(job.id, |fresh| async move {
                    if fresh.scheduled_date == date {
                        return Ok(fresh);
                    }
                    self.store().reschedule(fresh.id, date).await
                })
                .await
            }
            BulkAction::MarkPaid => {
                self.locked(job.id, |fresh| async move {
                    if fresh.payment_status == PaymentStatus::Paid {
                        return Ok(fresh);
                    }
                    self.store().mark_paid(&fresh).await
                })
                .await
            }
            BulkAction::Remind { template } => {
                let recipient = compose_reminder(job, template, &self.business_name)?;
                Ok(ItemSuccess {
                    job: None,
                    outbound: Some(recipient),
                })
            }
        }
    }
}

/// Resolves reminder recipients from fresh job rows.
pub struct ReminderDirectory {
    store: JobStore,
    business_name: String,
}

impl ReminderDirectory {
    pub fn new(store: JobStore, business_name: impl Into<String>) -> Self {
        Self {
            store,
            business_name: business_name.into(),
        }
    }
}

#[async_trait]
impl RecipientDirectory for ReminderDirectory {
    async fn resolve(&self, ids: &[Uuid], template: Option<&str>) -> Result<Vec<Recipient>> {
        let template = MessageTemplate::new(template.unwrap_or_default());
        let jobs = self.store.fetch_jobs(ids).await?;
        Ok(jobs
            .iter()
            .filter_map(|job| compose_reminder(job, &template, &self.business_name).ok())
            .collect())
    }
}
