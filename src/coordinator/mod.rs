//! Assignment coordination between helpers and the remote job rows.
//!
//! Every mutating call follows the same path:
//!
//! 1. Take the per-job [`OperationPermit`]; a second click while it is held
//!    returns `OperationInProgress` and does nothing else.
//! 2. Reject placeholder helpers from the local roster (no network call).
//! 3. Fetch the job fresh, re-check the current job, refuse completed jobs.
//! 4. Write the new assignment set, then re-check the current job once more
//!    so a slow response cannot land on a view that has moved on.
//!
//! The permit drops on every exit path.

pub mod guard;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

pub use guard::{CurrentJob, OperationLocks, OperationPermit};

use crate::config::CoordinatorConfig;
use crate::error::{CrewError, Result};
use crate::model::{AssignmentSet, Helper, Job, TeamRoster};
use crate::store::JobStore;

/// Which staleness check applies to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardScope {
    /// The job must stay the view's current job for the whole call.
    CurrentJob,
    /// Part of a bulk run; the view is a list, not a single job.
    Bulk,
}

#[derive(Debug, Clone)]
enum AssignmentChange {
    Add(Vec<Uuid>),
    Remove(Uuid),
    Clear,
}

/// Result of a successful assignment write.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    /// Row as written by the remote store
    pub job: Job,
    pub skipped_placeholders: Vec<Uuid>,
}

impl AssignmentOutcome {
    pub fn assigned(&self) -> &AssignmentSet {
        &self.job.assigned_helper_ids
    }
}

pub struct AssignmentCoordinator {
    store: JobStore,
    roster: Arc<RwLock<TeamRoster>>,
    current: CurrentJob,
    locks: OperationLocks,
    config: CoordinatorConfig,
}

impl AssignmentCoordinator {
    pub fn new(store: JobStore, roster: TeamRoster, current: CurrentJob) -> Self {
        Self::with_config(store, roster, current, CoordinatorConfig::default())
    }

    pub fn with_config(
        store: JobStore,
        roster: TeamRoster,
        current: CurrentJob,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store: store.with_auth_policy(config.auth.clone()),
            roster: Arc::new(RwLock::new(roster)),
            current,
            locks: OperationLocks::new(),
            config,
        }
    }

    pub fn current_job(&self) -> &CurrentJob {
        &self.current
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub async fn replace_roster(&self, helpers: Vec<Helper>) {
        *self.roster.write().await = TeamRoster::new(helpers);
    }

    pub async fn helper(&self, helper_id: &Uuid) -> Option<Helper> {
        self.roster.read().await.get(helper_id).cloned()
    }

    /// When the remote credential was last connected; feeds the reconnect grace policy.
    pub fn set_credential_connected_at(&self, at: Option<DateTime<Utc>>) {
        self.store.set_credential_connected_at(at);
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Assign one helper to the view's current job.
    pub async fn assign_one(&self, job_id: Uuid, helper_id: Uuid) -> Result<AssignmentOutcome> {
        let _permit = self.acquire(job_id)?;
        self.check_scope(job_id, GuardScope::CurrentJob)?;

        if self.roster.read().await.is_placeholder(&helper_id) {
            tracing::warn!(job_id = %job_id, helper_id = %helper_id, "Refusing placeholder assignment");
            return Err(CrewError::PlaceholderTarget(helper_id));
        }

        self.apply(
            job_id,
            GuardScope::CurrentJob,
            AssignmentChange::Add(vec![helper_id]),
            Vec::new(),
        )
        .await
    }

    /// Assign several helpers to the view's current job in one write,
    /// skipping placeholders.
    pub async fn assign_many(
        &self,
        job_id: Uuid,
        helper_ids: &[Uuid],
    ) -> Result<AssignmentOutcome> {
        self.assign_many_scoped(job_id, helper_ids, GuardScope::CurrentJob)
            .await
    }

    /// [`assign_many`](Self::assign_many) for one target of a bulk run.
    pub async fn assign_for_bulk(
        &self,
        job_id: Uuid,
        helper_ids: &[Uuid],
    ) -> Result<AssignmentOutcome> {
        self.assign_many_scoped(job_id, helper_ids, GuardScope::Bulk)
            .await
    }

    async fn assign_many_scoped(
        &self,
        job_id: Uuid,
        helper_ids: &[Uuid],
        scope: GuardScope,
    ) -> Result<AssignmentOutcome> {
        let _permit = self.acquire(job_id)?;
        self.check_scope(job_id, scope)?;

        let (real, placeholders) = self.roster.read().await.partition(helper_ids);
        if real.is_empty() {
            tracing::warn!(job_id = %job_id, skipped = placeholders.len(), "All assignment targets are placeholders");
            return Err(CrewError::AllTargetsPlaceholder(job_id));
        }
        if !placeholders.is_empty() {
            tracing::info!(job_id = %job_id, skipped = placeholders.len(), "Skipping placeholder helpers");
        }

        self.apply(job_id, scope, AssignmentChange::Add(real), placeholders)
            .await
    }

    /// Remove one helper, or every helper when `helper_id` is `None`.
    pub async fn unassign(
        &self,
        job_id: Uuid,
        helper_id: Option<Uuid>,
    ) -> Result<AssignmentOutcome> {
        let _permit = self.acquire(job_id)?;
        self.check_scope(job_id, GuardScope::CurrentJob)?;

        let change = match helper_id {
            Some(id) => AssignmentChange::Remove(id),
            None => AssignmentChange::Clear,
        };
        self.apply(job_id, GuardScope::CurrentJob, change, Vec::new())
            .await
    }

    fn acquire(&self, job_id: Uuid) -> Result<OperationPermit> {
        self.locks.try_acquire(job_id).ok_or_else(|| {
            tracing::debug!(job_id = %job_id, "Operation already in progress, ignoring");
            CrewError::OperationInProgress(job_id)
        })
    }

    fn check_scope(&self, captured: Uuid, scope: GuardScope) -> Result<()> {
        match scope {
            GuardScope::CurrentJob => self.current.ensure(captured).inspect_err(|_| {
                tracing::warn!(job_id = %captured, "Current job changed, discarding operation");
            }),
            GuardScope::Bulk => Ok(()),
        }
    }

    /// Caller must hold the permit for `captured`.
    async fn apply(
        &self,
        captured: Uuid,
        scope: GuardScope,
        change: AssignmentChange,
        skipped_placeholders: Vec<Uuid>,
    ) -> Result<AssignmentOutcome> {
        let fresh = self
            .store
            .fetch_job(captured)
            .await
            .map_err(|e| self.remote_failure(captured, e))?;
        self.check_scope(captured, scope)?;

        if !fresh.accepts_assignment_changes() {
            tracing::warn!(job_id = %captured, "Job is completed, assignment is frozen");
            return Err(CrewError::JobCompleted(captured));
        }

        let mut next = fresh.assigned_helper_ids.clone();
        match &change {
            AssignmentChange::Add(ids) => {
                for id in ids {
                    next.insert(*id);
                }
            }
            AssignmentChange::Remove(id) => {
                next.remove(id);
            }
            AssignmentChange::Clear => next = AssignmentSet::new(),
        }

        if next == fresh.assigned_helper_ids {
            tracing::debug!(job_id = %captured, "Assignment already up to date");
            return Ok(AssignmentOutcome {
                job: fresh,
                skipped_placeholders,
            });
        }

        let written = self
            .store
            .write_assignment(captured, &next)
            .await
            .map_err(|e| self.remote_failure(captured, e))?;
        self.check_scope(captured, scope)?;

        tracing::info!(
            job_id = %captured,
            helpers = written.assigned_helper_ids.len(),
            "Assignment updated"
        );
        Ok(AssignmentOutcome {
            job: written,
            skipped_placeholders,
        })
    }

    fn remote_failure(&self, job_id: Uuid, err: CrewError) -> CrewError {
        tracing::warn!(job_id = %job_id, kind = %err.kind(), error = %err, "Assignment request failed");
        err
    }
}
