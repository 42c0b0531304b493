use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::coordinator::{AssignmentCoordinator, AssignmentOutcome};
use crate::error::{CrewError, Result};
use crate::fanout::{BulkAction, FanOut, FanOutReport, FanOutSummary, Prerequisite};
use crate::messaging::Recipient;
use crate::model::{AssignmentSet, Job, JobBoard, PaymentStatus, Selection};
use crate::notify::{self, Notification};

/// Everything a finished bulk run hands back to the view.
#[derive(Debug, Clone)]
pub struct BulkRunOutcome {
    pub report: FanOutReport,
    pub summary: FanOutSummary,
    pub notification: Notification,
    /// Messages to walk through the confirmation queue, in target order
    pub outbound: Vec<Recipient>,
}

/// State owned by one job-list view, created on mount and dropped on unmount.
///
/// Holds the board (transient job copies), the bulk selection and the
/// coordinator. Mutations are shown speculatively; a failure marks the
/// affected rows as rolling back and triggers a full refetch instead of a
/// local correction.
pub struct BulkSession {
    coordinator: Arc<AssignmentCoordinator>,
    fanout: FanOut,
    board: JobBoard,
    selection: Selection,
    bulk_mode: bool,
    config: CoordinatorConfig,
}

impl BulkSession {
    pub fn new(coordinator: Arc<AssignmentCoordinator>, fanout: FanOut) -> Self {
        Self::with_config(coordinator, fanout, CoordinatorConfig::default())
    }

    pub fn with_config(
        coordinator: Arc<AssignmentCoordinator>,
        fanout: FanOut,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            coordinator,
            fanout,
            board: JobBoard::new(),
            selection: Selection::new(),
            bulk_mode: false,
            config,
        }
    }

    /// Load jobs and the team roster.
    pub async fn mount(&mut self) -> Result<()> {
        self.refetch().await
    }

    /// Replace the board and roster with fresh remote copies.
    pub async fn refetch(&mut self) -> Result<()> {
        let store = self.coordinator.store();
        let jobs = store.fetch_all_jobs().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Refetch of jobs failed");
        })?;
        let helpers = store.fetch_helpers().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Refetch of team failed");
        })?;
        tracing::debug!(jobs = jobs.len(), helpers = helpers.len(), "Board refetched");
        self.board.replace_all(jobs);
        self.coordinator.replace_roster(helpers).await;
        Ok(())
    }

    pub fn board(&self) -> &JobBoard {
        &self.board
    }

    pub fn coordinator(&self) -> &Arc<AssignmentCoordinator> {
        &self.coordinator
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn in_bulk_mode(&self) -> bool {
        self.bulk_mode
    }

    pub fn enter_bulk_mode(&mut self) {
        self.selection = Selection::new();
        self.bulk_mode = true;
    }

    pub fn exit_bulk_mode(&mut self) {
        self.selection.clear();
        self.bulk_mode = false;
    }

    /// Toggle a job. Ignored outside bulk mode or for jobs not on the board.
    pub fn toggle(&mut self, job_id: Uuid) -> bool {
        if !self.bulk_mode || self.board.get(&job_id).is_none() {
            return false;
        }
        self.selection.toggle(job_id)
    }

    pub fn select_all(&mut self) {
        if !self.bulk_mode {
            return;
        }
        let ids: Vec<Uuid> = self.board.jobs().iter().map(|j| j.id).collect();
        self.selection.select_all(ids);
    }

    /// Open a single job; assignment calls are checked against it.
    pub fn focus(&self, job_id: Option<Uuid>) {
        self.coordinator.current_job().set(job_id);
    }

    /// Run `action` over the current selection.
    pub async fn run_bulk(
        &mut self,
        action: BulkAction,
        prerequisite: Option<Prerequisite>,
        cancel: &CancellationToken,
    ) -> BulkRunOutcome {
        let targets = self.board.snapshot(self.selection.ids());
        for job in &targets {
            self.board.speculate(&job.id, |j| speculative_patch(j, &action));
        }

        let report = self
            .fanout
            .apply_to_all(&targets, &action, prerequisite.as_ref(), cancel)
            .await;

        let mut any_failed = false;
        for result in &report.results {
            match &result.outcome {
                Ok(success) => match &success.job {
                    Some(job) => self.board.confirm(job.clone()),
                    None => self.board.revert(&result.target_id),
                },
                Err(_) => {
                    any_failed = true;
                    self.board.invalidate(&result.target_id);
                }
            }
        }
        for id in report.ineligible.iter().chain(report.not_started.iter()) {
            self.board.revert(id);
        }

        let summary = report.summary();
        // Succeeded jobs leave the selection; failed, ineligible and unreached ones stay.
        match &summary {
            FanOutSummary::AllSucceeded { .. } | FanOutSummary::Partial { .. } => {
                self.selection.remove_all(&report.succeeded_ids());
            }
            FanOutSummary::AllFailed { .. } | FanOutSummary::NothingAttempted { .. } => {}
        }

        if any_failed {
            self.refetch_after_failure().await;
        }

        let notification = notify::for_summary(report.action, &summary);
        BulkRunOutcome {
            outbound: report.outbound(),
            report,
            summary,
            notification,
        }
    }

    /// Assign helpers to the focused job.
    pub async fn assign(&mut self, job_id: Uuid, helper_ids: &[Uuid]) -> Result<AssignmentOutcome> {
        let coordinator = self.coordinator.clone();
        let ids = helper_ids.to_vec();
        self.speculative_single(
            job_id,
            |job| {
                for id in &ids {
                    job.assigned_helper_ids.insert(*id);
                }
            },
            coordinator.assign_many(job_id, helper_ids),
        )
        .await
    }

    /// Remove one helper, or all of them, from the focused job.
    pub async fn unassign(&mut self, job_id: Uuid, helper_id: Option<Uuid>) -> Result<AssignmentOutcome> {
        let coordinator = self.coordinator.clone();
        self.speculative_single(
            job_id,
            |job| match helper_id {
                Some(id) => {
                    job.assigned_helper_ids.remove(&id);
                }
                None => job.assigned_helper_ids = AssignmentSet::new(),
            },
            coordinator.unassign(job_id, helper_id),
        )
        .await
    }

    async fn speculative_single<P, F>(
        &mut self,
        job_id: Uuid,
        patch: P,
        op: F,
    ) -> Result<AssignmentOutcome>
    where
        P: FnOnce(&mut Job),
        F: Future<Output = Result<AssignmentOutcome>>,
    {
        if self.coordinator.locks().is_busy(&job_id) {
            return Err(CrewError::OperationInProgress(job_id));
        }
        self.board.speculate(&job_id, patch);

        match op.await {
            Ok(outcome) => {
                self.board.confirm(outcome.job.clone());
                Ok(outcome)
            }
            Err(err) => {
                match &err {
                    CrewError::OperationInProgress(_)
                    | CrewError::PlaceholderTarget(_)
                    | CrewError::AllTargetsPlaceholder(_) => self.board.revert(&job_id),
                    _ => {
                        self.board.invalidate(&job_id);
                        self.refetch_after_failure().await;
                    }
                }
                Err(err)
            }
        }
    }

    async fn refetch_after_failure(&mut self) {
        if !self.config.refetch_on_failure {
            return;
        }
        if let Err(e) = self.refetch().await {
            tracing::warn!(error = %e, "Board left rolling back until the next refetch");
        }
    }
}

fn speculative_patch(job: &mut Job, action: &BulkAction) {
    match action {
        BulkAction::Assign { helper_ids } => {
            for id in helper_ids {
                job.assigned_helper_ids.insert(*id);
            }
        }
        BulkAction::Reschedule { date } => job.scheduled_date = *date,
        BulkAction::MarkPaid => job.payment_status = PaymentStatus::Paid,
        BulkAction::Remind { .. } => {}
    }
}
