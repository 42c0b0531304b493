//! Apply one action across many jobs and report per-job outcomes.
//!
//! Targets run strictly in input order, one at a time. A cancellation token
//! is checked between items; an item already running finishes and is
//! recorded, nothing after it starts. Failed items never stop the run.

pub mod actions;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use actions::JobActions;

use crate::error::{CrewError, ErrorKind, Result};
use crate::messaging::{MessageTemplate, Recipient};
use crate::model::{Job, PaymentStatus};

#[derive(Debug, Clone)]
pub enum BulkAction {
    Assign { helper_ids: Vec<Uuid> },
    Reschedule { date: NaiveDate },
    Remind { template: MessageTemplate },
    MarkPaid,
}

impl BulkAction {
    pub fn name(&self) -> &'static str {
        match self {
            BulkAction::Assign { .. } => "assign",
            BulkAction::Reschedule { .. } => "reschedule",
            BulkAction::Remind { .. } => "remind",
            BulkAction::MarkPaid => "mark paid",
        }
    }

    /// The eligibility filter a view applies by default for this action.
    pub fn default_prerequisite(&self) -> Prerequisite {
        match self {
            BulkAction::Assign { .. } | BulkAction::Reschedule { .. } => Prerequisite::NotCompleted,
            BulkAction::Remind { .. } => Prerequisite::HasPhone,
            BulkAction::MarkPaid => Prerequisite::Unpaid,
        }
    }
}

type JobPredicate = Arc<dyn Fn(&Job) -> bool + Send + Sync>;

/// Eligibility check run before any target is attempted.
#[derive(Clone)]
pub enum Prerequisite {
    HasPhone,
    NotCompleted,
    Unpaid,
    Custom(JobPredicate),
}

impl Prerequisite {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Job) -> bool + Send + Sync + 'static,
    {
        Prerequisite::Custom(Arc::new(f))
    }

    pub fn allows(&self, job: &Job) -> bool {
        match self {
            Prerequisite::HasPhone => job.has_phone(),
            Prerequisite::NotCompleted => job.accepts_assignment_changes(),
            Prerequisite::Unpaid => job.payment_status == PaymentStatus::Unpaid,
            Prerequisite::Custom(f) => f(job),
        }
    }
}

impl fmt::Debug for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prerequisite::HasPhone => write!(f, "HasPhone"),
            Prerequisite::NotCompleted => write!(f, "NotCompleted"),
            Prerequisite::Unpaid => write!(f, "Unpaid"),
            Prerequisite::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// What a successful item produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSuccess {
    /// Row as written remotely, when the action wrote one
    pub job: Option<Job>,
    /// Message to queue for confirmation, for messaging actions
    pub outbound: Option<Recipient>,
}

/// Per-target operation used by [`FanOut`].
#[async_trait]
pub trait BulkExecutor: Send + Sync {
    async fn apply(&self, job: &Job, action: &BulkAction) -> Result<ItemSuccess>;
}

#[derive(Debug, Clone)]
pub struct ItemResult {
    pub target_id: Uuid,
    /// Customer name, used in notifications
    pub label: String,
    pub outcome: std::result::Result<ItemSuccess, CrewError>,
}

impl ItemResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&CrewError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedTarget {
    pub target_id: Uuid,
    pub label: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FanOutSummary {
    /// No target was attempted.
    NothingAttempted { ineligible: usize, not_started: usize },
    AllSucceeded {
        succeeded: usize,
        ineligible: usize,
        not_started: usize,
    },
    Partial {
        succeeded: usize,
        failed: Vec<FailedTarget>,
        ineligible: usize,
        not_started: usize,
    },
    AllFailed {
        failed: Vec<FailedTarget>,
        ineligible: usize,
        not_started: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FanOutReport {
    pub action: &'static str,
    /// One entry per attempted target, in attempt order
    pub results: Vec<ItemResult>,
    /// Filtered out by the prerequisite; never attempted
    pub ineligible: Vec<Uuid>,
    /// Eligible but not reached because the run was cancelled
    pub not_started: Vec<Uuid>,
    pub cancelled: bool,
}

impl FanOutReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded_ids(&self) -> Vec<Uuid> {
        self.results
            .iter()
            .filter(|r| r.success())
            .map(|r| r.target_id)
            .collect()
    }

    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.results
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.target_id)
            .collect()
    }

    /// Outbound messages in attempt order.
    pub fn outbound(&self) -> Vec<Recipient> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .filter_map(|s| s.outbound.clone())
            .collect()
    }

    pub fn summary(&self) -> FanOutSummary {
        let failed: Vec<FailedTarget> = self
            .results
            .iter()
            .filter_map(|r| {
                r.error().map(|e| FailedTarget {
                    target_id: r.target_id,
                    label: r.label.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                })
            })
            .collect();
        let succeeded = self.results.len() - failed.len();
        let ineligible = self.ineligible.len();
        let not_started = self.not_started.len();

        if self.results.is_empty() {
            FanOutSummary::NothingAttempted {
                ineligible,
                not_started,
            }
        } else if failed.is_empty() {
            FanOutSummary::AllSucceeded {
                succeeded,
                ineligible,
                not_started,
            }
        } else if succeeded == 0 {
            FanOutSummary::AllFailed {
                failed,
                ineligible,
                not_started,
            }
        } else {
            FanOutSummary::Partial {
                succeeded,
                failed,
                ineligible,
                not_started,
            }
        }
    }
}

#[derive(Clone)]
pub struct FanOut {
    executor: Arc<dyn BulkExecutor>,
}

impl FanOut {
    pub fn new(executor: Arc<dyn BulkExecutor>) -> Self {
        Self { executor }
    }

    /// Run `action` over `targets`. Duplicate targets are visited once.
    pub async fn apply_to_all(
        &self,
        targets: &[Job],
        action: &BulkAction,
        prerequisite: Option<&Prerequisite>,
        cancel: &CancellationToken,
    ) -> FanOutReport {
        let mut seen = Vec::with_capacity(targets.len());
        let mut eligible = Vec::with_capacity(targets.len());
        let mut ineligible = Vec::new();
        for job in targets {
            if seen.contains(&job.id) {
                continue;
            }
            seen.push(job.id);
            match prerequisite {
                Some(p) if !p.allows(job) => ineligible.push(job.id),
                _ => eligible.push(job),
            }
        }

        tracing::info!(
            action = action.name(),
            eligible = eligible.len(),
            ineligible = ineligible.len(),
            "Starting bulk operation"
        );

        let mut report = FanOutReport {
            action: action.name(),
            results: Vec::with_capacity(eligible.len()),
            ineligible,
            not_started: Vec::new(),
            cancelled: false,
        };

        for (pos, job) in eligible.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.not_started = eligible[pos..].iter().map(|j| j.id).collect();
                tracing::info!(
                    action = action.name(),
                    attempted = pos,
                    not_started = report.not_started.len(),
                    "Bulk operation cancelled"
                );
                break;
            }

            let outcome = self.executor.apply(job, action).await;
            if let Err(ref e) = outcome {
                tracing::warn!(job_id = %job.id, action = action.name(), error = %e, "Bulk item failed");
            }
            report.results.push(ItemResult {
                target_id: job.id,
                label: job.customer_name.clone(),
                outcome,
            });
        }

        // A cancel that lands during the last item is still reported.
        if !report.cancelled && cancel.is_cancelled() {
            report.cancelled = true;
        }

        tracing::info!(
            action = action.name(),
            succeeded = report.succeeded_ids().len(),
            failed = report.failed_ids().len(),
            "Bulk operation finished"
        );
        report
    }
}
