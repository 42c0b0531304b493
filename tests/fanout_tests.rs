
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chrono::{Duration, Utc};

use crewline::config::{AuthPolicy, CoordinatorConfig};
use crewline::error::{CrewError, ErrorKind, Result};
use crewline::fanout::{
    BulkAction, BulkExecutor, FanOut, FanOutSummary, ItemSuccess, Prerequisite,
};
use crewline::messaging::MessageTemplate;
use crewline::model::{Helper, Job, JobStatus, PaymentStatus};
use crewline::notify::Level;
use test_harness::{connection_error, date, expired_error, job, Harness};

/// Executor that records visits and cancels the token after `cancel_after` items.
struct CountingExecutor {
    visited: Mutex<Vec<Uuid>>,
    cancel_after: Option<usize>,
    token: CancellationToken,
    fail: Vec<Uuid>,
}

impl CountingExecutor {
    fn new(token: CancellationToken) -> Self {
        Self {
            visited: Mutex::new(Vec::new()),
            cancel_after: None,
            token,
            fail: Vec::new(),
        }
    }

    fn visited(&self) -> Vec<Uuid> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkExecutor for CountingExecutor {
    async fn apply(&self, job: &Job, _action: &BulkAction) -> Result<ItemSuccess> {
        let count = {
            let mut visited = self.visited.lock().unwrap();
            visited.push(job.id);
            visited.len()
        };
        if self.cancel_after == Some(count) {
            self.token.cancel();
        }
        tokio::task::yield_now().await;
        if self.fail.contains(&job.id) {
            return Err(CrewError::MissingPrerequisite {
                job_id: job.id,
                what: "a test failure",
            });
        }
        Ok(ItemSuccess::default())
    }
}

fn jobs(n: usize) -> Vec<Job> {
    (0..n).map(|i| job(&format!("Customer {}", i))).collect()
}

#[tokio::test]
async fn test_bulk_assign_all_succeed_clears_selection() {
    let targets = jobs(3);
    let helper = Helper::new("Sam");
    let mut h = Harness::new(&targets, &[helper.clone()]).await;
    h.session.enter_bulk_mode();
    h.session.select_all();
    assert_eq!(h.session.selection().len(), 3);

    let outcome = h
        .session
        .run_bulk(
            BulkAction::Assign {
                helper_ids: vec![helper.id],
            },
            None,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        outcome.summary,
        FanOutSummary::AllSucceeded {
            succeeded: 3,
            ineligible: 0,
            not_started: 0
        }
    );
    assert!(outcome.report.failed_ids().is_empty());
    assert!(h.session.selection().is_empty());
    assert_eq!(outcome.notification.level, Level::Success);
    for t in &targets {
        assert!(h.backend.job(t.id).assigned_helper_ids.contains(&helper.id));
        assert!(h.session.board().entry(&t.id).unwrap().is_settled());
    }
}

#[tokio::test]
async fn test_partial_failure_keeps_failed_job_selected() {
    let job_a = job("Ana Silva");
    let job_b = job("Ben Okafor");
    let helper = Helper::new("Sam");
    let mut h = Harness::new(&[job_a.clone(), job_b.clone()], &[helper.clone()]).await;
    h.backend.fail_writes_for(job_b.id, connection_error());
    h.session.enter_bulk_mode();
    h.session.toggle(job_a.id);
    h.session.toggle(job_b.id);

    let outcome = h
        .session
        .run_bulk(
            BulkAction::Assign {
                helper_ids: vec![helper.id],
            },
            None,
            &CancellationToken::new(),
        )
        .await;

    match &outcome.summary {
        FanOutSummary::Partial {
            succeeded, failed, ..
        } => {
            assert_eq!(*succeeded, 1);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].target_id, job_b.id);
            assert_eq!(failed[0].label, "Ben Okafor");
            assert_eq!(failed[0].kind, ErrorKind::Connection);
        }
        other => panic!("expected partial summary, got {:?}", other),
    }
    assert!(outcome.notification.text.contains("Ben Okafor"));
    assert!(outcome.notification.text.contains("1 succeeded, 1 failed"));
    assert_eq!(h.session.selection().ids(), &[job_b.id]);
    // Failure forced a refetch, so nothing is left rolling back.
    assert!(!h.session.board().needs_refetch());
}

#[tokio::test]
async fn test_all_failed_leaves_selection_intact() {
    let targets = jobs(2);
    let helper = Helper::new("Sam");
    let mut h = Harness::new(&targets, &[helper.clone()]).await;
    for t in &targets {
        h.backend.fail_writes_for(t.id, connection_error());
    }
    h.session.enter_bulk_mode();
    h.session.select_all();

    let outcome = h
        .session
        .run_bulk(
            BulkAction::Assign {
                helper_ids: vec![helper.id],
            },
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(outcome.summary, FanOutSummary::AllFailed { ref failed, .. } if failed.len() == 2));
    assert_eq!(outcome.notification.level, Level::Error);
    assert_eq!(h.session.selection().len(), 2);
}

#[tokio::test]
async fn test_cancel_after_k_items_stops_the_rest() {
    let targets = jobs(5);
    let token = CancellationToken::new();
    let mut executor = CountingExecutor::new(token.clone());
    executor.cancel_after = Some(2);
    let executor = Arc::new(executor);
    let fanout = FanOut::new(executor.clone());

    let report = fanout
        .apply_to_all(&targets, &BulkAction::MarkPaid, None, &token)
        .await;

    assert_eq!(report.attempted(), 2);
    assert_eq!(executor.visited(), vec![targets[0].id, targets[1].id]);
    assert!(report.cancelled);
    assert_eq!(
        report.not_started,
        targets[2..].iter().map(|j| j.id).collect::<Vec<_>>()
    );
    // Already-applied items stay applied and are reported as successes.
    assert_eq!(report.succeeded_ids().len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_attempts_nothing() {
    let targets = jobs(3);
    let token = CancellationToken::new();
    token.cancel();
    let executor = Arc::new(CountingExecutor::new(token.clone()));
    let report = FanOut::new(executor.clone())
        .apply_to_all(&targets, &BulkAction::MarkPaid, None, &token)
        .await;

    assert_eq!(report.attempted(), 0);
    assert_eq!(report.not_started.len(), 3);
    assert!(matches!(
        report.summary(),
        FanOutSummary::NothingAttempted { not_started: 3, .. }
    ));
}

#[tokio::test]
async fn test_each_target_visited_once_and_in_order() {
    let targets = jobs(3);
    let mut with_dupes = targets.clone();
    with_dupes.push(targets[0].clone());
    with_dupes.insert(1, targets[2].clone());

    let token = CancellationToken::new();
    let executor = Arc::new(CountingExecutor::new(token.clone()));
    let fanout = FanOut::new(executor.clone());

    let first = fanout
        .apply_to_all(&with_dupes, &BulkAction::MarkPaid, None, &token)
        .await;
    let second = fanout
        .apply_to_all(&with_dupes, &BulkAction::MarkPaid, None, &token)
        .await;

    let expected = vec![targets[0].id, targets[2].id, targets[1].id];
    assert_eq!(first.succeeded_ids(), expected);
    assert_eq!(second.succeeded_ids(), expected);
    assert_eq!(first.summary(), second.summary());
    assert_eq!(executor.visited().len(), 6);
}

#[tokio::test]
async fn test_item_failures_do_not_abort_the_run() {
    let targets = jobs(3);
    let token = CancellationToken::new();
    let mut executor = CountingExecutor::new(token.clone());
    executor.fail = vec![targets[0].id];
    let executor = Arc::new(executor);

    let report = FanOut::new(executor.clone())
        .apply_to_all(&targets, &BulkAction::MarkPaid, None, &token)
        .await;

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.failed_ids(), vec![targets[0].id]);
}

#[tokio::test]
async fn test_prerequisite_filters_without_attempting() {
    let with_phone = job("Ana Silva");
    let mut without_phone = job("Ben Okafor");
    without_phone.customer_phone = None;
    let token = CancellationToken::new();
    let executor = Arc::new(CountingExecutor::new(token.clone()));

    let report = FanOut::new(executor.clone())
        .apply_to_all(
            &[with_phone.clone(), without_phone.clone()],
            &BulkAction::MarkPaid,
            Some(&Prerequisite::HasPhone),
            &token,
        )
        .await;

    assert_eq!(executor.visited(), vec![with_phone.id]);
    assert_eq!(report.ineligible, vec![without_phone.id]);
    assert!(matches!(
        report.summary(),
        FanOutSummary::AllSucceeded {
            succeeded: 1,
            ineligible: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_custom_prerequisite() {
    let targets = jobs(4);
    let keep = targets[3].id;
    let token = CancellationToken::new();
    let executor = Arc::new(CountingExecutor::new(token.clone()));

    let report = FanOut::new(executor.clone())
        .apply_to_all(
            &targets,
            &BulkAction::MarkPaid,
            Some(&Prerequisite::custom(move |j| j.id == keep)),
            &token,
        )
        .await;

    assert_eq!(executor.visited(), vec![keep]);
    assert_eq!(report.ineligible.len(), 3);
}

#[tokio::test]
async fn test_bulk_reschedule_and_mark_paid_write_through() {
    let mut done = job("Ana Silva");
    done.status = JobStatus::Completed;
    let open = job("Ben Okafor");
    let mut h = Harness::new(&[done.clone(), open.clone()], &[]).await;
    h.session.enter_bulk_mode();
    h.session.select_all();

    let action = BulkAction::Reschedule { date: date(20) };
    let prerequisite = Some(action.default_prerequisite());
    let outcome = h
        .session
        .run_bulk(action, prerequisite, &CancellationToken::new())
        .await;
    assert_eq!(outcome.report.ineligible, vec![done.id]);
    assert_eq!(h.backend.job(open.id).scheduled_date, date(20));
    assert_eq!(h.backend.job(done.id).scheduled_date, date(14));
    // The ineligible job stays selected; the rescheduled one leaves.
    assert_eq!(h.session.selection().ids(), &[done.id]);

    h.session.select_all();
    let outcome = h
        .session
        .run_bulk(BulkAction::MarkPaid, Some(Prerequisite::Unpaid), &CancellationToken::new())
        .await;
    assert_eq!(outcome.report.succeeded_ids().len(), 2);
    assert_eq!(h.backend.job(open.id).payment_status, PaymentStatus::Paid);
    assert_eq!(h.payments().len(), 2);
    assert_eq!(
        h.session.board().get(&open.id).unwrap().payment_status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
async fn test_bulk_remind_produces_outbound_messages() {
    let a = job("Ana Silva");
    let mut b = job("Ben Okafor");
    b.customer_phone = None;
    let c = job("Cleo Park");
    let mut h = Harness::new(&[a.clone(), b.clone(), c.clone()], &[]).await;
    h.session.enter_bulk_mode();
    h.session.select_all();

    let action = BulkAction::Remind {
        template: MessageTemplate::new("Hi {{first_name}}, {{business_name}} visits {{date}}."),
    };
    let prerequisite = Some(action.default_prerequisite());
    let outcome = h
        .session
        .run_bulk(action, prerequisite, &CancellationToken::new())
        .await;

    assert_eq!(
        outcome.outbound.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![a.id, c.id]
    );
    assert_eq!(
        outcome.outbound[0].message,
        "Hi Ana, Clearwater Pools visits Tuesday, April 14."
    );
    assert_eq!(outcome.report.ineligible, vec![b.id]);
    assert!(h.backend.writes().is_empty());
}

#[tokio::test]
async fn test_bulk_assign_skips_placeholder_only_targets_per_item() {
    let targets = jobs(2);
    let pending = Helper::placeholder("Lee");
    let mut h = Harness::new(&targets, &[pending.clone()]).await;
    h.session.enter_bulk_mode();
    h.session.select_all();

    let outcome = h
        .session
        .run_bulk(
            BulkAction::Assign {
                helper_ids: vec![pending.id],
            },
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(h.backend.writes().is_empty());
    for r in &outcome.report.results {
        assert_eq!(r.error().unwrap().kind(), ErrorKind::AllTargetsPlaceholder);
    }
    assert_eq!(h.session.selection().len(), 2);
}

#[tokio::test]
async fn test_selection_ignored_outside_bulk_mode() {
    let targets = jobs(2);
    let mut h = Harness::new(&targets, &[]).await;
    assert!(!h.session.toggle(targets[0].id));
    h.session.enter_bulk_mode();
    assert!(h.session.toggle(targets[0].id));
    assert!(!h.session.toggle(Uuid::new_v4()));
    h.session.exit_bulk_mode();
    assert!(h.session.selection().is_empty());
    assert!(!h.session.in_bulk_mode());
}

#[tokio::test]
async fn test_executor_sees_each_call_sequentially() {
    struct Overlap {
        in_flight: AtomicUsize,
        max: AtomicUsize,
    }

    #[async_trait]
    impl BulkExecutor for Overlap {
        async fn apply(&self, _job: &Job, _action: &BulkAction) -> Result<ItemSuccess> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ItemSuccess::default())
        }
    }

    let executor = Arc::new(Overlap {
        in_flight: AtomicUsize::new(0),
        max: AtomicUsize::new(0),
    });
    FanOut::new(executor.clone())
        .apply_to_all(&jobs(4), &BulkAction::MarkPaid, None, &CancellationToken::new())
        .await;
    assert_eq!(executor.max.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mark_paid_retry_records_one_payment() {
    let j = job("Ana Silva");
    let mut h = Harness::new(&[j.clone()], &[]).await;
    h.backend.fail_writes_for(j.id, connection_error());
    h.session.enter_bulk_mode();
    h.session.select_all();

    for _ in 0..2 {
        let outcome = h
            .session
            .run_bulk(BulkAction::MarkPaid, None, &CancellationToken::new())
            .await;
        assert_eq!(outcome.report.failed_ids(), vec![j.id]);
    }
    assert_eq!(h.payments().len(), 1);
    assert_eq!(h.backend.job(j.id).payment_status, PaymentStatus::Unpaid);
    assert_eq!(h.session.selection().ids(), &[j.id]);

    h.backend.clear_write_failures();
    let outcome = h
        .session
        .run_bulk(BulkAction::MarkPaid, None, &CancellationToken::new())
        .await;
    assert_eq!(outcome.report.succeeded_ids(), vec![j.id]);
    assert_eq!(h.payments().len(), 1);
    assert_eq!(h.backend.job(j.id).payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_every_bulk_action_classifies_expiry_the_same_way() {
    let j = job("Ana Silva");
    let helper = Helper::new("Sam");
    let config = CoordinatorConfig {
        auth: AuthPolicy::legacy_grace().with_connected_at(Utc::now() - Duration::minutes(2)),
        ..CoordinatorConfig::default()
    };
    let mut h = Harness::with_config(&[j.clone()], &[helper.clone()], config).await;
    h.backend.fail_writes_for(j.id, expired_error());
    h.session.enter_bulk_mode();

    let actions = vec![
        BulkAction::Assign {
            helper_ids: vec![helper.id],
        },
        BulkAction::Reschedule { date: date(21) },
        BulkAction::MarkPaid,
    ];
    for action in actions {
        h.session.select_all();
        let name = action.name();
        let outcome = h
            .session
            .run_bulk(action, None, &CancellationToken::new())
            .await;
        let kinds: Vec<ErrorKind> = outcome
            .report
            .results
            .iter()
            .filter_map(|r| r.error().map(CrewError::kind))
            .collect();
        assert_eq!(kinds, vec![ErrorKind::Unknown], "action {}", name);
    }
}

#[tokio::test]
async fn test_cancel_during_last_item_is_reported() {
    let targets = jobs(3);
    let token = CancellationToken::new();
    let mut executor = CountingExecutor::new(token.clone());
    executor.cancel_after = Some(3);
    let executor = Arc::new(executor);

    let report = FanOut::new(executor.clone())
        .apply_to_all(&targets, &BulkAction::MarkPaid, None, &token)
        .await;

    assert_eq!(report.attempted(), 3);
    assert!(report.not_started.is_empty());
    assert!(report.cancelled);
}
