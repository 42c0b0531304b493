use crate::error::{CrewError, ErrorKind};
use crate::fanout::{FailedTarget, FanOutSummary};
use crate::messaging::QueueSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

/// A user-visible message. Every failure path produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub text: String,
}

impl Notification {
    fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Notification for a failed single operation. A re-click while busy is
/// ignored silently; every other error is shown.
pub fn for_error(err: &CrewError) -> Option<Notification> {
    let text = match err.kind() {
        ErrorKind::Busy => return None,
        ErrorKind::Connection => {
            "Couldn't reach the server. Check your connection and try again.".to_string()
        }
        ErrorKind::AuthExpired => {
            "Your connection has expired. Reconnect your account, then try again.".to_string()
        }
        ErrorKind::NotFound => format!("{}. It may have been removed.", err),
        ErrorKind::StaleJob => {
            "The job changed before the update finished, so nothing was applied.".to_string()
        }
        _ => err.to_string(),
    };
    Some(Notification::new(Level::Error, text))
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "job"
    } else {
        "jobs"
    }
}

fn names(failed: &[FailedTarget]) -> String {
    failed
        .iter()
        .map(|f| f.label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn extras(ineligible: usize, not_started: usize) -> String {
    let mut out = String::new();
    if ineligible > 0 {
        out.push_str(&format!(" {} not eligible.", ineligible));
    }
    if not_started > 0 {
        out.push_str(&format!(" {} not started after cancel.", not_started));
    }
    out
}

pub fn for_summary(action: &str, summary: &FanOutSummary) -> Notification {
    match summary {
        FanOutSummary::NothingAttempted {
            ineligible,
            not_started,
        } => Notification::new(
            Level::Warning,
            format!(
                "No jobs were updated for {}.{}",
                action,
                extras(*ineligible, *not_started)
            ),
        ),
        FanOutSummary::AllSucceeded {
            succeeded,
            ineligible,
            not_started,
        } => Notification::new(
            Level::Success,
            format!(
                "{} done for {} {}.{}",
                capitalize(action),
                succeeded,
                plural(*succeeded),
                extras(*ineligible, *not_started)
            ),
        ),
        FanOutSummary::Partial {
            succeeded,
            failed,
            ineligible,
            not_started,
        } => Notification::new(
            Level::Warning,
            format!(
                "{}: {} succeeded, {} failed ({}).{}",
                capitalize(action),
                succeeded,
                failed.len(),
                names(failed),
                extras(*ineligible, *not_started)
            ),
        ),
        FanOutSummary::AllFailed {
            failed,
            ineligible,
            not_started,
        } => Notification::new(
            Level::Error,
            format!(
                "{} failed for all {} {} ({}). Your selection was kept so you can retry.{}",
                capitalize(action),
                failed.len(),
                plural(failed.len()),
                names(failed),
                extras(*ineligible, *not_started)
            ),
        ),
    }
}

pub fn for_queue(summary: &QueueSummary) -> Notification {
    let mut text = format!("Sent {} of {} messages.", summary.sent, summary.total);
    if summary.skipped > 0 {
        text.push_str(&format!(" Skipped {}.", summary.skipped));
    }
    Notification::new(Level::Info, text)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
