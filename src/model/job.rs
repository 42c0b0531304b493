use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

/// Ordered, duplicate-free set of helper ids assigned to a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentSet(Vec<Uuid>);

impl AssignmentSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_ids<I: IntoIterator<Item = Uuid>>(ids: I) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Returns false if the helper was already assigned.
    pub fn insert(&mut self, helper_id: Uuid) -> bool {
        if self.0.contains(&helper_id) {
            return false;
        }
        self.0.push(helper_id);
        true
    }

    pub fn remove(&mut self, helper_id: &Uuid) -> bool {
        let before = self.0.len();
        self.0.retain(|id| id != helper_id);
        before != self.0.len()
    }

    pub fn contains(&self, helper_id: &Uuid) -> bool {
        self.0.contains(helper_id)
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Array columns come back as `null` when never written.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AssignmentSet, D::Error> {
    Ok(Option::<AssignmentSet>::deserialize(deserializer)?.unwrap_or_default())
}

/// Transient copy of a job row. The remote store is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub scheduled_date: NaiveDate,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub assigned_helper_ids: AssignmentSet,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub amount_due_cents: Option<i64>,
}

impl Job {
    pub fn new(customer_name: impl Into<String>, scheduled_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_name: customer_name.into(),
            customer_phone: None,
            scheduled_date,
            status: JobStatus::Pending,
            assigned_helper_ids: AssignmentSet::new(),
            payment_status: PaymentStatus::Unpaid,
            amount_due_cents: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.customer_phone = Some(phone.into());
        self
    }

    /// Completed jobs are frozen with respect to assignment changes.
    pub fn accepts_assignment_changes(&self) -> bool {
        self.status != JobStatus::Completed
    }

    pub fn has_phone(&self) -> bool {
        self.customer_phone
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Helper {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Added to the team but has not completed signup.
    #[serde(default)]
    pub placeholder: bool,
}

impl Helper {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            phone: None,
            placeholder: false,
        }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(name)
        }
    }
}

/// Team members known to the view. Placeholder checks run against this roster
/// so they never need a network call.
#[derive(Debug, Clone, Default)]
pub struct TeamRoster {
    helpers: HashMap<Uuid, Helper>,
}

impl TeamRoster {
    pub fn new(helpers: impl IntoIterator<Item = Helper>) -> Self {
        Self {
            helpers: helpers.into_iter().map(|h| (h.id, h)).collect(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Helper> {
        self.helpers.get(id)
    }

    pub fn upsert(&mut self, helper: Helper) {
        self.helpers.insert(helper.id, helper);
    }

    pub fn is_placeholder(&self, id: &Uuid) -> bool {
        self.helpers.get(id).is_some_and(|h| h.placeholder)
    }

    /// Split ids into (real, placeholder), preserving input order and dropping
    /// duplicates. Ids missing from the roster count as real; the remote store
    /// has the final word on those.
    pub fn partition(&self, ids: &[Uuid]) -> (Vec<Uuid>, Vec<Uuid>) {
        let mut real = Vec::new();
        let mut placeholders = Vec::new();
        for id in ids {
            if real.contains(id) || placeholders.contains(id) {
                continue;
            }
            if self.is_placeholder(id) {
                placeholders.push(*id);
            } else {
                real.push(*id);
            }
        }
        (real, placeholders)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}
