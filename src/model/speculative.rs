use std::collections::HashMap;

use uuid::Uuid;

use crate::model::job::Job;

/// A locally held value and how far it is trusted.
#[derive(Debug, Clone, PartialEq)]
pub enum Speculative<T> {
    /// Matches what the remote store last returned.
    Confirmed(T),
    /// A patch shown to the user while the write is in flight.
    Speculative { confirmed: T, pending: T },
    /// The write failed; shows the last confirmed value until a refetch lands.
    RollingBack { last_confirmed: T },
}

impl<T: Clone> Speculative<T> {
    /// The value the UI should render.
    pub fn visible(&self) -> &T {
        match self {
            Speculative::Confirmed(value) => value,
            Speculative::Speculative { pending, .. } => pending,
            Speculative::RollingBack { last_confirmed } => last_confirmed,
        }
    }

    pub fn confirmed(&self) -> &T {
        match self {
            Speculative::Confirmed(value) => value,
            Speculative::Speculative { confirmed, .. } => confirmed,
            Speculative::RollingBack { last_confirmed } => last_confirmed,
        }
    }

    pub fn speculate(&mut self, pending: T) {
        let confirmed = self.confirmed().clone();
        *self = Speculative::Speculative { confirmed, pending };
    }

    pub fn confirm(&mut self, value: T) {
        *self = Speculative::Confirmed(value);
    }

    /// Drop a patch that was never sent.
    pub fn revert(&mut self) {
        let confirmed = self.confirmed().clone();
        *self = Speculative::Confirmed(confirmed);
    }

    pub fn invalidate(&mut self) {
        let last_confirmed = self.confirmed().clone();
        *self = Speculative::RollingBack { last_confirmed };
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Speculative::Confirmed(_))
    }

    pub fn is_rolling_back(&self) -> bool {
        matches!(self, Speculative::RollingBack { .. })
    }
}

/// The view's transient copy of the job list.
#[derive(Debug, Clone, Default)]
pub struct JobBoard {
    order: Vec<Uuid>,
    entries: HashMap<Uuid, Speculative<Job>>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole board with a fresh fetch. Everything becomes confirmed.
    pub fn replace_all(&mut self, jobs: Vec<Job>) {
        self.order = jobs.iter().map(|j| j.id).collect();
        self.entries = jobs
            .into_iter()
            .map(|j| (j.id, Speculative::Confirmed(j)))
            .collect();
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.entries.get(id).map(Speculative::visible)
    }

    pub fn entry(&self, id: &Uuid) -> Option<&Speculative<Job>> {
        self.entries.get(id)
    }

    /// Apply a speculative patch. Returns false if the job is not on the board.
    pub fn speculate<F: FnOnce(&mut Job)>(&mut self, id: &Uuid, patch: F) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let mut pending = entry.visible().clone();
        patch(&mut pending);
        entry.speculate(pending);
        true
    }

    pub fn confirm(&mut self, job: Job) {
        match self.entries.get_mut(&job.id) {
            Some(entry) => entry.confirm(job),
            None => {
                self.order.push(job.id);
                self.entries.insert(job.id, Speculative::Confirmed(job));
            }
        }
    }

    pub fn invalidate(&mut self, id: &Uuid) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.invalidate();
        }
    }

    pub fn revert(&mut self, id: &Uuid) {
        if let Some(entry) = self.entries.get_mut(id) {
            if !entry.is_rolling_back() {
                entry.revert();
            }
        }
    }

    /// True when some entry is waiting on a full refetch.
    pub fn needs_refetch(&self) -> bool {
        self.entries.values().any(Speculative::is_rolling_back)
    }

    pub fn jobs(&self) -> Vec<&Job> {
        self.order.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Visible copies of the given jobs, in the order asked for. Unknown ids are skipped.
    pub fn snapshot(&self, ids: &[Uuid]) -> Vec<Job> {
        ids.iter().filter_map(|id| self.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
