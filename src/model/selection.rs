use uuid::Uuid;

/// Jobs chosen by the user for a bulk action, in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<Uuid>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of a job. Returns true if the job is now selected.
    pub fn toggle(&mut self, job_id: Uuid) -> bool {
        if let Some(pos) = self.ids.iter().position(|id| *id == job_id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(job_id);
            true
        }
    }

    pub fn select_all<I: IntoIterator<Item = Uuid>>(&mut self, job_ids: I) {
        for id in job_ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
    }

    pub fn remove_all(&mut self, job_ids: &[Uuid]) {
        self.ids.retain(|id| !job_ids.contains(id));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, job_id: &Uuid) -> bool {
        self.ids.contains(job_id)
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
