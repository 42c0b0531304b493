use std::collections::HashMap;

use crate::model::Job;

/// Message body with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    body: String,
}

impl MessageTemplate {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Substitute known placeholders. Unknown ones are left as written.
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = after[..end].trim();
                    match values.get(key) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn render_for_job(&self, job: &Job, business_name: &str) -> String {
        self.render(&job_values(job, business_name))
    }
}

/// Placeholder values for a job reminder.
pub fn job_values(job: &Job, business_name: &str) -> HashMap<&'static str, String> {
    let mut values = HashMap::new();
    let first_name = job
        .customer_name
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    values.insert("customer_name", job.customer_name.clone());
    values.insert("first_name", first_name);
    values.insert(
        "date",
        job.scheduled_date.format("%A, %B %-d").to_string(),
    );
    values.insert("business_name", business_name.to_string());
    if let Some(cents) = job.amount_due_cents {
        values.insert("amount_due", format!("${}.{:02}", cents / 100, cents.rem_euclid(100)));
    }
    values
}
