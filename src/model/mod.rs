pub mod job;
pub mod selection;
pub mod speculative;

pub use job::{AssignmentSet, Helper, Job, JobStatus, PaymentStatus, TeamRoster};
pub use selection::Selection;
pub use speculative::{JobBoard, Speculative};
