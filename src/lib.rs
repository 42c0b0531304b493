pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod messaging;
pub mod model;
pub mod notify;
pub mod session;
pub mod shutdown;
pub mod store;

pub use error::{CrewError, ErrorKind, Result};
