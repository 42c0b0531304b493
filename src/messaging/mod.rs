//! Confirm-and-send walk over a list of message recipients.
//!
//! - [`TemplateMessageQueue`]: the state machine, one recipient at a time
//! - [`CursorStore`]: key/value persistence so a walk survives the process
//!   being torn down while the user is in the messaging app
//! - [`MessageDispatcher`]: fire-and-forget hand-off to the device
//! - [`MessageTemplate`]: placeholder substitution for composed messages

pub mod cursor;
pub mod dispatch;
pub mod queue;
pub mod template;

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, MessageQueueCursor};
pub use dispatch::{sms_link, MessageDispatcher, SmsLinkDispatcher};
pub use queue::{QueueState, QueueSummary, Recipient, RecipientDirectory, TemplateMessageQueue};
pub use template::MessageTemplate;
