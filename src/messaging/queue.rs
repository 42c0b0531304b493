use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{CrewError, Result};
use crate::messaging::cursor::{CursorStore, MessageQueueCursor};
use crate::messaging::dispatch::MessageDispatcher;

/// One composed message awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Id the cursor persists (the job the message is about)
    pub id: Uuid,
    pub name: String,
    /// Phone number or other destination handle
    pub handle: String,
    pub message: String,
}

/// Rebuilds recipients from persisted ids after a relaunch.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn resolve(&self, ids: &[Uuid], template: Option<&str>) -> Result<Vec<Recipient>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    AwaitingConfirmation { index: usize },
    /// Handed off; waiting for the user to come back from the messaging app.
    Dispatched { index: usize },
    Complete,
    Cancelled,
}

impl QueueState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueueState::AwaitingConfirmation { .. } | QueueState::Dispatched { .. }
        )
    }
}

/// Counts for the current process; a resumed queue starts from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub total: usize,
    pub sent: usize,
    pub skipped: usize,
}

/// Walks recipients one at a time; each message needs explicit confirmation
/// before it is handed to the device.
///
/// The cursor is written before each hand-off, so a process torn down while
/// the user is in the messaging app resumes at the next recipient instead of
/// sending the same message twice.
pub struct TemplateMessageQueue {
    store: Arc<dyn CursorStore>,
    dispatcher: Arc<dyn MessageDispatcher>,
    key: String,
    recipients: Vec<Recipient>,
    template: Option<String>,
    state: QueueState,
    sent: usize,
    skipped: usize,
}

impl TemplateMessageQueue {
    pub fn new(
        store: Arc<dyn CursorStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            key: key.into(),
            recipients: Vec::new(),
            template: None,
            state: QueueState::Idle,
            sent: 0,
            skipped: 0,
        }
    }

    /// Build a queue, resuming from a persisted cursor when one exists.
    pub async fn restore(
        store: Arc<dyn CursorStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
        key: impl Into<String>,
        directory: &dyn RecipientDirectory,
    ) -> Result<Self> {
        let mut queue = Self::new(store, dispatcher, key);
        let Some(cursor) = MessageQueueCursor::load(queue.store.as_ref(), &queue.key).await? else {
            return Ok(queue);
        };

        let resolved = directory
            .resolve(&cursor.recipient_ids, cursor.template.as_deref())
            .await?;

        // Keep persisted order; recipients that no longer resolve are dropped
        // and the index shifts past any that were before it.
        let mut recipients = Vec::with_capacity(cursor.recipient_ids.len());
        let mut index = 0;
        for (pos, id) in cursor.recipient_ids.iter().enumerate() {
            if let Some(r) = resolved.iter().find(|r| r.id == *id) {
                if pos < cursor.index {
                    index += 1;
                }
                recipients.push(r.clone());
            }
        }

        tracing::info!(
            key = %queue.key,
            index,
            total = recipients.len(),
            "Resuming message queue"
        );
        queue.recipients = recipients;
        queue.template = cursor.template;
        if index >= queue.recipients.len() {
            queue.complete().await?;
        } else {
            queue.state = QueueState::AwaitingConfirmation { index };
            queue.persist(index).await?;
        }
        Ok(queue)
    }

    /// Begin a new walk. An empty list completes immediately.
    ///
    /// Refused while a walk is active here or a cursor from an earlier,
    /// interrupted walk is still persisted; that one must be resumed or
    /// cancelled first.
    pub async fn start(&mut self, recipients: Vec<Recipient>, template: Option<String>) -> Result<()> {
        if self.state.is_active() {
            return Err(CrewError::QueueInProgress);
        }
        if MessageQueueCursor::load(self.store.as_ref(), &self.key)
            .await?
            .is_some()
        {
            tracing::warn!(key = %self.key, "Refusing to overwrite an interrupted message queue");
            return Err(CrewError::QueueInProgress);
        }
        self.recipients = recipients;
        self.template = template;
        self.sent = 0;
        self.skipped = 0;
        tracing::info!(key = %self.key, total = self.recipients.len(), "Starting message queue");

        if self.recipients.is_empty() {
            return self.complete().await;
        }
        self.persist(0).await?;
        self.state = QueueState::AwaitingConfirmation { index: 0 };
        Ok(())
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// The recipient awaiting confirmation, if any.
    pub fn current(&self) -> Option<&Recipient> {
        match self.state {
            QueueState::AwaitingConfirmation { index } => self.recipients.get(index),
            _ => None,
        }
    }

    /// Replace the composed text of the current message before confirming.
    pub fn edit_current(&mut self, text: impl Into<String>) -> bool {
        let QueueState::AwaitingConfirmation { index } = self.state else {
            return false;
        };
        match self.recipients.get_mut(index) {
            Some(r) => {
                r.message = text.into();
                true
            }
            None => false,
        }
    }

    /// Hand the current message to the device and move on.
    pub async fn confirm(&mut self) -> Result<QueueState> {
        let QueueState::AwaitingConfirmation { index } = self.state else {
            return Ok(self.state);
        };
        let Some(recipient) = self.recipients.get(index).cloned() else {
            self.complete().await?;
            return Ok(self.state);
        };

        self.persist(index + 1).await?;
        self.dispatcher.dispatch(&recipient.handle, &recipient.message);
        self.sent += 1;
        self.state = QueueState::Dispatched { index };
        tracing::debug!(key = %self.key, index, "Message dispatched");

        if !self.dispatcher.leaves_app() {
            self.advance_from(index).await?;
        }
        Ok(self.state)
    }

    /// Move past the current recipient without sending.
    pub async fn skip(&mut self) -> Result<QueueState> {
        let QueueState::AwaitingConfirmation { index } = self.state else {
            return Ok(self.state);
        };
        self.skipped += 1;
        self.persist(index + 1).await?;
        self.advance_from(index).await?;
        Ok(self.state)
    }

    /// The host app is back in front; continue after a hand-off.
    pub async fn on_foreground(&mut self) -> Result<QueueState> {
        if let QueueState::Dispatched { index } = self.state {
            self.advance_from(index).await?;
        }
        Ok(self.state)
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.store.remove(&self.key).await?;
        self.state = QueueState::Cancelled;
        tracing::info!(key = %self.key, sent = self.sent, "Message queue cancelled");
        Ok(())
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            total: self.recipients.len(),
            sent: self.sent,
            skipped: self.skipped,
        }
    }

    async fn advance_from(&mut self, index: usize) -> Result<()> {
        let next = index + 1;
        if next >= self.recipients.len() {
            self.complete().await
        } else {
            self.state = QueueState::AwaitingConfirmation { index: next };
            Ok(())
        }
    }

    async fn complete(&mut self) -> Result<()> {
        self.store.remove(&self.key).await?;
        self.state = QueueState::Complete;
        tracing::info!(
            key = %self.key,
            sent = self.sent,
            skipped = self.skipped,
            "Message queue complete"
        );
        Ok(())
    }

    async fn persist(&self, index: usize) -> Result<()> {
        let cursor = MessageQueueCursor {
            index,
            recipient_ids: self.recipients.iter().map(|r| r.id).collect(),
            template: self.template.clone(),
        };
        cursor.save(self.store.as_ref(), &self.key).await
    }
}
