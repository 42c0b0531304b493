
use std::sync::Arc;

use crewline::error::CrewError;
use crewline::fanout::actions::ReminderDirectory;
use crewline::messaging::{
    CursorStore, FileCursorStore, MemoryCursorStore, MessageQueueCursor, QueueState,
    TemplateMessageQueue,
};
use crewline::store::JobStore;
use test_harness::{job, recipients, FakeBackend, RecordingDispatcher, StaticDirectory};

const KEY: &str = "message-queue-cursor";

fn queue_with(
    store: &MemoryCursorStore,
    dispatcher: &Arc<RecordingDispatcher>,
) -> TemplateMessageQueue {
    TemplateMessageQueue::new(Arc::new(store.clone()), dispatcher.clone(), KEY)
}

#[tokio::test]
async fn test_relaunch_after_first_send_resumes_at_second_recipient() {
    let store = MemoryCursorStore::new();
    let list = recipients(3);
    let dispatcher = Arc::new(RecordingDispatcher::leaving_app());

    let mut queue = queue_with(&store, &dispatcher);
    queue.start(list.clone(), None).await.unwrap();
    let state = queue.confirm().await.unwrap();
    assert_eq!(state, QueueState::Dispatched { index: 0 });
    assert_eq!(dispatcher.sent(), vec![(list[0].handle.clone(), list[0].message.clone())]);
    // Torn down while the user is in the messaging app.
    drop(queue);

    let relaunched = Arc::new(RecordingDispatcher::leaving_app());
    let queue = TemplateMessageQueue::restore(
        Arc::new(store.clone()),
        relaunched.clone(),
        KEY,
        &StaticDirectory(list.clone()),
    )
    .await
    .unwrap();

    assert_eq!(queue.state(), QueueState::AwaitingConfirmation { index: 1 });
    assert_eq!(queue.current(), Some(&list[1]));
    assert!(relaunched.sent().is_empty());
}

#[tokio::test]
async fn test_restore_presents_persisted_index() {
    let store = MemoryCursorStore::new();
    let list = recipients(4);
    MessageQueueCursor {
        index: 2,
        recipient_ids: list.iter().map(|r| r.id).collect(),
        template: None,
    }
    .save(&store, KEY)
    .await
    .unwrap();

    let queue = TemplateMessageQueue::restore(
        Arc::new(store.clone()),
        Arc::new(RecordingDispatcher::in_app()),
        KEY,
        &StaticDirectory(list.clone()),
    )
    .await
    .unwrap();

    assert_eq!(queue.current(), Some(&list[2]));
}

#[tokio::test]
async fn test_restore_without_cursor_is_idle() {
    let queue = TemplateMessageQueue::restore(
        Arc::new(MemoryCursorStore::new()),
        Arc::new(RecordingDispatcher::in_app()),
        KEY,
        &StaticDirectory(recipients(2)),
    )
    .await
    .unwrap();
    assert_eq!(queue.state(), QueueState::Idle);
    assert!(queue.current().is_none());
}

#[tokio::test]
async fn test_restore_drops_recipients_that_no_longer_resolve() {
    let store = MemoryCursorStore::new();
    let list = recipients(4);
    MessageQueueCursor {
        index: 2,
        recipient_ids: list.iter().map(|r| r.id).collect(),
        template: None,
    }
    .save(&store, KEY)
    .await
    .unwrap();

    // Recipient 0 was deleted in the meantime.
    let directory = StaticDirectory(list[1..].to_vec());
    let queue = TemplateMessageQueue::restore(
        Arc::new(store.clone()),
        Arc::new(RecordingDispatcher::in_app()),
        KEY,
        &directory,
    )
    .await
    .unwrap();

    assert_eq!(queue.recipients().len(), 3);
    assert_eq!(queue.current(), Some(&list[2]));
}

#[tokio::test]
async fn test_restore_past_the_end_completes_and_clears() {
    let store = MemoryCursorStore::new();
    let list = recipients(2);
    MessageQueueCursor {
        index: 2,
        recipient_ids: list.iter().map(|r| r.id).collect(),
        template: None,
    }
    .save(&store, KEY)
    .await
    .unwrap();

    let queue = TemplateMessageQueue::restore(
        Arc::new(store.clone()),
        Arc::new(RecordingDispatcher::in_app()),
        KEY,
        &StaticDirectory(list),
    )
    .await
    .unwrap();

    assert_eq!(queue.state(), QueueState::Complete);
    assert!(store.get(KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_clears_cursor() {
    let store = MemoryCursorStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::in_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(recipients(3), None).await.unwrap();
    assert!(store.get(KEY).await.unwrap().is_some());

    queue.cancel().await.unwrap();

    assert_eq!(queue.state(), QueueState::Cancelled);
    assert!(store.get(KEY).await.unwrap().is_none());
    assert!(dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_in_app_dispatch_advances_and_completion_clears_cursor() {
    let store = MemoryCursorStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::in_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(recipients(2), None).await.unwrap();

    assert_eq!(
        queue.confirm().await.unwrap(),
        QueueState::AwaitingConfirmation { index: 1 }
    );
    assert_eq!(queue.confirm().await.unwrap(), QueueState::Complete);

    assert_eq!(dispatcher.sent().len(), 2);
    assert!(store.get(KEY).await.unwrap().is_none());
    assert_eq!(queue.summary().sent, 2);
}

#[tokio::test]
async fn test_leaving_app_waits_for_foreground() {
    let store = MemoryCursorStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::leaving_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(recipients(2), None).await.unwrap();

    assert_eq!(queue.confirm().await.unwrap(), QueueState::Dispatched { index: 0 });
    assert!(queue.current().is_none());
    // A second confirm while dispatched sends nothing.
    queue.confirm().await.unwrap();
    assert_eq!(dispatcher.sent().len(), 1);

    assert_eq!(
        queue.on_foreground().await.unwrap(),
        QueueState::AwaitingConfirmation { index: 1 }
    );
}

#[tokio::test]
async fn test_skip_and_edit() {
    let store = MemoryCursorStore::new();
    let list = recipients(3);
    let dispatcher = Arc::new(RecordingDispatcher::in_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(list.clone(), None).await.unwrap();

    queue.skip().await.unwrap();
    assert!(queue.edit_current("Running late, see you at 3"));
    queue.confirm().await.unwrap();
    queue.confirm().await.unwrap();

    assert_eq!(
        dispatcher.sent(),
        vec![
            (list[1].handle.clone(), "Running late, see you at 3".to_string()),
            (list[2].handle.clone(), list[2].message.clone()),
        ]
    );
    let summary = queue.summary();
    assert_eq!((summary.total, summary.sent, summary.skipped), (3, 2, 1));
    assert!(!queue.edit_current("too late"));
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let store = MemoryCursorStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::leaving_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(recipients(2), None).await.unwrap();

    let err = queue.start(recipients(1), None).await.unwrap_err();
    assert_eq!(err, CrewError::QueueInProgress);

    queue.confirm().await.unwrap();
    let err = queue.start(recipients(1), None).await.unwrap_err();
    assert_eq!(err, CrewError::QueueInProgress);
}

#[tokio::test]
async fn test_empty_start_completes_immediately() {
    let store = MemoryCursorStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::in_app());
    let mut queue = queue_with(&store, &dispatcher);
    queue.start(Vec::new(), None).await.unwrap();
    assert_eq!(queue.state(), QueueState::Complete);
    assert!(store.get(KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_file_store_survives_relaunch() {
    let dir = tempfile::tempdir().unwrap();
    let list = recipients(3);
    let dispatcher = Arc::new(RecordingDispatcher::leaving_app());

    let mut queue = TemplateMessageQueue::new(
        Arc::new(FileCursorStore::new(dir.path())),
        dispatcher.clone(),
        KEY,
    );
    queue.start(list.clone(), Some("Hi {{first_name}}".into())).await.unwrap();
    queue.confirm().await.unwrap();
    drop(queue);

    let store = FileCursorStore::new(dir.path());
    let cursor = MessageQueueCursor::load(&store, KEY).await.unwrap().unwrap();
    assert_eq!(cursor.index, 1);
    assert_eq!(cursor.template.as_deref(), Some("Hi {{first_name}}"));

    let mut queue = TemplateMessageQueue::restore(
        Arc::new(store.clone()),
        dispatcher.clone(),
        KEY,
        &StaticDirectory(list.clone()),
    )
    .await
    .unwrap();
    assert_eq!(queue.current(), Some(&list[1]));

    queue.cancel().await.unwrap();
    assert!(store.get(KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reminder_directory_rebuilds_messages_from_jobs() {
    let backend = Arc::new(FakeBackend::new());
    let a = job("Ana Silva");
    let mut b = job("Ben Okafor");
    b.customer_phone = None;
    backend.seed_job(&a);
    backend.seed_job(&b);

    let store = MemoryCursorStore::new();
    MessageQueueCursor {
        index: 0,
        recipient_ids: vec![b.id, a.id],
        template: Some("Hi {{first_name}} from {{business_name}}".into()),
    }
    .save(&store, KEY)
    .await
    .unwrap();

    let directory = ReminderDirectory::new(JobStore::new(backend.clone()), "Clearwater Pools");
    let queue = TemplateMessageQueue::restore(
        Arc::new(store),
        Arc::new(RecordingDispatcher::in_app()),
        KEY,
        &directory,
    )
    .await
    .unwrap();

    assert_eq!(queue.recipients().len(), 1);
    let current = queue.current().unwrap();
    assert_eq!(current.id, a.id);
    assert_eq!(current.message, "Hi Ana from Clearwater Pools");
}

#[tokio::test]
async fn test_start_refuses_to_overwrite_interrupted_walk() {
    let store = MemoryCursorStore::new();
    let earlier = recipients(3);
    let dispatcher = Arc::new(RecordingDispatcher::leaving_app());

    let mut first = queue_with(&store, &dispatcher);
    first.start(earlier.clone(), None).await.unwrap();
    first.confirm().await.unwrap();
    drop(first);
    let saved = store.get(KEY).await.unwrap();

    // A fresh process starting a new walk must not clobber the old cursor.
    let mut second = queue_with(&store, &dispatcher);
    let err = second.start(recipients(2), None).await.unwrap_err();
    assert_eq!(err, CrewError::QueueInProgress);
    assert_eq!(second.state(), QueueState::Idle);
    assert_eq!(store.get(KEY).await.unwrap(), saved);

    second.cancel().await.unwrap();
    let mut third = queue_with(&store, &dispatcher);
    third.start(recipients(2), None).await.unwrap();
    assert_eq!(third.state(), QueueState::AwaitingConfirmation { index: 0 });
}
