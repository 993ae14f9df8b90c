// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tributary_bus::{EventBus, MemoryBroker, MessageDispatch};
use tributary_core::{DocumentStore, FeedIndexer, MessageBroker};
use tributary_scheduler::{
    CommandOutcome, DeferOptions, DeferredDispatcher, DeferredMessage, DeliveryOptions, DispatchFeedIndexer,
    DispatcherSettings, INDEX_FEED, MESSAGE_SCHEDULER, Scheduler, SchedulerClient, SchedulerCommand,
    SchedulerListener, bootstrap, scheduler_indexes,
};
use tributary_storage::{Database, SqliteDocumentStore};

const PING: &str = "ping";

struct Fixture {
    store: Arc<dyn DocumentStore>,
    broker: Arc<MemoryBroker>,
    dispatch: MessageDispatch,
    _dir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db, scheduler_indexes()));
        let broker = Arc::new(MemoryBroker::new());
        let dispatch = MessageDispatch::new(broker.clone());
        bootstrap(store.as_ref(), &dispatch, false).await.unwrap();
        dispatch.declare(PING, Some(PING)).await.unwrap();
        Self {
            store,
            broker,
            dispatch,
            _dir: dir,
        }
    }

    fn listener(&self) -> SchedulerListener {
        SchedulerListener::new(self.store.clone(), Arc::new(Notify::new()))
    }

    fn dispatcher(&self, settings: DispatcherSettings, events: Option<Arc<EventBus>>) -> DeferredDispatcher {
        DeferredDispatcher::new(
            self.store.clone(),
            self.dispatch.clone(),
            events,
            settings,
            Arc::new(Notify::new()),
        )
    }

    async fn drain(&self, queue: &str) -> Vec<Value> {
        let pending = self.broker.pending(queue).await.unwrap();
        let mut out = Vec::new();
        for _ in 0..pending {
            let delivery = tokio::time::timeout(Duration::from_secs(1), self.broker.receive(queue))
                .await
                .unwrap()
                .unwrap();
            self.broker.ack(&delivery).await.unwrap();
            out.push(delivery.payload);
        }
        out
    }
}

fn schedule_ping(offset: TimeDelta, message_id: Option<&str>, n: u64) -> SchedulerCommand {
    SchedulerCommand::schedule(Utc::now() + offset, &DeliveryOptions::work(PING), json!({ "n": n }), message_id)
}

#[tokio::test]
async fn schedule_is_idempotent_by_message_id() {
    let fx = Fixture::new().await;
    let listener = fx.listener();

    let first = listener.apply(schedule_ping(TimeDelta::hours(1), Some("m1"), 1)).await.unwrap();
    assert_eq!(first, CommandOutcome::Scheduled { id: "DeferredMessage:m1".into() });
    listener.apply(schedule_ping(TimeDelta::hours(2), Some("m1"), 2)).await.unwrap();

    let stored = DeferredMessage::lookup_by_message_id(fx.store.as_ref(), "m1").await.unwrap().unwrap();
    assert_eq!(stored.message, json!({"n": 2}));
    assert_eq!(stored.rev(), Some(2));

    let anon = listener.apply(schedule_ping(TimeDelta::hours(1), None, 3)).await.unwrap();
    let CommandOutcome::Scheduled { id } = anon else { panic!("not scheduled") };
    assert!(DeferredMessage::get(fx.store.as_ref(), &id).await.unwrap().is_some());
}

#[tokio::test]
async fn claimed_message_cannot_be_rescheduled_or_cancelled() {
    let fx = Fixture::new().await;
    let listener = fx.listener();
    listener.apply(schedule_ping(TimeDelta::hours(1), Some("busy"), 1)).await.unwrap();

    let mut stored = DeferredMessage::lookup_by_message_id(fx.store.as_ref(), "busy").await.unwrap().unwrap();
    assert!(stored.claim(fx.store.as_ref()).await.unwrap());
    assert!(!stored.claim(fx.store.as_ref()).await.unwrap());

    let late = listener.apply(schedule_ping(TimeDelta::hours(3), Some("busy"), 2)).await.unwrap();
    assert_eq!(late, CommandOutcome::Ignored);
    let cancel = SchedulerCommand::Cancel { message_id: Some("busy".into()) };
    assert_eq!(listener.apply(cancel).await.unwrap(), CommandOutcome::Ignored);
}

#[tokio::test]
async fn malformed_requests_are_ignored() {
    let fx = Fixture::new().await;
    let listener = fx.listener();
    let bad_priority = SchedulerCommand::Schedule {
        timestamp: Utc::now(),
        exchange: Default::default(),
        routing_key: PING.into(),
        message: json!({}),
        message_id: None,
        delivery_mode: None,
        mandatory: None,
        priority: Some(42),
    };
    assert_eq!(listener.apply(bad_priority).await.unwrap(), CommandOutcome::Ignored);
    let missing = SchedulerCommand::Cancel { message_id: Some("ghost".into()) };
    assert_eq!(listener.apply(missing).await.unwrap(), CommandOutcome::Ignored);
    assert_eq!(listener.apply(SchedulerCommand::Noop).await.unwrap(), CommandOutcome::Noop);
}

#[tokio::test]
async fn due_messages_are_sent_once_and_deleted() {
    let fx = Fixture::new().await;
    let listener = fx.listener();
    listener.apply(schedule_ping(TimeDelta::seconds(-5), Some("due"), 1)).await.unwrap();
    listener.apply(schedule_ping(TimeDelta::seconds(-1), None, 2)).await.unwrap();
    listener.apply(schedule_ping(TimeDelta::hours(1), Some("later"), 3)).await.unwrap();

    let dispatcher = fx.dispatcher(DispatcherSettings::default(), None);
    let checked = dispatcher.send_ready_messages().await.unwrap();
    let sent = fx.drain(PING).await;
    assert_eq!(sent, vec![json!({"n": 1}), json!({"n": 2})]);
    assert!(DeferredMessage::lookup_by_message_id(fx.store.as_ref(), "due").await.unwrap().is_none());

    let next = dispatcher.next_send_time(checked).await.unwrap().unwrap();
    assert!(next > Utc::now() + TimeDelta::minutes(59));

    dispatcher.send_ready_messages().await.unwrap();
    assert!(fx.drain(PING).await.is_empty());
}

#[tokio::test]
async fn cancelled_message_is_never_sent() {
    let fx = Fixture::new().await;
    let listener = fx.listener();
    listener.apply(schedule_ping(TimeDelta::seconds(-1), Some("c"), 1)).await.unwrap();
    let cancel = SchedulerCommand::Cancel { message_id: Some("c".into()) };
    assert_eq!(
        listener.apply(cancel).await.unwrap(),
        CommandOutcome::Cancelled { id: "DeferredMessage:c".into() }
    );

    fx.dispatcher(DispatcherSettings::default(), None)
        .send_ready_messages()
        .await
        .unwrap();
    assert!(fx.drain(PING).await.is_empty());
}

#[tokio::test]
async fn failed_send_is_rescheduled_with_backoff() {
    let fx = Fixture::new().await;
    let listener = fx.listener();
    let mut options = DeliveryOptions::work("nobody_listens");
    options.mandatory = true;
    let cmd = SchedulerCommand::schedule(Utc::now() - TimeDelta::seconds(1), &options, json!({}), Some("f"));
    listener.apply(cmd).await.unwrap();

    let before = Utc::now();
    fx.dispatcher(DispatcherSettings::default(), None)
        .send_ready_messages()
        .await
        .unwrap();

    let stored = DeferredMessage::lookup_by_message_id(fx.store.as_ref(), "f").await.unwrap().unwrap();
    assert!(!stored.claimed);
    assert_eq!(stored.error_count, 1);
    assert!(stored.timestamp >= before + TimeDelta::seconds(2));
}

#[tokio::test]
async fn stale_claims_are_recovered_and_redelivered() {
    let fx = Fixture::new().await;
    let mut crashed = DeferredMessage::new(
        Some("crashed"),
        Utc::now() - TimeDelta::minutes(10),
        DeliveryOptions::work(PING),
        json!({"n": 9}),
    );
    crashed.claimed = true;
    crashed.save(fx.store.as_ref()).await.unwrap();

    let mut fresh = DeferredMessage::new(Some("fresh"), Utc::now(), DeliveryOptions::work(PING), json!({"n": 1}));
    fresh.claimed = true;
    fresh.save(fx.store.as_ref()).await.unwrap();

    let settings = DispatcherSettings {
        max_backoff_exponent: 0,
        max_retry_delay: Duration::ZERO,
        ..DispatcherSettings::default()
    };
    let dispatcher = fx.dispatcher(settings, None);
    assert_eq!(dispatcher.cleanup().await.unwrap(), 1);

    dispatcher.send_ready_messages().await.unwrap();
    assert_eq!(fx.drain(PING).await, vec![json!({"n": 9})]);
    let still_claimed = DeferredMessage::lookup_by_message_id(fx.store.as_ref(), "fresh").await.unwrap().unwrap();
    assert!(still_claimed.claimed);
}

#[tokio::test]
async fn deferred_events_reach_the_event_bus() {
    let fx = Fixture::new().await;
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe("news");

    let cmd = SchedulerCommand::schedule(
        Utc::now() - TimeDelta::seconds(1),
        &DeliveryOptions::event("news"),
        json!({"headline": "hi"}),
        None,
    );
    fx.listener().apply(cmd).await.unwrap();
    fx.dispatcher(DispatcherSettings::default(), Some(bus.clone()))
        .send_ready_messages()
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, json!({"headline": "hi"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_scheduler_delivers_when_due() {
    let fx = Fixture::new().await;
    let cancel = CancellationToken::new();
    let settings = DispatcherSettings {
        min_sleep: Duration::from_millis(100),
        ..DispatcherSettings::default()
    };
    let handle = Scheduler::new(fx.store.clone(), fx.dispatch.clone())
        .with_settings(settings)
        .start(cancel.clone())
        .await
        .unwrap();

    let client = SchedulerClient::new(fx.dispatch.clone());
    let due = Utc::now() + TimeDelta::seconds(2);
    client
        .defer_message(due, &json!({"n": 1}), PING, &DeferOptions::with_id("soon"))
        .await
        .unwrap();
    client
        .defer_message(due, &json!({"n": 2}), PING, &DeferOptions::with_id("dropped"))
        .await
        .unwrap();
    client.cancel_deferred("dropped").await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(fx.broker.pending(PING).await.unwrap(), 0);

    let mut delivered = Vec::new();
    for _ in 0..60 {
        delivered.extend(fx.drain(PING).await);
        if !delivered.is_empty() && Utc::now() > due + TimeDelta::seconds(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(Utc::now() >= due);
    assert_eq!(delivered, vec![json!({"n": 1})]);

    cancel.cancel();
    handle.join().await;
}

#[tokio::test]
async fn feed_indexer_publishes_and_defers() {
    let fx = Fixture::new().await;
    fx.dispatch.declare(INDEX_FEED, Some(INDEX_FEED)).await.unwrap();
    let indexer = DispatchFeedIndexer::new(fx.dispatch.clone());

    indexer.request_feed_index("http://example.com/rss").await.unwrap();
    assert_eq!(fx.drain(INDEX_FEED).await, vec![json!({"url": "http://example.com/rss"})]);

    let at = Utc::now() + TimeDelta::minutes(5);
    indexer.schedule_feed_index("http://example.com/rss", at).await.unwrap();
    let commands = fx.drain(MESSAGE_SCHEDULER).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command"], "schedule");
    assert_eq!(commands[0]["routing_key"], INDEX_FEED);
    assert_eq!(commands[0]["mandatory"], true);
}
