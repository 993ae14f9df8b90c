// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot administrative subcommands.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::{info, warn};
use tributary_bus::MessageDispatch;
use tributary_config::TributaryConfig;
use tributary_core::TributaryError;
use tributary_model::{Bucket, Composite, ModelContext};
use tributary_scheduler::{DeferOptions, SchedulerClient};

/// Print the effective configuration.
pub fn check_config(config: &TributaryConfig) {
    println!("configuration OK");
    println!("  service.name           = {}", config.service.name);
    println!("  storage.database_path  = {}", config.storage.database_path);
    println!("  broker.backend         = {}", config.broker.backend);
    println!("  aggregator.enabled     = {}", config.aggregator.enabled);
    println!("  scheduler.enabled      = {}", config.scheduler.enabled);
    println!("  filters.default_action = {}", config.filters.default_action);
}

/// Subscribe `composite_id` to `bucket_id`, creating the composite if needed.
///
/// Title and url default to the source bucket's and are refreshed on an
/// existing subscription. Returns false if it already existed.
pub async fn subscribe(
    ctx: &ModelContext,
    composite_id: &str,
    bucket_id: &str,
    title: Option<&str>,
    url: Option<&str>,
) -> Result<bool, TributaryError> {
    if Composite::get(ctx, composite_id).await?.is_none() {
        Composite::new(ctx.clone(), Some(composite_id)).save().await?;
        info!(composite_id, "created composite");
    }

    let source = Bucket::get(ctx, bucket_id).await?;
    if source.is_none() {
        warn!(bucket_id, "subscribing to a bucket that does not exist yet");
    }
    let title = title.or(source.as_ref().map(|b| b.title.as_str()));
    let url = url.or(source.as_ref().map(|b| b.url.as_str()));

    let changed = AtomicBool::new(false);
    Composite::modify(ctx, composite_id, |composite| {
        changed.store(composite.subscribe(bucket_id, title, url), Ordering::Relaxed);
        Ok(())
    })
    .await?;
    let changed = changed.load(Ordering::Relaxed);
    info!(composite_id, bucket_id, changed, "subscribe");
    Ok(changed)
}

/// Returns false if the composite was not subscribed.
pub async fn unsubscribe(ctx: &ModelContext, composite_id: &str, bucket_id: &str) -> Result<bool, TributaryError> {
    let changed = AtomicBool::new(false);
    Composite::modify(ctx, composite_id, |composite| {
        changed.store(composite.unsubscribe(bucket_id), Ordering::Relaxed);
        Ok(())
    })
    .await?;
    let changed = changed.load(Ordering::Relaxed);
    info!(composite_id, bucket_id, changed, "unsubscribe");
    Ok(changed)
}

/// Add a raw JSON item to `bucket_id` and save. Returns false if the bucket
/// already held a newer or equal copy.
pub async fn add_item(ctx: &ModelContext, bucket_id: &str, raw: &str) -> Result<bool, TributaryError> {
    let Value::Object(item) = serde_json::from_str::<Value>(raw)? else {
        return Err(TributaryError::malformed("item must be a JSON object"));
    };
    let mut bucket = Bucket::get(ctx, bucket_id)
        .await?
        .ok_or_else(|| TributaryError::NotFound { id: bucket_id.to_string() })?;
    let added = bucket.add_news_item(item).await?;
    if added {
        bucket.save().await?;
    }
    info!(bucket_id, added, "add-item");
    Ok(added)
}

/// Schedule `raw` for the `message_type` queue `seconds` from now.
pub async fn defer(
    dispatch: &MessageDispatch,
    seconds: i64,
    message_type: &str,
    raw: &str,
    message_id: Option<String>,
) -> Result<DateTime<Utc>, TributaryError> {
    let message: Value = serde_json::from_str(raw)?;
    let at = Utc::now() + TimeDelta::seconds(seconds);
    let options = DeferOptions {
        message_id,
        ..DeferOptions::default()
    };
    SchedulerClient::new(dispatch.clone())
        .defer_message(at, &message, message_type, &options)
        .await?;
    info!(message_type, at = %at, "deferred");
    Ok(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_scheduler::{MESSAGE_SCHEDULER, SchedulerCommand};
    use tributary_test_utils::TestHarness;

    #[tokio::test]
    async fn subscribe_creates_composite_and_is_idempotent() {
        let harness = TestHarness::new().await.unwrap();
        let mut source = Bucket::new(harness.ctx.clone(), Some("src"));
        source.title = "Source".into();
        source.save().await.unwrap();

        assert!(subscribe(&harness.ctx, "c", "src", None, None).await.unwrap());
        assert!(!subscribe(&harness.ctx, "c", "src", None, None).await.unwrap());

        let composite = Composite::get(&harness.ctx, "c").await.unwrap().unwrap();
        assert_eq!(composite.subscriptions()["src"].title, "Source");

        assert!(unsubscribe(&harness.ctx, "c", "src").await.unwrap());
        assert!(!unsubscribe(&harness.ctx, "c", "src").await.unwrap());
    }

    #[tokio::test]
    async fn unsubscribe_from_missing_composite_fails() {
        let harness = TestHarness::new().await.unwrap();
        let err = unsubscribe(&harness.ctx, "ghost", "src").await.unwrap_err();
        assert!(matches!(err, TributaryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn add_item_requires_object_and_bucket() {
        let harness = TestHarness::new().await.unwrap();
        Bucket::new(harness.ctx.clone(), Some("b")).save().await.unwrap();

        assert!(add_item(&harness.ctx, "b", "[1]").await.is_err());
        assert!(add_item(&harness.ctx, "nope", r#"{"item_id": "x"}"#).await.is_err());
        let raw = r#"{"item_id": "x", "timestamp": "2025-01-01T00:00:00Z", "title": "t"}"#;
        assert!(add_item(&harness.ctx, "b", raw).await.unwrap());

        let mut bucket = Bucket::get(&harness.ctx, "b").await.unwrap().unwrap();
        assert!(bucket.has_news_item("x").await.unwrap());
    }

    #[tokio::test]
    async fn defer_sends_schedule_command() {
        let harness = TestHarness::new().await.unwrap();
        let at = defer(&harness.dispatch, 30, "ping", r#"{"n": 1}"#, Some("d1".into()))
            .await
            .unwrap();

        let commands = harness.drain(MESSAGE_SCHEDULER).await.unwrap();
        assert_eq!(commands.len(), 1);
        match SchedulerCommand::from_value(commands[0].clone()).unwrap() {
            SchedulerCommand::Schedule {
                timestamp,
                routing_key,
                message_id,
                ..
            } => {
                assert_eq!(timestamp, at);
                assert_eq!(routing_key, "ping");
                assert_eq!(message_id.as_deref(), Some("d1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
