// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Commands consumed by the scheduler listener.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tributary_core::TributaryError;
use tributary_core::types::MAX_PRIORITY;

use crate::message::{DeliveryOptions, Exchange};

/// Message type and queue of scheduler commands.
pub const MESSAGE_SCHEDULER: &str = "message_scheduler";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SchedulerCommand {
    /// Store `message` for delivery at `timestamp`, replacing any unclaimed
    /// message with the same `message_id`. A timestamp without an offset is
    /// taken as UTC.
    Schedule {
        #[serde(deserialize_with = "lenient_timestamp")]
        timestamp: DateTime<Utc>,
        #[serde(default)]
        exchange: Exchange,
        routing_key: String,
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delivery_mode: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mandatory: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<u8>,
    },
    /// Drop the unclaimed message stored under `message_id`.
    Cancel {
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Wake the dispatcher without changing anything.
    Noop,
}

impl SchedulerCommand {
    pub fn from_value(message: Value) -> Result<Self, TributaryError> {
        serde_json::from_value(message)
            .map_err(|e| TributaryError::malformed(format!("scheduler command: {e}")))
    }

    /// A schedule command carrying every field of `options`.
    pub fn schedule(
        at: DateTime<Utc>,
        options: &DeliveryOptions,
        message: Value,
        message_id: Option<&str>,
    ) -> Self {
        Self::Schedule {
            timestamp: at,
            exchange: options.exchange,
            routing_key: options.routing_key.clone(),
            message,
            message_id: message_id.map(str::to_string),
            delivery_mode: Some(options.delivery_mode),
            mandatory: Some(options.mandatory),
            priority: Some(options.priority),
        }
    }
}

/// ISO 8601 formats accepted without an offset.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid timestamp `{raw}`: expected ISO 8601"))
    })
}

/// RFC 3339, or a naive ISO 8601 date-time read as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Validate the routing fields of a schedule command.
pub(crate) fn delivery_options(
    exchange: Exchange,
    routing_key: &str,
    delivery_mode: Option<u8>,
    mandatory: Option<bool>,
    priority: Option<u8>,
) -> Result<DeliveryOptions, TributaryError> {
    if routing_key.is_empty() {
        return Err(TributaryError::malformed("empty routing_key"));
    }
    let mut options = DeliveryOptions::work(routing_key);
    options.exchange = exchange;
    if let Some(mode) = delivery_mode {
        if !matches!(mode, 1 | 2) {
            return Err(TributaryError::malformed(format!("bad delivery_mode: {mode}")));
        }
        options.delivery_mode = mode;
    }
    if let Some(mandatory) = mandatory {
        options.mandatory = mandatory;
    }
    if let Some(priority) = priority {
        if priority > MAX_PRIORITY {
            return Err(TributaryError::malformed(format!("bad priority: {priority}")));
        }
        options.priority = priority;
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_schedule() {
        let cmd = SchedulerCommand::from_value(json!({
            "command": "schedule",
            "timestamp": "2025-01-01T00:00:00Z",
            "routing_key": "index_feed",
            "message": {"url": "http://x"}
        }))
        .unwrap();
        match cmd {
            SchedulerCommand::Schedule { exchange, message_id, .. } => {
                assert_eq!(exchange, Exchange::WorkDispatch);
                assert!(message_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            SchedulerCommand::from_value(json!({"command": "noop"})).unwrap(),
            SchedulerCommand::Noop
        );
    }

    #[test]
    fn offsetless_timestamp_is_utc() {
        let cmd = SchedulerCommand::from_value(json!({
            "command": "schedule",
            "timestamp": "2026-01-01T00:00:00",
            "routing_key": "index_feed",
            "message": {}
        }))
        .unwrap();
        let SchedulerCommand::Schedule { timestamp, .. } = cmd else {
            panic!("not a schedule command");
        };
        assert_eq!(timestamp.to_rfc3339(), "2026-01-01T00:00:00+00:00");

        let fractional = parse_timestamp("2026-01-01 12:30:00.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);
        let offset = parse_timestamp("2026-01-01T02:00:00+02:00").unwrap();
        assert_eq!(offset, timestamp);
        assert!(parse_timestamp("2026-01-01").is_none());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(SchedulerCommand::from_value(json!({"command": "schedule", "timestamp": "soon"})).is_err());
        assert!(SchedulerCommand::from_value(json!({"message_id": "m"})).is_err());
        assert!(delivery_options(Exchange::WorkDispatch, "q", Some(3), None, None).is_err());
        assert!(delivery_options(Exchange::WorkDispatch, "q", None, None, Some(10)).is_err());
        assert!(delivery_options(Exchange::WorkDispatch, "", None, None, None).is_err());
        let ok = delivery_options(Exchange::EventBus, "news", Some(1), Some(true), Some(9)).unwrap();
        assert_eq!(ok.exchange, Exchange::EventBus);
        assert!(ok.mandatory);
    }
}
