// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Tributary configuration system.

use tributary_config::diagnostic::ConfigError;
use tributary_config::model::{BrokerBackend, TributaryConfig};
use tributary_config::{load_and_validate_str, load_config_from_str};

/// Valid TOML with all known sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_tributary_config() {
    let toml = r#"
[service]
name = "agg-1"
log_level = "debug"
worker_concurrency = 4

[storage]
database_path = "/tmp/tributary-test.db"
wal_mode = false

[broker]
backend = "memory"
poll_interval_ms = 50

[aggregator]
dispatch_batch_size = 25
backfill_limit = 10
backfill_lookback_secs = 3600

[scheduler]
enabled = false
min_sleep_ms = 200
max_claim_secs = 60

[retry]
max_attempts = 3
initial_backoff_ms = 5

[filters]
default_action = "reject"
disabled = ["match_content"]
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.service.name, "agg-1");
    assert_eq!(config.service.log_level, "debug");
    assert_eq!(config.service.worker_concurrency, 4);
    assert_eq!(config.storage.database_path, "/tmp/tributary-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.broker.backend, BrokerBackend::Memory);
    assert_eq!(config.broker.poll_interval_ms, 50);
    assert_eq!(config.aggregator.dispatch_batch_size, 25);
    assert_eq!(config.aggregator.backfill_limit, 10);
    assert!(!config.scheduler.enabled);
    assert_eq!(config.scheduler.min_sleep_ms, 200);
    assert_eq!(config.scheduler.max_claim_secs, 60);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.filters.default_action, "reject");
    assert_eq!(config.filters.disabled, vec!["match_content"]);
}

/// Omitted sections fall back to defaults.
#[test]
fn missing_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should deserialize");
    assert_eq!(config.service.name, "tributary");
    assert_eq!(config.broker.backend, BrokerBackend::Sqlite);
    assert_eq!(config.aggregator.dispatch_batch_size, 100);
    assert_eq!(config.aggregator.backfill_limit, 50);
    assert_eq!(config.aggregator.backfill_lookback_secs, 86_400);
    assert_eq!(config.scheduler.min_sleep_ms, 1_000);
    assert_eq!(config.scheduler.max_sleep_secs, 3_600);
    assert_eq!(config.scheduler.max_claim_secs, 300);
    assert_eq!(config.scheduler.max_backoff_exponent, 10);
    assert_eq!(config.scheduler.max_retry_delay_secs, 600);
    assert_eq!(config.retry.max_attempts, 6);
    assert_eq!(config.retry.initial_backoff_ms, 100);
    assert_eq!(config.filters.default_action, "accept");
}

/// Unknown field in a section is rejected.
#[test]
fn unknown_field_in_scheduler_produces_error() {
    let toml = r#"
[scheduler]
min_slep_ms = 10
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("min_slep_ms"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Unexpected top-level section is rejected by deny_unknown_fields.
#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[logging]
level = "debug"
"#;

    let err = load_config_from_str(toml).expect_err("unknown top-level section should be rejected");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("logging"),
        "error should mention unknown field, got: {err_str}"
    );
}

/// Unknown key produces an UnknownKey diagnostic with a suggestion and valid keys.
#[test]
fn diagnostic_unknown_key_suggests_correction() {
    let toml = r#"
[aggregator]
backfill_limt = 5
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let matched = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, .. }
            if key == "backfill_limt"
                && suggestion.as_deref() == Some("backfill_limit")
                && valid_keys.contains("dispatch_batch_size"))
    });
    assert!(matched, "expected UnknownKey for backfill_limt, got: {errors:?}");
}

/// Invalid backend name is a type/variant error, not a panic.
#[test]
fn invalid_backend_is_rejected() {
    let toml = r#"
[broker]
backend = "rabbit"
"#;
    assert!(load_config_from_str(toml).is_err());
}

/// Invalid type (string where number expected) produces a clear message.
#[test]
fn diagnostic_invalid_type_message() {
    let toml = r#"
[scheduler]
batch_size = "lots"
"#;

    let err = load_config_from_str(toml).expect_err("should reject invalid type");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("invalid type") || err_str.contains("batch_size"),
        "error should mention type mismatch, got: {err_str}"
    );
}

/// ConfigError can be rendered using miette's graphical handler.
#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "batch_sise".to_string(),
        section: Some("scheduler".to_string()),
        suggestion: Some("batch_size".to_string()),
        home: None,
        valid_keys: "enabled, batch_size".to_string(),
        span: None,
        src: None,
    };
    assert!(error.code().is_some());
    let help = error.help().expect("should have help").to_string();
    assert!(help.contains("did you mean `batch_size`"));

    let handler = GraphicalReportHandler::new();
    let mut buf = String::new();
    handler
        .render_report(&mut buf, &error)
        .expect("should render without error");
    assert!(buf.contains("batch_sise"));
}

/// Validation failures surface as Validation diagnostics.
#[test]
fn validation_rejects_zero_batch_size() {
    let toml = r#"
[aggregator]
dispatch_batch_size = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("zero batch size should fail");
    assert!(errors.iter().any(|e| {
        matches!(e, ConfigError::Invalid { key, span: Some(_), .. } if key == "aggregator.dispatch_batch_size")
    }));
}

/// Unknown keys in inline TOML are underlined at their position.
#[test]
fn unknown_key_is_located_in_source() {
    let toml = "[service]\nname = \"t\"\n\n[scheduler]\nmin_slep_ms = 10\n";

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let span = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey { key, span, .. } if key == "min_slep_ms" => *span,
            _ => None,
        })
        .expect("unknown key should carry a span");
    assert_eq!(&toml[span.offset()..span.offset() + span.len()], "min_slep_ms");
}

/// A key written under the wrong section names the section it belongs to.
#[test]
fn misplaced_key_names_its_section() {
    let toml = r#"
[aggregator]
batch_size = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    assert!(
        errors.iter().any(|e| matches!(e,
            ConfigError::UnknownKey { key, home, .. }
                if key == "batch_size" && home.as_deref() == Some("scheduler"))),
        "got: {errors:?}"
    );
}

/// An unknown broker backend lists the accepted ones.
#[test]
fn bad_backend_lists_choices() {
    let toml = r#"
[broker]
backend = "rabbit"
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    assert!(
        errors.iter().any(|e| matches!(e,
            ConfigError::BadValue { expected, .. }
                if expected.contains("memory") && expected.contains("sqlite"))),
        "got: {errors:?}"
    );
}

/// Validation failures from a config file point into that file.
#[test]
#[serial_test::serial]
fn validation_error_points_into_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "tributary.toml",
            r#"
[filters]
disabled = ["match_autor"]
"#,
        )?;
        let errors = tributary_config::load_and_validate_path(std::path::Path::new("tributary.toml"))
            .expect_err("typo in disabled should fail");
        match &errors[0] {
            ConfigError::Invalid { key, span: Some(_), src: Some(_), advice, .. } => {
                assert_eq!(key, "filters.disabled");
                assert!(advice.as_deref().unwrap_or_default().contains("match_author"));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    });
}

/// Environment variables override file values with section-aware key mapping.
#[test]
#[serial_test::serial]
fn env_overrides_map_underscored_keys() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "tributary.toml",
            r#"
[scheduler]
max_claim_secs = 120
"#,
        )?;
        jail.set_env("TRIBUTARY_SCHEDULER_MAX_CLAIM_SECS", "45");
        jail.set_env("TRIBUTARY_SERVICE_LOG_LEVEL", "trace");

        let config: TributaryConfig =
            tributary_config::load_config_from_path(std::path::Path::new("tributary.toml"))
                .expect("should load");
        assert_eq!(config.scheduler.max_claim_secs, 45);
        assert_eq!(config.service.log_level, "trace");
        Ok(())
    });
}
