// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Figment extraction errors and validation failures both end up as
//! [`ConfigError`]s. When the offending TOML is at hand, the key is located in
//! it so miette can underline it. The set of valid keys per section is read
//! off [`TributaryConfig`]'s own serialized defaults, so it cannot drift from
//! the model.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, GraphicalReportHandler, NamedSource, SourceSpan};
use thiserror::Error;

use crate::model::TributaryConfig;

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Every config section with the keys it accepts.
pub fn config_layout() -> Vec<(String, Vec<String>)> {
    let Ok(toml::Value::Table(root)) = toml::Value::try_from(TributaryConfig::default()) else {
        return Vec::new();
    };
    root.into_iter()
        .filter_map(|(section, value)| match value {
            toml::Value::Table(keys) => Some((section, keys.keys().cloned().collect())),
            _ => None,
        })
        .collect()
}

/// Keys accepted in `section`, if it exists.
pub fn section_keys(section: &str) -> Option<Vec<String>> {
    config_layout()
        .into_iter()
        .find_map(|(name, keys)| (name == section).then_some(keys))
}

/// The section other than `current` where `key` is valid.
fn home_section(key: &str, current: Option<&str>) -> Option<String> {
    config_layout()
        .into_iter()
        .find(|(section, keys)| Some(section.as_str()) != current && keys.iter().any(|k| k == key))
        .map(|(section, _)| section)
}

/// Closest candidate to `unknown`, if any is similar enough.
pub fn suggest<'a, I>(unknown: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|c| (strsim::jaro_winkler(unknown, c), c))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.to_string())
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in {}", section_label(.section.as_deref()))]
    #[diagnostic(
        code(tributary::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), home.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Enclosing section; `None` at the top level.
        section: Option<String>,
        suggestion: Option<String>,
        /// Another section that does accept this key.
        home: Option<String>,
        valid_keys: String,
        #[label("not recognized here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("bad value for `{key}`: found {found}")]
    #[diagnostic(code(tributary::config::bad_value), help("expected {expected}"))]
    BadValue {
        key: String,
        found: String,
        expected: String,
        #[label("expected {expected}")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but breaks a semantic rule.
    #[error("invalid `{key}`: {message}")]
    #[diagnostic(code(tributary::config::invalid))]
    Invalid {
        /// Dotted `section.key` path.
        key: String,
        message: String,
        #[help]
        advice: Option<String>,
        #[label("{message}")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("configuration error: {0}")]
    #[diagnostic(code(tributary::config::other))]
    Other(String),
}

fn section_label(section: Option<&str>) -> String {
    match section {
        Some(s) => format!("[{s}]"),
        None => "the top level".to_string(),
    }
}

fn unknown_key_help(suggestion: Option<&str>, home: Option<&str>, valid_keys: &str) -> String {
    match (home, suggestion) {
        (Some(home), _) => format!("this key belongs in [{home}]"),
        (None, Some(s)) => format!("did you mean `{s}`? valid keys: {valid_keys}"),
        (None, None) => format!("valid keys: {valid_keys}"),
    }
}

impl ConfigError {
    /// A semantic failure on `key` (`section.key`).
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
            advice: None,
            span: None,
            src: None,
        }
    }

    pub fn with_help(mut self, text: impl Into<String>) -> Self {
        if let Self::Invalid { advice, .. } = &mut self {
            *advice = Some(text.into());
        }
        self
    }

    /// Dotted path of the key this error is about.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::UnknownKey { key, section, .. } => Some(match section {
                Some(s) => format!("{s}.{key}"),
                None => key.clone(),
            }),
            Self::BadValue { key, .. } | Self::Invalid { key, .. } => Some(key.clone()),
            Self::Other(_) => None,
        }
    }

    /// Point this error at its key in `source`. Returns false if the key is
    /// not written there.
    pub fn locate(&mut self, source: &ConfigSource) -> bool {
        let Some(path) = self.key() else { return false };
        let (section, key) = match path.split_once('.') {
            Some((section, key)) => (Some(section), key),
            None => (None, path.as_str()),
        };
        let Some(found) = locate_key(&source.content, section, key) else {
            return false;
        };
        match self {
            Self::UnknownKey { span, src, .. }
            | Self::BadValue { span, src, .. }
            | Self::Invalid { span, src, .. } => {
                *span = Some(found);
                *src = Some(NamedSource::new(&source.name, source.content.clone()));
                true
            }
            Self::Other(_) => false,
        }
    }
}

/// A TOML document errors can point into.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub content: String,
}

impl ConfigSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Span of `key` as written inside `[section]` (or before any table header
/// when `section` is `None`).
pub fn locate_key(content: &str, section: Option<&str>, key: &str) -> Option<SourceSpan> {
    let mut table: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let body = line.trim_start();
        let indent = line.len() - body.len();
        if let Some(header) = body.strip_prefix('[') {
            table = header.split(']').next().map(str::trim);
        } else if table == section {
            if let Some((lhs, _)) = body.split_once('=') {
                let written = lhs.trim_end();
                if written.trim_matches('"') == key {
                    return Some(SourceSpan::new((offset + indent).into(), written.len()));
                }
            }
        }
        offset += line.len();
    }
    None
}

/// Pick the source an error came from: the file figment names, or the only
/// source there is.
fn source_for<'a>(error: &figment::Error, sources: &'a [ConfigSource]) -> Option<&'a ConfigSource> {
    let from_file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| s.file_path())
        .map(|p| p.display().to_string());
    match from_file {
        Some(path) => sources.iter().find(|s| s.name == path),
        None if sources.len() == 1 => sources.first(),
        None => None,
    }
}

/// Convert figment's extraction errors into located diagnostics.
pub fn from_figment(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| {
            let path: Vec<String> = error.path.clone();
            let mut diag = match &error.kind {
                Kind::UnknownField(field, _) => {
                    let section = path.first().cloned();
                    let valid = match &section {
                        Some(s) => section_keys(s).unwrap_or_default(),
                        None => config_layout().into_iter().map(|(s, _)| s).collect(),
                    };
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        suggestion: suggest(field, valid.iter().map(String::as_str)),
                        home: home_section(field, section.as_deref()),
                        valid_keys: valid.join(", "),
                        section,
                        span: None,
                        src: None,
                    }
                }
                Kind::InvalidType(found, expected) => ConfigError::BadValue {
                    key: path.join("."),
                    found: found.to_string(),
                    expected: expected.clone(),
                    span: None,
                    src: None,
                },
                Kind::UnknownVariant(found, expected) => ConfigError::BadValue {
                    key: path.join("."),
                    found: format!("`{found}`"),
                    expected: format!("one of {}", expected.join(", ")),
                    span: None,
                    src: None,
                },
                _ => ConfigError::Other(error.to_string()),
            };
            if let Some(source) = source_for(&error, sources) {
                diag.locate(source);
            }
            diag
        })
        .collect()
}

/// Render `errors` as miette reports, one after another.
pub fn render_to_string(errors: &[ConfigError]) -> String {
    let handler = GraphicalReportHandler::new();
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error).is_err() {
            out.push_str(&format!("error: {error}\n"));
        }
    }
    out
}

/// Print `errors` to stderr.
pub fn render_errors(errors: &[ConfigError]) {
    eprint!("{}", render_to_string(errors));
}
