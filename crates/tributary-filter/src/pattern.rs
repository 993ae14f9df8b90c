// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value patterns and the text normalizations matchers apply before matching.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumString};
use tributary_core::TributaryError;

/// Content types whose value is stripped of markup before matching.
pub const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Line width handed to the HTML renderer; wide enough to avoid wrapping.
const RENDER_WIDTH: usize = 10_000;

/// How each entry of `values` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    /// The whole value equals the entry.
    #[default]
    Exact,
    /// The value contains the entry.
    Substring,
    /// The entry is a regular expression anchored at the start of the value.
    Regex,
}

/// The shared configuration of every primitive matcher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternConfig {
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// One compiled alternation over every configured value.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Option<Regex>,
}

impl Pattern {
    /// Compile a pattern from a matcher's JSON config.
    ///
    /// An unknown `match_type` or an invalid regex is an error; an empty
    /// `values` list yields a pattern that never matches.
    pub fn from_config(config: &Value) -> Result<Self, TributaryError> {
        let config: PatternConfig = serde_json::from_value(config.clone())
            .map_err(|e| TributaryError::Filter(format!("invalid matcher config: {e}")))?;
        let match_type = match config.match_type.as_deref() {
            None => MatchType::Exact,
            Some(name) => name
                .parse::<MatchType>()
                .map_err(|_| TributaryError::Filter(format!("unknown match type: {name}")))?,
        };
        Self::compile(match_type, &config.values, config.case_sensitive)
    }

    pub fn compile(
        match_type: MatchType,
        values: &[String],
        case_sensitive: bool,
    ) -> Result<Self, TributaryError> {
        if values.is_empty() {
            return Ok(Self { regex: None });
        }
        let alternatives: Vec<String> = values
            .iter()
            .map(|v| match match_type {
                MatchType::Exact => format!("^{}$", regex::escape(v)),
                MatchType::Substring => format!("^.*?{}.*?$", regex::escape(v)),
                MatchType::Regex => v.clone(),
            })
            .collect();
        // Anchored at the start only, like a prefix match of the whole alternation.
        let source = format!(r"\A(?:{})", alternatives.join("|"));
        let regex = RegexBuilder::new(&source)
            .multi_line(true)
            .dot_matches_new_line(true)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| TributaryError::Filter(format!("invalid pattern: {e}")))?;
        Ok(Self { regex: Some(regex) })
    }

    /// Whether `value` is a string matched by this pattern.
    pub fn is_match(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.is_match_str(s),
            _ => false,
        }
    }

    pub fn is_match_str(&self, value: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(value))
    }
}

/// Normalize a URL so equivalent spellings compare equal.
///
/// Lowercases scheme and host, drops default ports and the fragment, and
/// gives an empty path a `/`. Unparseable input is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Text of a `{type, value}` content node for matching.
///
/// HTML types are rendered to plain text; other types are entity-escaped.
/// A missing node yields an empty string.
pub fn stripped_content(content: Option<&Value>) -> String {
    let Some(content) = content else {
        return String::new();
    };
    let value = content.get("value").and_then(Value::as_str).unwrap_or("");
    let content_type = content.get("type").and_then(Value::as_str).unwrap_or("");
    if HTML_TYPES.contains(&content_type) {
        match html2text::from_read(value.as_bytes(), RENDER_WIDTH) {
            Ok(text) => return text.trim().to_string(),
            Err(_) => return escape(value),
        }
    }
    escape(value)
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
