//! Configuration validation.
//!
//! Works on the parsed-but-untyped document so every problem in a file is
//! reported at once, then builds an [`EtmConfig`] when there are no errors.

use std::path::PathBuf;

use {
    secrecy::Secret,
    serde_json::{Map, Value},
    tracing::warn,
};

use crate::{
    error::{Error, Result},
    schema::{EtmConfig, Flags},
};

const KNOWN_TOP_LEVEL: &[&str] = &["token", "admins", "flags", "data_dir"];

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "missing", "type-error", "unknown-field"
    pub category: &'static str,
    /// Dotted path, e.g. "flags.poll_timeout_secs"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: "unknown-field",
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration document.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Validate a parsed config document without building it.
#[must_use]
pub fn validate_value(doc: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();
    let diags = &mut result.diagnostics;

    let Some(root) = doc.as_object() else {
        diags.push(Diagnostic::error(
            "type-error",
            "",
            "config root must be a mapping",
        ));
        return result;
    };

    if let Err(message) = parse_token(root.get("token")) {
        diags.push(Diagnostic::error(
            missing_or_type(root.get("token")),
            "token",
            message,
        ));
    }
    if let Err(message) = parse_admins(root.get("admins")) {
        diags.push(Diagnostic::error(
            missing_or_type(root.get("admins")),
            "admins",
            message,
        ));
    }
    if let Some(dir) = root.get("data_dir")
        && !dir.is_string()
        && !dir.is_null()
    {
        diags.push(Diagnostic::error(
            "type-error",
            "data_dir",
            "data_dir must be a path string",
        ));
    }

    for key in root.keys() {
        if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
            diags.push(Diagnostic::warning(key.clone(), "unknown key, ignored"));
        }
    }

    match root.get("flags") {
        None | Some(Value::Null) => {},
        Some(Value::Object(flags)) => check_flags(flags, diags),
        Some(_) => diags.push(Diagnostic::error(
            "type-error",
            "flags",
            "flags must be a mapping",
        )),
    }

    result
}

fn check_flags(flags: &Map<String, Value>, diags: &mut Vec<Diagnostic>) {
    let defaults = serde_json::to_value(Flags::default()).unwrap_or(Value::Null);
    for (key, value) in flags {
        if !Flags::KNOWN_KEYS.contains(&key.as_str()) {
            diags.push(Diagnostic::warning(
                format!("flags.{key}"),
                "unknown flag, ignored",
            ));
            continue;
        }
        let expected_bool = defaults.get(key).is_some_and(Value::is_boolean);
        let ok = if expected_bool {
            value.is_boolean()
        } else {
            value.as_u64().is_some()
        };
        if !ok {
            let expected = if expected_bool {
                "a boolean"
            } else {
                "a non-negative integer"
            };
            diags.push(Diagnostic::error(
                "type-error",
                format!("flags.{key}"),
                format!("expected {expected}, got {value}"),
            ));
        }
    }
}

fn missing_or_type(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "missing",
        Some(_) => "type-error",
    }
}

fn parse_token(value: Option<&Value>) -> std::result::Result<String, String> {
    match value {
        None | Some(Value::Null) => Err("bot token is required".into()),
        Some(Value::String(s)) if s.trim().is_empty() => Err("bot token is empty".into()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(format!("bot token must be a string, got {other}")),
    }
}

/// Accepts a single id, a digit string, or a list of either.
fn parse_admins(value: Option<&Value>) -> std::result::Result<Vec<i64>, String> {
    match value {
        None | Some(Value::Null) => Err("at least one admin id is required".into()),
        Some(Value::Array(items)) => {
            if items.is_empty() {
                return Err("admin list is empty".into());
            }
            items.iter().map(parse_admin_id).collect()
        },
        Some(single) => parse_admin_id(single).map(|id| vec![id]),
    }
}

fn parse_admin_id(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("admin id {n} is not an integer")),
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s
            .parse::<i64>()
            .map_err(|e| format!("admin id {s:?} out of range: {e}")),
        other => Err(format!("admin id {other} is not an integer")),
    }
}

/// Validate a document and build the typed config, logging warnings.
pub fn build_config(doc: &Value, config_path: Option<PathBuf>) -> Result<EtmConfig> {
    let mut result = validate_value(doc);
    result.config_path = config_path;

    for d in result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
    {
        warn!(path = %d.path, "{}", d.message);
    }
    if result.has_errors() {
        return Err(Error::Invalid {
            diagnostics: result.diagnostics,
        });
    }

    let token = parse_token(doc.get("token")).map_err(Error::message)?;
    let admins = parse_admins(doc.get("admins")).map_err(Error::message)?;
    let flags = match doc.get("flags") {
        Some(flags @ Value::Object(_)) => {
            serde_json::from_value::<Flags>(flags.clone()).map_err(|e| Error::message(e.to_string()))?
        },
        _ => Flags::default(),
    };
    let data_dir = doc
        .get("data_dir")
        .and_then(Value::as_str)
        .map(PathBuf::from);

    Ok(EtmConfig {
        token: Secret::new(token),
        admins,
        flags,
        data_dir,
    })
}
