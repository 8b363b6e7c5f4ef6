//! Redaction of sensitive data before errors leave the process
//!
//! Rules:
//! - parameter keys matching the denylist are fully redacted
//! - long string values containing a secret marker are redacted
//! - the user-home segment of filesystem paths becomes a placeholder
//!
//! The sanitizer never mutates its input; it returns a redacted copy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::error::{AppError, ErrorCause, ErrorContext, LocalizedMessage};

pub const REDACTED: &str = "[REDACTED]";
pub const HOME_PLACEHOLDER: &str = "~";

/// String values at least this long are scanned for secret markers
const LONG_VALUE_THRESHOLD: usize = 20;

/// Key segments that mark a parameter as sensitive
const SENSITIVE_KEY_SEGMENTS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "token",
    "key",
    "apikey",
    "secret",
    "credential",
    "credentials",
    "auth",
    "authorization",
    "bearer",
    "cookie",
];

/// Terms that mark a segment as sensitive wherever they appear in it
/// (`accesstoken`, `dbpassword`, `clientsecret`)
const SENSITIVE_KEY_TERMS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "credential",
    "apikey",
    "privatekey",
    "auth",
    "cookie",
];

/// Segments that contain a sensitive term but name ordinary data
const BENIGN_KEY_SEGMENTS: &[&str] = &[
    "tokens",
    "tokenizer",
    "tokenization",
    "author",
    "authors",
    "authored",
    "authority",
];

/// Localized names matched as plain substrings
const SENSITIVE_KEY_LOCALIZED: &[&str] = &["密码", "令牌", "密钥", "秘钥", "凭证", "认证", "授权"];

/// Substrings that betray a secret inside a free-form value
const SENSITIVE_VALUE_MARKERS: &[&str] = &[
    "password",
    "secret",
    "token=",
    "api_key",
    "apikey",
    "bearer ",
    "sk-",
    "authorization",
    "密码",
    "密钥",
];

static HOME_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<prefix>/Users/|/home/|[A-Za-z]:\\Users\\)[^/\\\s]+")
        .expect("home path regex is valid")
});

static CAMEL_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("camel case regex is valid"));

/// Produces redacted copies of errors
#[derive(Debug, Clone)]
pub struct Sanitizer {
    home_dir: Option<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(dirs::home_dir())
    }
}

impl Sanitizer {
    pub fn new(home_dir: Option<PathBuf>) -> Self {
        let home_dir = home_dir
            .map(|p| p.to_string_lossy().trim_end_matches(['/', '\\']).to_string())
            .filter(|s| !s.is_empty());
        Self { home_dir }
    }

    /// Redacted copy of `err`, including its cause chain
    pub fn sanitize(&self, err: &AppError) -> AppError {
        let message = self.scrub_text(err.message());
        let messages = LocalizedMessage::new(
            self.scrub_text(&err.messages().en),
            self.scrub_text(&err.messages().zh),
        );
        let context = self.sanitize_context(err.context());
        let cause = err.cause().map(|cause| self.sanitize_cause(cause));

        err.clone().replace_text(message, messages, context, cause)
    }

    pub fn sanitize_context(&self, context: &ErrorContext) -> ErrorContext {
        let parameters: BTreeMap<String, Value> = context
            .parameters
            .iter()
            .map(|(key, value)| {
                let value = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.sanitize_value(value)
                };
                (key.clone(), value)
            })
            .collect();

        ErrorContext {
            parameters,
            ..context.clone()
        }
    }

    fn sanitize_cause(&self, cause: &ErrorCause) -> ErrorCause {
        match cause {
            ErrorCause::App(inner) => ErrorCause::App(Box::new(self.sanitize(inner))),
            ErrorCause::External { kind, message } => ErrorCause::External {
                kind: kind.clone(),
                message: self.scrub_text(message),
            },
        }
    }

    fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                if s.chars().count() >= LONG_VALUE_THRESHOLD && contains_secret_marker(s) {
                    Value::String(REDACTED.to_string())
                } else {
                    Value::String(self.mask_home(s))
                }
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if is_sensitive_key(k) {
                            Value::String(REDACTED.to_string())
                        } else {
                            self.sanitize_value(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            other => other.clone(),
        }
    }

    /// Masks home paths in free text (messages are never fully redacted)
    fn scrub_text(&self, text: &str) -> String {
        self.mask_home(text)
    }

    /// Replace the user-home segment of any path in `text`
    pub fn mask_home(&self, text: &str) -> String {
        let replaced = match &self.home_dir {
            Some(home) if text.contains(home.as_str()) => text.replace(home.as_str(), HOME_PLACEHOLDER),
            _ => text.to_string(),
        };
        HOME_PATH_RE
            .replace_all(&replaced, |caps: &regex::Captures<'_>| {
                format!("{}<user>", &caps["prefix"])
            })
            .into_owned()
    }
}

/// Whether a parameter key names a secret
///
/// Keys are split on separators and camelCase boundaries; a key is
/// sensitive when any segment (or the whole compacted key) is in the
/// denylist, when a segment embeds a sensitive term, or when it contains a
/// localized sensitive name.
pub fn is_sensitive_key(key: &str) -> bool {
    if SENSITIVE_KEY_LOCALIZED.iter().any(|term| key.contains(term)) {
        return true;
    }

    let split = CAMEL_BOUNDARY_RE.replace_all(key, "${1}_${2}").to_lowercase();
    let segments: Vec<&str> = split
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect();

    let compact: String = segments.concat();
    segments
        .iter()
        .any(|segment| SENSITIVE_KEY_SEGMENTS.contains(segment) || embeds_sensitive_term(segment))
        || SENSITIVE_KEY_SEGMENTS.contains(&compact.as_str())
}

fn embeds_sensitive_term(segment: &str) -> bool {
    !BENIGN_KEY_SEGMENTS.contains(&segment)
        && SENSITIVE_KEY_TERMS.iter().any(|term| segment.contains(term))
}

fn contains_secret_marker(value: &str) -> bool {
    let lower = value.to_lowercase();
    SENSITIVE_VALUE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}
