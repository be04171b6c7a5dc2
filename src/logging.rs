//! Logging and tracing configuration
//!
//! Structured JSON logs in production and human-readable output in
//! development. Payment references are masked and webhook payloads redacted
//! before they reach the log stream.

use regex::Regex;
use std::env;
use std::sync::LazyLock;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment types for logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from ENV variable
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Get default log level for environment
    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging" or "development"
/// - `RUST_LOG`: override the filter (e.g. "info", "estatehub_backend=debug")
/// - `LOG_FORMAT`: force "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let default_directives = format!(
        "{}={},tower_http=debug,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask a payment reference for logging
///
/// Shows the first 4 and last 4 characters.
///
/// ```
/// # use estatehub_backend::logging::mask_reference;
/// assert_eq!(mask_reference("PSTK-20260101-ABCDEF"), "PSTK...CDEF");
/// assert_eq!(mask_reference("TXN-1"), "TXN-1");
/// ```
pub fn mask_reference(reference: &str) -> String {
    let chars: Vec<char> = reference.chars().collect();
    if chars.len() <= 12 {
        return reference.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

const SENSITIVE_KEYS: &[&str] = &[
    "secret",
    "secret_key",
    "password",
    "token",
    "api_key",
    "authorization",
    "authorization_code",
    "card_number",
    "cvv",
    "pin",
    "bin",
    "last4",
    "email",
    "phone",
];

static SENSITIVE_FIELD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r#""({})"\s*:\s*"[^"]*""#, SENSITIVE_KEYS.join("|"))).ok()
});

/// Redact sensitive string fields from a JSON payload
pub fn redact_sensitive_data(text: &str) -> String {
    match SENSITIVE_FIELD.as_ref() {
        Some(re) => re.replace_all(text, r#""$1": "[REDACTED]""#).to_string(),
        None => "[REDACTED]".to_string(),
    }
}

/// Log a verification phase change with consistent fields
///
/// ```no_run
/// # use estatehub_backend::log_phase_change;
/// log_phase_change!(
///     reference = "TXN-1",
///     entity_kind = "booking",
///     entity_id = "B-1",
///     phase = "confirmed",
/// );
/// ```
#[macro_export]
macro_rules! log_phase_change {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "verification_phase",
            $($key = tracing::field::display(&$value)),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert!(Environment::parse("PROD").is_production());
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
        assert_eq!(Environment::Staging.default_log_level(), Level::INFO);
    }

    #[test]
    fn test_mask_reference() {
        assert_eq!(mask_reference("T4Z9-REF-2026-000123"), "T4Z9...0123");
        assert_eq!(mask_reference("TXN-1"), "TXN-1");
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"reference": "TXN-9", "authorization_code": "AUTH_abc", "email": "a@b.co", "amount": 5000}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains(r#""authorization_code": "[REDACTED]""#));
        assert!(!redacted.contains("AUTH_abc"));
        assert!(!redacted.contains("a@b.co"));
        assert!(redacted.contains("TXN-9"));
        assert!(redacted.contains("5000"));
    }

    #[test]
    fn test_redaction_pattern_is_shared_across_calls() {
        assert!(SENSITIVE_FIELD.is_some());
        let first = SENSITIVE_FIELD.as_ref().map(|re| re as *const Regex);
        redact_sensitive_data(r#"{"pin": "1234"}"#);
        let second = SENSITIVE_FIELD.as_ref().map(|re| re as *const Regex);
        assert_eq!(first, second);
        assert_eq!(redact_sensitive_data(r#"{"pin": "1234"}"#), r#"{"pin": "[REDACTED]"}"#);
    }
}
