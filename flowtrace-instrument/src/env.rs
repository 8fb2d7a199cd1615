//! Cleanup of configuration variables before they are parsed.
//!
//! Deployment tooling frequently wraps values in an extra layer of quotes
//! (`OTEL_EXPORTER_OTLP_ENDPOINT="http://collector:4317"` in an env file
//! passed through verbatim). [`normalize`] removes that layer for every key
//! this crate reads and fills in the exporter timeout defaults.

use std::collections::HashMap;
use tracing::{debug, warn};

/// Key prefixes whose values are normalized.
pub const KNOWN_PREFIXES: [&str; 2] = ["OTEL_", "FLOWTRACE_"];

pub const OTLP_TIMEOUT_KEY: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
pub const BSP_EXPORT_TIMEOUT_KEY: &str = "OTEL_BSP_EXPORT_TIMEOUT";

/// Milliseconds.
pub const DEFAULT_OTLP_TIMEOUT: u64 = 10_000;
/// Milliseconds.
pub const DEFAULT_BSP_EXPORT_TIMEOUT: u64 = 30_000;

/// Snapshot of the process environment.
///
/// Entries whose key or value is not valid UTF-8 are skipped with a warning.
pub fn collect_process_env() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                warn!(key = %key, "Skipping environment variable with non UTF-8 value");
                None
            }
            (Err(key), _) => {
                warn!(key = ?key, "Skipping environment variable with non UTF-8 name");
                None
            }
        })
        .collect()
}

/// Strip one layer of matching quotes from known keys and apply timeout
/// defaults.
pub fn normalize(vars: &mut HashMap<String, String>) {
    for (key, value) in vars.iter_mut() {
        if !is_known_key(key) {
            continue;
        }
        if let Some(inner) = strip_quotes(value) {
            debug!(key = %key, "Stripped surrounding quotes");
            *value = inner.to_string();
        }
    }

    apply_timeout_default(vars, OTLP_TIMEOUT_KEY, DEFAULT_OTLP_TIMEOUT);
    apply_timeout_default(vars, BSP_EXPORT_TIMEOUT_KEY, DEFAULT_BSP_EXPORT_TIMEOUT);
}

pub fn is_known_key(key: &str) -> bool {
    KNOWN_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// The value inside one pair of matching `"` or `'` quotes, if any.
pub fn strip_quotes(value: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|quote| {
        value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

/// Parse a millisecond timeout value.
pub fn parse_timeout_ms(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn apply_timeout_default(vars: &mut HashMap<String, String>, key: &str, default_ms: u64) {
    match vars.get(key) {
        None => {
            vars.insert(key.to_string(), default_ms.to_string());
        }
        Some(value) if value.trim().is_empty() => {
            vars.insert(key.to_string(), default_ms.to_string());
        }
        Some(value) if parse_timeout_ms(value).is_none() => {
            warn!(
                key = %key,
                value = %value,
                "Timeout is not a non-negative integer number of milliseconds; leaving as is"
            );
        }
        Some(_) => {}
    }
}
