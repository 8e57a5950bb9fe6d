//! Accessors for the well-known `external-dns.alpha.kubernetes.io/*` annotations.
//!
//! Every accessor is total. Absent or empty annotations read as `None` / an empty list, only the TTL can be
//! rejected and even that is left to the caller to downgrade to a warning.

use crate::error::TtlError;
use std::collections::BTreeMap;

pub type Annotations = BTreeMap<String, String>;

/// Provider specific properties, keyed by property name. Sorted so endpoints compare and print deterministically.
pub type ProviderSpecific = BTreeMap<String, String>;

/// Which controller is responsible for a resource. Resources setting a different value are skipped.
pub const CONTROLLER_ANNOTATION_KEY: &str = "external-dns.alpha.kubernetes.io/controller";
pub const CONTROLLER_ANNOTATION_VALUE: &str = "dns-controller";

pub const HOSTNAME_ANNOTATION_KEY: &str = "external-dns.alpha.kubernetes.io/hostname";
pub const TTL_ANNOTATION_KEY: &str = "external-dns.alpha.kubernetes.io/ttl";
pub const TARGET_ANNOTATION_KEY: &str = "external-dns.alpha.kubernetes.io/target";
pub const SET_IDENTIFIER_KEY: &str = "external-dns.alpha.kubernetes.io/set-identifier";
pub const ALIAS_ANNOTATION_KEY: &str = "external-dns.alpha.kubernetes.io/alias";
pub const CLOUDFLARE_PROXIED_KEY: &str = "external-dns.alpha.kubernetes.io/cloudflare-proxied";

/// Annotations below this prefix are passed through as `aws/<suffix>`.
pub const AWS_ANNOTATION_PREFIX: &str = "external-dns.alpha.kubernetes.io/aws-";

pub const TTL_MINIMUM: i64 = 1;
pub const TTL_MAXIMUM: i64 = i32::MAX as i64;

pub fn controller(annotations: &Annotations) -> Option<&str> {
    annotations.get(CONTROLLER_ANNOTATION_KEY).map(String::as_str)
}

/// The record TTL in seconds. `Ok(None)` if the annotation is not set.
///
/// Accepts durations (`"90s"`, `"5m"`) as well as plain seconds (`"300"`).
pub fn ttl(annotations: &Annotations) -> Result<Option<i64>, TtlError> {
    let Some(value) = annotations.get(TTL_ANNOTATION_KEY) else {
        return Ok(None);
    };

    let seconds = parse_ttl(value).ok_or_else(|| TtlError::Invalid(value.clone()))?;

    if !(TTL_MINIMUM..=TTL_MAXIMUM).contains(&seconds) {
        return Err(TtlError::OutOfRange {
            value: seconds,
            min: TTL_MINIMUM,
            max: TTL_MAXIMUM,
        });
    }

    Ok(Some(seconds))
}

fn parse_ttl(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return Some(seconds);
    }
    // durations are a single token like `1h30m`, `1h 30m` is rejected
    if value.contains(char::is_whitespace) {
        return None;
    }
    let duration = humantime::parse_duration(value).ok()?;
    i64::try_from(duration.as_secs()).ok()
}

/// Explicit targets, in annotation order. Empty means "fall back to the load balancer".
pub fn targets(annotations: &Annotations) -> Vec<String> {
    annotations
        .get(TARGET_ANNOTATION_KEY)
        .map(|value| split_list(value))
        .unwrap_or_default()
}

/// Additional hostnames, independent of the proxy's virtual host.
pub fn hostnames(annotations: &Annotations) -> Vec<String> {
    annotations
        .get(HOSTNAME_ANNOTATION_KEY)
        .map(|value| split_list(value))
        .unwrap_or_default()
}

/// Provider specific properties and the set identifier (if any).
pub fn provider_specific(annotations: &Annotations) -> (ProviderSpecific, Option<String>) {
    let mut properties = ProviderSpecific::new();

    if let Some(proxied) = annotations.get(CLOUDFLARE_PROXIED_KEY) {
        properties.insert(CLOUDFLARE_PROXIED_KEY.to_string(), proxied.clone());
    }

    if annotations.get(ALIAS_ANNOTATION_KEY).map(String::as_str) == Some("true") {
        properties.insert("alias".to_string(), "true".to_string());
    }

    for (key, value) in annotations {
        if let Some(attr) = key.strip_prefix(AWS_ANNOTATION_PREFIX) {
            properties.insert(format!("aws/{attr}"), value.clone());
        }
    }

    let set_identifier = annotations
        .get(SET_IDENTIFIER_KEY)
        .filter(|id| !id.is_empty())
        .cloned();

    (properties, set_identifier)
}

/// Splits `"a.com, b.com ,c.com"` style values. Whitespace is dropped entirely, empty items are skipped.
fn split_list(value: &str) -> Vec<String> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
