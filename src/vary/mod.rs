//! `Vary` handling (RFC 9111 §4.1).
//!
//! When a response is stored, the request's values for every header named in
//! its `Vary` list are captured into the record under [`VARIED_PREFIX`]. A
//! later request may reuse the record only if its own values match the
//! captured ones after whitespace normalization.

use crate::http::Headers;
use crate::http::headers::canonical_name;

/// Prefix of the record headers carrying captured request values.
pub const VARIED_PREFIX: &str = "X-Varied-";

/// Collapses whitespace runs to one space and drops the space after list
/// commas, so `"en,  fr"`, `"en, fr"` and `"en,fr"` compare equal.
///
/// # Examples
///
/// ```
/// use cachet::vary::normalize_value;
///
/// assert_eq!(normalize_value("  en,   fr "), "en,fr");
/// assert_eq!(normalize_value("text/html;  q=0.9"), "text/html; q=0.9");
/// ```
pub fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(", ", ",")
}

/// Returns the header names listed in `Vary`, canonicalized.
pub fn vary_names(headers: &Headers) -> Vec<String> {
    headers
        .get_list("vary")
        .map(|name| if name == "*" { name.to_owned() } else { canonical_name(name) })
        .collect()
}

/// Returns `true` when the `Vary` list contains `*`.
pub fn is_wildcard(headers: &Headers) -> bool {
    headers.get_list("vary").any(|name| name == "*")
}

/// Records the request's value of every varying header into `stored`.
///
/// Headers the request does not carry are left out, which is how "absent"
/// is remembered.
pub fn capture(stored: &mut Headers, request: &Headers) {
    stored.remove_prefixed(VARIED_PREFIX);
    for name in vary_names(stored) {
        if name == "*" {
            continue;
        }
        if let Some(value) = request.get_joined(&name) {
            stored.insert(format!("{VARIED_PREFIX}{name}"), value);
        }
    }
}

/// Checks whether a stored record can answer `request` given its `Vary` list.
///
/// A wildcard never matches. Absent-vs-absent matches; absent-vs-present
/// does not.
pub fn matches(stored: &Headers, request: &Headers) -> bool {
    for name in vary_names(stored) {
        if name == "*" {
            return false;
        }
        let captured = stored
            .get(&format!("{VARIED_PREFIX}{name}"))
            .map(normalize_value);
        let current = request.get_joined(&name).map(|v| normalize_value(&v));
        if captured != current {
            return false;
        }
    }
    true
}
