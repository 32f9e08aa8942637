//! `Cache-Control` directive parsing (RFC 9111 §5.2).
//!
//! A raw directive list is split on commas, each token is trimmed and split
//! on its first `=`. Parsing never fails: malformed input degrades to the
//! directive being absent.
//!
//! | Input                           | Result                              |
//! |---------------------------------|-------------------------------------|
//! | `max-age=60, MAX-AGE=5`         | `max-age → 60` (first wins)         |
//! | `public, private`               | `private` only                      |
//! | `max-age=-10`                   | `max-age → 0`                       |
//! | `max-age=1.5`, `max-age=soon`   | no `max-age`                        |

use std::collections::HashMap;

use tracing::debug;

use crate::http::Headers;

/// Directives whose value must be a non-negative integer of seconds.
const VALIDATED_NUMERIC: [&str; 2] = ["max-age", "s-maxage"];

/// Largest delta-seconds value honored; larger ones are treated as this
/// (RFC 9111 §1.2.2).
pub const MAX_DELTA_SECONDS: i64 = 1 << 31;

/// A parsed, deduplicated set of cache directives.
///
/// Names are stored lowercased; each name maps to at most one optional value.
///
/// # Examples
///
/// ```
/// use cachet::directives::Directives;
///
/// let cc = Directives::parse("public, max-age=60, private, stale-if-error");
/// assert!(cc.contains("private"));
/// assert!(!cc.contains("public"));
/// assert_eq!(cc.seconds("max-age"), Some(60));
/// assert_eq!(cc.get("stale-if-error"), None);
/// assert!(cc.contains("stale-if-error"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    map: HashMap<String, Option<String>>,
}

impl Directives {
    /// Parses a raw directive list such as `"no-cache, max-age=0"`.
    pub fn parse(raw: &str) -> Self {
        let mut map: HashMap<String, Option<String>> = HashMap::new();

        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(unquote(value.trim()).to_owned())),
                None => (token, None),
            };
            let name = name.to_ascii_lowercase();

            if map.contains_key(&name) {
                debug!(directive = %name, "duplicate cache directive ignored");
                continue;
            }
            map.insert(name, value);
        }

        for name in VALIDATED_NUMERIC {
            if let Some(value) = map.get(name).cloned() {
                match validate_seconds(value.as_deref()) {
                    Some(normalized) => {
                        map.insert(name.to_owned(), Some(normalized));
                    }
                    None => {
                        debug!(directive = name, value = ?value, "invalid numeric directive dropped");
                        map.remove(name);
                    }
                }
            }
        }

        if map.contains_key("private") {
            map.remove("public");
        }

        Self { map }
    }

    /// Parses every `Cache-Control` line of `headers` as one directive list.
    pub fn from_headers(headers: &Headers) -> Self {
        headers
            .get_joined("cache-control")
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    /// Returns `true` if the directive is present, with or without a value.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns the directive's value, if it carried one.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.as_deref())
    }

    /// Returns the directive's value as whole seconds, when it is a
    /// non-negative integer. Values beyond [`MAX_DELTA_SECONDS`], including
    /// ones too large for `i64`, are capped.
    pub fn seconds(&self, name: &str) -> Option<i64> {
        delta_seconds(self.get(name)?)
    }

    /// Number of distinct directives.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when no directive survived parsing.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Parses a delta-seconds value, capping it at [`MAX_DELTA_SECONDS`].
/// Negative or non-numeric values yield `None`.
pub fn delta_seconds(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match value.parse::<i64>() {
        Ok(seconds) => Some(seconds.min(MAX_DELTA_SECONDS)),
        // All digits, so only overflow can fail here.
        Err(_) => Some(MAX_DELTA_SECONDS),
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

// Floats and non-numeric values are rejected; negative integers clamp to zero.
fn validate_seconds(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if let Some(magnitude) = value.strip_prefix('-') {
        return delta_seconds(magnitude).map(|_| "0".to_owned());
    }
    delta_seconds(value).map(|seconds| seconds.to_string())
}
