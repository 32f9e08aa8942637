//! Cache key derivation.
//!
//! A [`CacheKey`] is built from the request method and URL, optionally
//! augmented with configured request header values and with the values of
//! the headers a stored response declared in `Vary`. Only the SHA-256
//! [`StorageKey`] of a cache key ever reaches a storage backend.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::headers::canonical_name;
use crate::http::{Headers, Method, Request};
use crate::vary;

const VARIANT_SEPARATOR: &str = "|vary:";

/// The logical cache key of a request.
///
/// # Examples
///
/// ```
/// use cachet::http::{Method, Request};
/// use cachet::key::CacheKey;
///
/// let get = Request::get("http://example.com/a").unwrap();
/// assert_eq!(CacheKey::base(get.method(), get.url()).as_str(), "http://example.com/a");
///
/// let head = CacheKey::base(&Method::Head, get.url());
/// assert_eq!(head.as_str(), "HEAD http://example.com/a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `uri` for GET, `"METHOD uri"` for every other method.
    pub fn base(method: &Method, url: &Url) -> Self {
        match method {
            Method::Get => Self(url.as_str().to_owned()),
            other => Self(format!("{} {}", other.as_str(), url.as_str())),
        }
    }

    /// Extends `self` with `Name:value` for every configured header present
    /// in `headers` with a non-empty value, sorted and `|`-joined.
    pub fn with_headers(&self, headers: &Headers, header_names: &[String]) -> Self {
        let mut parts: Vec<String> = header_names
            .iter()
            .filter_map(|name| {
                let value = headers.get_joined(name.trim())?;
                if value.is_empty() {
                    return None;
                }
                Some(format!("{}:{value}", canonical_name(name)))
            })
            .collect();

        if parts.is_empty() {
            return self.clone();
        }
        parts.sort();
        Self(format!("{}|{}", self.0, parts.join("|")))
    }

    /// Extends `self` with the request's normalized values for each header
    /// named in a stored response's `Vary` list.
    ///
    /// Absent headers contribute an empty value so "absent" and "present but
    /// different" land on different keys. A wildcard `Vary` yields `self`
    /// unchanged; such entries are never reusable anyway.
    pub fn with_variant<'a, I>(&self, request: &Request, vary_names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parts = Vec::new();
        for name in vary_names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if name == "*" {
                return self.clone();
            }
            let value = request
                .headers()
                .get_joined(name)
                .map(|v| vary::normalize_value(&v))
                .unwrap_or_default();
            parts.push(format!("{}:{value}", canonical_name(name)));
        }

        if parts.is_empty() {
            return self.clone();
        }
        parts.sort();
        parts.dedup();
        Self(format!("{}{VARIANT_SEPARATOR}{}", self.0, parts.join("|")))
    }

    /// Returns the hashed form handed to storage backends.
    pub fn storage_key(&self) -> StorageKey {
        StorageKey(hex::encode(Sha256::digest(self.0.as_bytes())))
    }

    /// Returns the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The lowercase hex SHA-256 digest of a [`CacheKey`]; one-way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
