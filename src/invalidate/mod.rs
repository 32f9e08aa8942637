//! Invalidation after unsafe methods (RFC 9111 §4.4).

use url::Url;

use crate::http::{Headers, Method, Request, StatusCode};
use crate::key::CacheKey;

/// Returns `true` when a response to `method` with `status` must invalidate
/// cached representations: an unsafe method that did not fail.
pub fn triggers(method: &Method, status: StatusCode) -> bool {
    method.invalidates_cache() && status.as_u16() < 400
}

/// The cache keys to invalidate after `request` succeeded with a response
/// carrying `response_headers`.
///
/// Always the GET and HEAD keys of the request URL; then those of
/// `Location` and `Content-Location`, resolved against the request URL and
/// kept only when same-origin. With `key_headers` configured, each GET key
/// is also emitted in its header-augmented form built from the request.
///
/// # Examples
///
/// ```
/// use cachet::http::{Headers, Method, Request};
/// use cachet::invalidate::invalidation_keys;
/// use url::Url;
///
/// let request = Request::new(Method::Post, Url::parse("http://example.com/x").unwrap());
/// let mut response = Headers::new();
/// response.insert("Location", "/y");
/// response.insert("Content-Location", "http://other.example/z");
///
/// let keys: Vec<_> = invalidation_keys(&request, &response, &[])
///     .into_iter()
///     .map(|k| k.to_string())
///     .collect();
/// assert_eq!(
///     keys,
///     [
///         "http://example.com/x",
///         "HEAD http://example.com/x",
///         "http://example.com/y",
///         "HEAD http://example.com/y",
///     ]
/// );
/// ```
pub fn invalidation_keys(
    request: &Request,
    response_headers: &Headers,
    key_headers: &[String],
) -> Vec<CacheKey> {
    let origin = request.url().origin();
    let mut targets = vec![request.url().clone()];

    for name in ["location", "content-location"] {
        let Some(value) = response_headers.get(name) else {
            continue;
        };
        match request.url().join(value.trim()) {
            Ok(url) if url.origin() == origin => {
                if !targets.contains(&url) {
                    targets.push(url);
                }
            }
            Ok(url) => tracing::debug!(%url, header = name, "ignoring cross-origin invalidation target"),
            Err(e) => tracing::debug!(header = name, error = %e, "unparseable invalidation target"),
        }
    }

    let mut keys = Vec::with_capacity(targets.len() * 3);
    for url in &targets {
        push_keys(&mut keys, url, request.headers(), key_headers);
    }
    keys
}

fn push_keys(keys: &mut Vec<CacheKey>, url: &Url, headers: &Headers, key_headers: &[String]) {
    let get = CacheKey::base(&Method::Get, url);
    if !key_headers.is_empty() {
        let differentiated = get.with_headers(headers, key_headers);
        if differentiated != get {
            keys.push(differentiated);
        }
    }
    keys.push(get);
    keys.push(CacheKey::base(&Method::Head, url));
}
