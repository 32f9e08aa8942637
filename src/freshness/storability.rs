//! Whether a response may be stored, and whether a stored one may stand in
//! for an origin failure.

use std::time::SystemTime;

use super::{http_date, unix_secs};
use crate::directives::Directives;
use crate::http::{Headers, StatusCode};

/// Status codes whose semantics this cache understands, for `must-understand`.
pub const UNDERSTOOD_STATUS_CODES: [u16; 11] =
    [200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Status codes cacheable without an explicit opt-in (RFC 9110 §15.1).
pub const DEFAULT_CACHEABLE_STATUS_CODES: [u16; 12] =
    [200, 203, 204, 206, 300, 301, 308, 404, 405, 410, 414, 501];

/// Returns `true` for the statuses in [`DEFAULT_CACHEABLE_STATUS_CODES`].
pub fn is_default_cacheable_status(status: StatusCode) -> bool {
    DEFAULT_CACHEABLE_STATUS_CODES.contains(&status.as_u16())
}

/// Decides whether the directives on a request/response pair permit storage.
///
/// - `must-understand` with an understood status permits storage even
///   alongside `no-store`; with any other status it forbids storage outright.
/// - Otherwise `no-store` on either side forbids storage.
/// - In shared mode, `private` forbids storage, and a request carrying
///   `Authorization` needs `public`, `must-revalidate` or `s-maxage` on the
///   response.
///
/// # Examples
///
/// ```
/// use cachet::freshness::can_store;
/// use cachet::http::{Headers, StatusCode};
///
/// let mut response = Headers::new();
/// response.insert("Cache-Control", "must-understand, no-store");
///
/// assert!(can_store(&Headers::new(), &response, StatusCode::OK, false));
/// assert!(!can_store(&Headers::new(), &response, StatusCode::new(418), false));
/// ```
pub fn can_store(request: &Headers, response: &Headers, status: StatusCode, shared: bool) -> bool {
    let req_cc = Directives::from_headers(request);
    let resp_cc = Directives::from_headers(response);

    if resp_cc.contains("must-understand") {
        if !UNDERSTOOD_STATUS_CODES.contains(&status.as_u16()) {
            return false;
        }
    } else if req_cc.contains("no-store") || resp_cc.contains("no-store") {
        return false;
    }

    if shared {
        if resp_cc.contains("private") {
            return false;
        }
        if request.contains("authorization")
            && !(resp_cc.contains("public")
                || resp_cc.contains("must-revalidate")
                || resp_cc.contains("s-maxage"))
        {
            return false;
        }
    }

    true
}

/// RFC 5861 `stale-if-error`: checked on both the stored response and the
/// request; either side grants eligibility.
///
/// Without a value the directive is unconditional; with one, the stored
/// response must be younger than the window (measured from its `Date`).
pub fn stale_if_error_permitted(stored: &Headers, request: &Headers, now: SystemTime) -> bool {
    let date = http_date(stored, "date");
    [Directives::from_headers(stored), Directives::from_headers(request)]
        .iter()
        .any(|cc| {
            if !cc.contains("stale-if-error") {
                return false;
            }
            if cc.get("stale-if-error").is_none() {
                return true;
            }
            match (cc.seconds("stale-if-error"), date) {
                (Some(window), Some(date)) => unix_secs(now).saturating_sub(unix_secs(date)) < window,
                _ => false,
            }
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::freshness::from_unix_secs;

    fn cc(value: &str) -> Headers {
        let mut h = Headers::new();
        h.insert("Cache-Control", value);
        h
    }

    #[test]
    fn no_store_on_either_side_refuses() {
        assert!(!can_store(&Headers::new(), &cc("no-store"), StatusCode::OK, false));
        assert!(!can_store(&cc("no-store"), &cc("max-age=60"), StatusCode::OK, false));
        assert!(can_store(&Headers::new(), &cc("max-age=60"), StatusCode::OK, false));
    }

    #[test]
    fn must_understand_overrides_no_store_for_understood_status() {
        let resp = cc("must-understand, no-store");
        for code in UNDERSTOOD_STATUS_CODES {
            assert!(can_store(&Headers::new(), &resp, StatusCode::new(code), false));
        }
        assert!(can_store(&cc("no-store"), &resp, StatusCode::OK, false));
    }

    #[test]
    fn must_understand_refuses_unknown_status() {
        let resp = cc("must-understand, max-age=60");
        assert!(!can_store(&Headers::new(), &resp, StatusCode::new(418), false));
        assert!(!can_store(&Headers::new(), &resp, StatusCode::FOUND, false));
    }

    #[test]
    fn private_only_refused_in_shared_mode() {
        assert!(can_store(&Headers::new(), &cc("private, max-age=60"), StatusCode::OK, false));
        assert!(!can_store(&Headers::new(), &cc("private, max-age=60"), StatusCode::OK, true));
    }

    #[test]
    fn authorization_in_shared_mode_needs_explicit_permission() {
        let mut req = Headers::new();
        req.insert("Authorization", "Bearer t");
        assert!(!can_store(&req, &cc("max-age=60"), StatusCode::OK, true));
        assert!(can_store(&req, &cc("public, max-age=60"), StatusCode::OK, true));
        assert!(can_store(&req, &cc("must-revalidate"), StatusCode::OK, true));
        assert!(can_store(&req, &cc("s-maxage=5"), StatusCode::OK, true));
        assert!(can_store(&req, &cc("max-age=60"), StatusCode::OK, false));
    }

    #[test]
    fn default_cacheable_statuses() {
        assert!(is_default_cacheable_status(StatusCode::OK));
        assert!(is_default_cacheable_status(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_default_cacheable_status(StatusCode::FOUND));
        assert!(!is_default_cacheable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    fn stored(age: u64, cache_control: &str, now: SystemTime) -> Headers {
        let mut h = cc(cache_control);
        h.insert("Date", httpdate::fmt_http_date(now - Duration::from_secs(age)));
        h
    }

    #[test]
    fn stale_if_error_windows() {
        let now = from_unix_secs(1_700_000_000);
        assert!(stale_if_error_permitted(&stored(1000, "stale-if-error", now), &Headers::new(), now));
        assert!(stale_if_error_permitted(&stored(30, "stale-if-error=60", now), &Headers::new(), now));
        assert!(!stale_if_error_permitted(&stored(90, "stale-if-error=60", now), &Headers::new(), now));
        assert!(!stale_if_error_permitted(&stored(1, "max-age=0", now), &Headers::new(), now));
    }

    #[test]
    fn stale_if_error_from_request() {
        let now = from_unix_secs(1_700_000_000);
        let resp = stored(30, "max-age=0", now);
        assert!(stale_if_error_permitted(&resp, &cc("stale-if-error=60"), now));
        assert!(!stale_if_error_permitted(&resp, &cc("stale-if-error=10"), now));
    }

    #[test]
    fn stale_if_error_window_needs_date() {
        let now = from_unix_secs(1_700_000_000);
        assert!(!stale_if_error_permitted(&cc("stale-if-error=60"), &Headers::new(), now));
        assert!(stale_if_error_permitted(&cc("stale-if-error"), &Headers::new(), now));
    }
}
