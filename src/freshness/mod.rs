//! Freshness classification (RFC 9111 §4.2, RFC 5861).
//!
//! Everything in this module is a pure function of headers and an explicit
//! `now`; nothing is cached between lookups.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::directives::Directives;
use crate::http::Headers;

pub mod age;
pub mod storability;

pub use age::current_age;
pub use storability::{can_store, is_default_cacheable_status, stale_if_error_permitted};

/// How a stored response may be used for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Serve from cache without contacting the origin.
    Fresh,
    /// Revalidate with the origin before use.
    Stale,
    /// Do not satisfy this request from cache at all.
    Transparent,
    /// Serve now and revalidate in the background.
    StaleWhileRevalidate,
}

impl Freshness {
    /// The value written to the `X-Cache-Freshness` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Transparent => "transparent",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: Freshness,
    /// `true` when the entry is `Fresh` only because the client accepted
    /// staleness through `max-stale`.
    pub relaxed: bool,
}

impl Evaluation {
    fn strict(state: Freshness) -> Self {
        Self {
            state,
            relaxed: false,
        }
    }
}

/// Classifies a stored response against the current request.
///
/// `shared` selects shared-cache semantics: `s-maxage` takes precedence over
/// `max-age` and `proxy-revalidate` behaves like `must-revalidate`.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use cachet::freshness::{evaluate, Freshness};
/// use cachet::http::Headers;
///
/// let now = SystemTime::now();
/// let mut response = Headers::new();
/// response.insert("Date", httpdate::fmt_http_date(now - Duration::from_secs(10)));
/// response.insert("Cache-Control", "max-age=60");
///
/// assert_eq!(evaluate(&response, &Headers::new(), now, false).state, Freshness::Fresh);
/// ```
pub fn evaluate(response: &Headers, request: &Headers, now: SystemTime, shared: bool) -> Evaluation {
    let req_cc = Directives::from_headers(request);
    let resp_cc = Directives::from_headers(response);

    if req_cc.contains("no-cache") {
        return Evaluation::strict(Freshness::Transparent);
    }
    if !request.contains("cache-control")
        && request
            .get_joined("pragma")
            .is_some_and(|p| p.trim().eq_ignore_ascii_case("no-cache"))
    {
        return Evaluation::strict(Freshness::Transparent);
    }
    if resp_cc.contains("no-cache") {
        return Evaluation::strict(Freshness::Stale);
    }
    if req_cc.contains("only-if-cached") {
        return Evaluation::strict(Freshness::Fresh);
    }

    let Some(date) = http_date(response, "date") else {
        return Evaluation::strict(Freshness::Stale);
    };

    let mut current_age = unix_secs(now).saturating_sub(unix_secs(date));
    let mut lifetime = freshness_lifetime(response, &resp_cc, date, shared);

    if let Some(max_age) = req_cc.seconds("max-age") {
        lifetime = lifetime.min(max_age);
    }
    if let Some(min_fresh) = req_cc.seconds("min-fresh") {
        current_age = current_age.saturating_add(min_fresh);
    }

    let strictly_fresh = lifetime > current_age;
    let must_revalidate = resp_cc.contains("must-revalidate")
        || (shared && resp_cc.contains("proxy-revalidate"));

    if !must_revalidate && req_cc.contains("max-stale") {
        match req_cc.get("max-stale") {
            None => {
                return Evaluation {
                    state: Freshness::Fresh,
                    relaxed: !strictly_fresh,
                };
            }
            Some(_) => {
                if let Some(max_stale) = req_cc.seconds("max-stale") {
                    current_age = current_age.saturating_sub(max_stale);
                }
            }
        }
    }

    if lifetime > current_age {
        return Evaluation {
            state: Freshness::Fresh,
            relaxed: !strictly_fresh,
        };
    }

    if let Some(window) = resp_cc.seconds("stale-while-revalidate") {
        if lifetime.saturating_add(window) > current_age {
            return Evaluation::strict(Freshness::StaleWhileRevalidate);
        }
    }

    Evaluation::strict(Freshness::Stale)
}

// max-age (or s-maxage in shared mode), else Expires - Date; zero when unparseable.
fn freshness_lifetime(response: &Headers, cc: &Directives, date: SystemTime, shared: bool) -> i64 {
    if shared {
        if let Some(s_maxage) = cc.seconds("s-maxage") {
            return s_maxage;
        }
    }
    if let Some(max_age) = cc.seconds("max-age") {
        return max_age;
    }
    match http_date(response, "expires") {
        Some(expires) => unix_secs(expires).saturating_sub(unix_secs(date)),
        None => 0,
    }
}

/// Parses the first value of an HTTP-date header.
pub fn http_date(headers: &Headers, name: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(headers.get(name)?.trim()).ok()
}

/// Seconds since the Unix epoch; negative before it.
pub fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Inverse of [`unix_secs`].
pub fn from_unix_secs(secs: i64) -> SystemTime {
    let magnitude = std::time::Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn now() -> SystemTime {
        from_unix_secs(1_700_000_000)
    }

    fn response(age_secs: u64, cache_control: &str) -> Headers {
        let mut h = Headers::new();
        h.insert(
            "Date",
            httpdate::fmt_http_date(now() - Duration::from_secs(age_secs)),
        );
        if !cache_control.is_empty() {
            h.insert("Cache-Control", cache_control);
        }
        h
    }

    fn request(cache_control: &str) -> Headers {
        let mut h = Headers::new();
        h.insert("Cache-Control", cache_control);
        h
    }

    fn state(resp: &Headers, req: &Headers) -> Freshness {
        evaluate(resp, req, now(), false).state
    }

    #[test]
    fn max_age_boundary() {
        for n in [0u64, 1, 60, 3600] {
            let fresh_side = n.saturating_sub(1);
            if n > 0 {
                assert_eq!(
                    state(&response(fresh_side, &format!("max-age={n}")), &Headers::new()),
                    Freshness::Fresh,
                    "age {fresh_side} max-age {n}"
                );
            }
            assert_eq!(
                state(&response(n, &format!("max-age={n}")), &Headers::new()),
                Freshness::Stale,
                "age {n} max-age {n}"
            );
        }
    }

    #[test]
    fn request_no_cache_is_transparent() {
        assert_eq!(
            state(&response(0, "max-age=60"), &request("no-cache")),
            Freshness::Transparent
        );
    }

    #[test]
    fn pragma_no_cache_only_without_cache_control() {
        let mut pragma = Headers::new();
        pragma.insert("Pragma", "No-Cache");
        assert_eq!(state(&response(0, "max-age=60"), &pragma), Freshness::Transparent);

        pragma.insert("Cache-Control", "max-stale");
        assert_eq!(state(&response(0, "max-age=60"), &pragma), Freshness::Fresh);
    }

    #[test]
    fn response_no_cache_is_stale() {
        assert_eq!(
            state(&response(0, "no-cache, max-age=60"), &Headers::new()),
            Freshness::Stale
        );
    }

    #[test]
    fn only_if_cached_forces_fresh() {
        assert_eq!(
            state(&response(100, "max-age=1"), &request("only-if-cached")),
            Freshness::Fresh
        );
    }

    #[test]
    fn missing_date_is_stale() {
        let mut h = Headers::new();
        h.insert("Cache-Control", "max-age=60");
        assert_eq!(state(&h, &Headers::new()), Freshness::Stale);
    }

    #[test]
    fn expires_minus_date_lifetime() {
        let mut h = response(10, "");
        h.insert(
            "Expires",
            httpdate::fmt_http_date(now() + Duration::from_secs(50)),
        );
        assert_eq!(state(&h, &Headers::new()), Freshness::Fresh);

        let mut h = response(10, "");
        h.insert("Expires", "0");
        assert_eq!(state(&h, &Headers::new()), Freshness::Stale);
    }

    #[test]
    fn max_age_beats_expires() {
        let mut h = response(10, "max-age=5");
        h.insert(
            "Expires",
            httpdate::fmt_http_date(now() + Duration::from_secs(500)),
        );
        assert_eq!(state(&h, &Headers::new()), Freshness::Stale);
    }

    #[test]
    fn request_max_age_caps_lifetime() {
        assert_eq!(
            state(&response(10, "max-age=60"), &request("max-age=5")),
            Freshness::Stale
        );
        assert_eq!(
            state(&response(10, "max-age=60"), &request("max-age=30")),
            Freshness::Fresh
        );
    }

    #[test]
    fn min_fresh_inflates_age() {
        assert_eq!(
            state(&response(10, "max-age=60"), &request("min-fresh=55")),
            Freshness::Stale
        );
    }

    #[test]
    fn unscoped_max_stale_forces_fresh_and_is_relaxed() {
        let eval = evaluate(&response(100, "max-age=1"), &request("max-stale"), now(), false);
        assert_eq!(eval.state, Freshness::Fresh);
        assert!(eval.relaxed);

        let eval = evaluate(&response(0, "max-age=100"), &request("max-stale"), now(), false);
        assert!(!eval.relaxed);
    }

    #[test]
    fn scoped_max_stale_reduces_age() {
        let eval = evaluate(&response(20, "max-age=10"), &request("max-stale=15"), now(), false);
        assert_eq!(eval.state, Freshness::Fresh);
        assert!(eval.relaxed);
        assert_eq!(
            state(&response(30, "max-age=10"), &request("max-stale=15")),
            Freshness::Stale
        );
    }

    #[test]
    fn must_revalidate_ignores_max_stale() {
        assert_eq!(
            state(&response(100, "max-age=1, must-revalidate"), &request("max-stale")),
            Freshness::Stale
        );
        assert_eq!(
            state(&response(20, "max-age=10, must-revalidate"), &request("max-stale=15")),
            Freshness::Stale
        );
    }

    #[test]
    fn stale_while_revalidate_window() {
        let cc = "max-age=10, stale-while-revalidate=30";
        assert_eq!(state(&response(5, cc), &Headers::new()), Freshness::Fresh);
        assert_eq!(
            state(&response(20, cc), &Headers::new()),
            Freshness::StaleWhileRevalidate
        );
        assert_eq!(state(&response(40, cc), &Headers::new()), Freshness::Stale);
    }

    #[test]
    fn oversized_delta_seconds_saturate() {
        let huge = "9223372036854775807";
        let resp = response(1, &format!("max-age=60, stale-while-revalidate={huge}"));
        assert_eq!(
            state(&resp, &request(&format!("min-fresh={huge}"))),
            Freshness::StaleWhileRevalidate
        );

        let eval = evaluate(
            &response(100, "max-age=60"),
            &request(&format!("max-stale={huge}")),
            now(),
            false,
        );
        assert_eq!(eval.state, Freshness::Fresh);
        assert!(eval.relaxed);
    }

    #[test]
    fn shared_mode_prefers_s_maxage() {
        let h = response(30, "max-age=10, s-maxage=60");
        assert_eq!(evaluate(&h, &Headers::new(), now(), true).state, Freshness::Fresh);
        assert_eq!(evaluate(&h, &Headers::new(), now(), false).state, Freshness::Stale);
    }

    #[test]
    fn date_ahead_of_clock_is_fresh() {
        // Date in the future relative to now.
        let mut h = Headers::new();
        h.insert(
            "Date",
            httpdate::fmt_http_date(now() + Duration::from_secs(30)),
        );
        h.insert("Cache-Control", "max-age=1");
        assert_eq!(state(&h, &Headers::new()), Freshness::Fresh);
    }

    #[test]
    fn unix_secs_round_trip() {
        for secs in [-5_i64, 0, 1_700_000_000] {
            assert_eq!(unix_secs(from_unix_secs(secs)), secs);
        }
    }
}
