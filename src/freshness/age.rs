//! RFC 9111 §4.2.3 age calculation.

use std::time::SystemTime;

use tracing::debug;

use super::{http_date, unix_secs};
use crate::directives::delta_seconds;
use crate::http::Headers;

/// Returns the value of the first `Age` header, ignoring later ones.
///
/// Negative or non-numeric values count as absent; values beyond
/// [`MAX_DELTA_SECONDS`](crate::directives::MAX_DELTA_SECONDS) are capped.
pub fn age_header(headers: &Headers) -> Option<i64> {
    let mut values = headers.get_all("age");
    let first = values.next()?;
    if values.next().is_some() {
        debug!("multiple Age headers; only the first is honored");
    }
    delta_seconds(first)
}

/// Computes the current age of a stored response, in whole seconds.
///
/// ```text
/// apparent_age  = max(0, response_time - Date)
/// response_delay = response_time - request_time   (0 when unknown)
/// corrected_age = Age + response_delay
/// initial_age   = max(apparent_age, corrected_age)
/// current_age   = initial_age + (now - response_time)
/// ```
pub fn current_age(
    headers: &Headers,
    request_time: Option<SystemTime>,
    response_time: SystemTime,
    now: SystemTime,
) -> u64 {
    let response_secs = unix_secs(response_time);

    let apparent_age = http_date(headers, "date")
        .map(|date| response_secs.saturating_sub(unix_secs(date)).max(0))
        .unwrap_or(0);
    let response_delay = request_time
        .map(|t| response_secs.saturating_sub(unix_secs(t)).max(0))
        .unwrap_or(0);
    let corrected_age = age_header(headers)
        .unwrap_or(0)
        .saturating_add(response_delay);
    let initial_age = apparent_age.max(corrected_age);
    let resident_time = unix_secs(now).saturating_sub(response_secs);

    initial_age.saturating_add(resident_time).max(0) as u64
}
