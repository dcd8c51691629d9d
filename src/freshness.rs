//! Component B — Freshness Evaluator. Computes, for a cached entry,
//! its freshness limit, current age, and age limit, then classifies a hit as
//! FRESH/WARNING/STALE. HTTP-date parsing uses the `httpdate` crate, the same one
//! several HTTP caching crates in this ecosystem depend on for this — not a
//! hand-rolled RFC 2822 parser.

use std::time::{Duration, SystemTime};

use crate::cacheability::cache_control::{CacheControl, CacheControlExt};
use crate::config::{OverridableConfig, WhenToRevalidate};
use crate::headers::HeaderSet;

/// Result of classifying a cached entry's freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Warning,
    Stale,
}

/// Parse an HTTP-date header value (`Date`, `Expires`, `Last-Modified`, ...).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}

fn secs_between(earlier: SystemTime, later: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn clamp(value: i64, lo: i64, hi: i64) -> i64 {
    value.max(lo).min(hi)
}

/// `freshness_limit`.
pub fn freshness_limit(
    response: &HeaderSet,
    date: SystemTime,
    last_modified: Option<SystemTime>,
    in_read_while_write: bool,
    config: &OverridableConfig,
) -> i64 {
    let cc = response.cache_control();
    let guaranteed_max = config.freshness.cache_guaranteed_max_lifetime;

    if let Some(s_maxage) = cc.get_i64("s-maxage") {
        return clamp(s_maxage.max(0), 0, guaranteed_max);
    }
    if let Some(max_age) = cc.get_i64("max-age") {
        // RFC 7234 §4.2.1: a negative max-age is treated as stale, i.e. coerced to 0.
        return clamp(max_age.max(0), 0, guaranteed_max);
    }
    if !in_read_while_write {
        if let Some(expires) = response.get_str("expires").and_then(parse_http_date) {
            let limit = secs_between(date, expires).max(0);
            return clamp(limit, 0, guaranteed_max);
        }
    }
    if let Some(lm) = last_modified {
        let age_since_lm = secs_between(lm, date).max(0);
        let heuristic = (age_since_lm as f64 * config.freshness.lm_factor) as i64;
        return clamp(
            heuristic,
            config.freshness.heuristic_min,
            config.freshness.heuristic_max,
        );
    }
    clamp(
        config.freshness.heuristic_min,
        config.freshness.heuristic_min,
        config.freshness.heuristic_max,
    )
}

/// RFC 7234 §4.2.3 `current_age`: pure arithmetic over explicit timestamps, since the
/// cache subsystem itself is out of scope here.
pub fn current_age(
    request_sent_time: SystemTime,
    response_received_time: SystemTime,
    response_date: Option<SystemTime>,
    now: SystemTime,
    config: &OverridableConfig,
) -> i64 {
    let date_value = response_date.unwrap_or(request_sent_time);
    let apparent_age = secs_between(date_value, response_received_time).max(0);
    let response_delay = secs_between(request_sent_time, response_received_time).max(0);
    let corrected_age = apparent_age.max(response_delay);
    let resident_time = secs_between(response_received_time, now).max(0);
    let age = corrected_age + resident_time;
    clamp(age, 0, config.freshness.cache_guaranteed_max_lifetime)
}

/// `age_limit`.
pub fn age_limit(freshness_limit: i64, request_cc: &CacheControl, config: &OverridableConfig) -> i64 {
    if let Some(revalidate_after) = revalidate_after_override(config) {
        if revalidate_after >= 0 {
            return revalidate_after;
        }
    }

    let mut limit = freshness_limit;
    let origin_must_revalidate = false; // applied by the caller when checking the response, not here.

    if let Some(max_stale) = request_cc.get_i64("max-stale") {
        if !origin_must_revalidate {
            limit += max_stale;
        }
    }
    if let Some(min_fresh) = request_cc.get_i64("min-fresh") {
        limit -= min_fresh;
    }
    if let Some(max_age) = request_cc.get_i64("max-age") {
        // `max-age: 0` forces revalidation by replacing the limit with zero.
        limit = max_age.max(0);
    }
    limit
}

fn revalidate_after_override(config: &OverridableConfig) -> Option<i64> {
    // Placeholder seam for a future `cache_control.revalidate_after` request-scoped
    // override; not sourced from `Config` today, so it never overrides.
    let _ = config;
    None
}

/// Classify a cached entry, honoring the `when_to_revalidate` override knob
/// before falling back to the ordinary age-vs-limit comparison.
pub fn classify(
    current_age: i64,
    freshness_limit: i64,
    age_limit: i64,
    heuristic: bool,
    config: &OverridableConfig,
    stale_returnable_on_write_lock_fail: bool,
) -> Freshness {
    match config.freshness.when_to_revalidate {
        WhenToRevalidate::AlwaysStale => return Freshness::Stale,
        WhenToRevalidate::NeverStale => return Freshness::Fresh,
        WhenToRevalidate::StaleIfHeuristic => {
            if heuristic {
                return Freshness::Stale;
            }
        }
        WhenToRevalidate::StaleIfIms | WhenToRevalidate::Auto => {}
    }

    if stale_returnable_on_write_lock_fail {
        return Freshness::Fresh;
    }

    if current_age <= freshness_limit.min(age_limit) {
        if heuristic {
            Freshness::Warning
        } else {
            Freshness::Fresh
        }
    } else if current_age <= age_limit {
        Freshness::Warning
    } else {
        Freshness::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http::{HeaderName, HeaderValue, StatusCode, Version};

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn resp_with_cc(cc: &str) -> HeaderSet {
        let mut r = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        r.insert(HeaderName::from_static("cache-control"), HeaderValue::from_str(cc).unwrap());
        r
    }

    #[test]
    fn max_age_wins_over_expires() {
        let config = Config::default().to_overridable();
        let response = resp_with_cc("max-age=60");
        let limit = freshness_limit(&response, now(), None, false, &config);
        assert_eq!(limit, 60);
    }

    #[test]
    fn negative_max_age_is_zero() {
        let config = Config::default().to_overridable();
        let response = resp_with_cc("max-age=-5");
        let limit = freshness_limit(&response, now(), None, false, &config);
        assert_eq!(limit, 0);
    }

    #[test]
    fn expires_before_date_is_zero() {
        let config = Config::default().to_overridable();
        let mut response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        let past = now() - Duration::from_secs(10);
        response.insert(
            HeaderName::from_static("expires"),
            HeaderValue::from_str(&httpdate::fmt_http_date(past)).unwrap(),
        );
        let limit = freshness_limit(&response, now(), None, false, &config);
        assert_eq!(limit, 0);
    }

    #[test]
    fn heuristic_uses_lm_factor_and_is_clamped() {
        let config = Config::default().to_overridable();
        let lm = now() - Duration::from_secs(1000);
        let response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        let limit = freshness_limit(&response, now(), Some(lm), false, &config);
        assert_eq!(limit, 100); // 1000 * 0.10
    }

    #[test]
    fn age_limit_applies_client_modifiers_in_order() {
        let config = Config::default().to_overridable();
        let cc_header = HeaderValue::from_static("max-stale=30, min-fresh=10");
        let cc = crate::cacheability::cache_control::parse([&cc_header]);
        let limit = age_limit(60, &cc, &config);
        assert_eq!(limit, 80); // 60 + 30 - 10
    }

    #[test]
    fn age_limit_max_age_zero_forces_revalidation() {
        let config = Config::default().to_overridable();
        let cc_header = HeaderValue::from_static("max-age=0");
        let cc = crate::cacheability::cache_control::parse([&cc_header]);
        let limit = age_limit(60, &cc, &config);
        assert_eq!(limit, 0);
    }

    #[test]
    fn classify_fresh_when_within_limit() {
        let config = Config::default().to_overridable();
        let verdict = classify(30, 60, 60, false, &config, false);
        assert_eq!(verdict, Freshness::Fresh);
    }

    #[test]
    fn classify_heuristic_fresh_is_warning() {
        let config = Config::default().to_overridable();
        let verdict = classify(30, 60, 60, true, &config, false);
        assert_eq!(verdict, Freshness::Warning);
    }

    #[test]
    fn classify_stale_beyond_age_limit() {
        let config = Config::default().to_overridable();
        let verdict = classify(120, 60, 60, false, &config, false);
        assert_eq!(verdict, Freshness::Stale);
    }

    #[test]
    fn classify_never_stale_override() {
        let mut config = Config::default();
        config.freshness.when_to_revalidate = WhenToRevalidate::NeverStale;
        let config = config.to_overridable();
        let verdict = classify(10_000, 60, 60, false, &config, false);
        assert_eq!(verdict, Freshness::Fresh);
    }

    #[test]
    fn no_date_no_last_modified_substitutes_request_sent_time() {
        let config = Config::default().to_overridable();
        let request_sent = now();
        let received = now() + Duration::from_secs(2);
        let age = current_age(request_sent, received, None, received, &config);
        assert_eq!(age, 2);
    }
}
