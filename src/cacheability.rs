//! Component A — Cacheability Evaluator. Pure predicates over headers,
//! config, and method. None of these ever return `Err`: "Failure mode: returns a
//! boolean and writes a diagnostic byte into the via-string. Never signals an error;
//! all decisions are policy-deterministic."

pub mod cache_control;

use http::{Method, StatusCode};
use regex::Regex;

use crate::cacheability::cache_control::CacheControlExt;
use crate::config::{CookiePolicy, OverridableConfig, RequiredHeadersPolicy};
use crate::headers::HeaderSet;
use crate::via::{ViaString, IDX_CACHEABILITY_DETAIL};

/// Cacheability-rejection detail bytes written into the Via string
/// (`IDX_CACHEABILITY_DETAIL`): one byte recording why a response was rejected.
pub mod detail {
    pub const OK: u8 = b'-';
    pub const TUNNELLING: u8 = b't';
    pub const CACHE_DISABLED: u8 = b'd';
    pub const METHOD: u8 = b'm';
    pub const DYNAMIC_URL: u8 = b'u';
    pub const RANGE: u8 = b'r';
    pub const PLUGIN_VETO: u8 = b'p';
    pub const WWW_AUTHENTICATE: u8 = b'w';
    pub const SERVER_NO_STORE: u8 = b's';
    pub const CLIENT_NO_STORE: u8 = b'c';
    pub const MISSING_REQUIRED_HEADERS: u8 = b'h';
    pub const STATUS_NOT_CACHEABLE: u8 = b'S';
    pub const METHOD_MISMATCH: u8 = b'M';
    pub const COOKIE: u8 = b'k';
}

fn method_is_lookupable(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::POST | Method::DELETE | Method::PUT
    )
}

fn method_is_cacheable(method: &Method) -> bool {
    // A cacheable response must have come from a cacheable request method; the same
    // set that governs lookupability governs here too.
    method_is_lookupable(method)
}

/// Status codes cacheable without any explicit Cache-Control/Expires.
const STATUS_CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 300, 301, 304, 410];

/// Status codes that are never cacheable regardless of headers.
fn status_needs_positive_cache_control(status: StatusCode) -> bool {
    matches!(status.as_u16(), 302 | 307)
}

fn status_never_cacheable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 206 | 416)
}

/// A crude "is this URL dynamic" classifier applied once no configured never-cache
/// pattern has already rejected the URL: a query string marks a URL dynamic. Real
/// deployments would source finer-grained rules from remap configuration (out of
/// scope here).
fn url_is_dynamic(uri: &http::Uri) -> bool {
    uri.query().is_some()
}

/// Whether `uri` matches one of the operator-configured never-cache patterns.
/// Patterns are validated at config load time (`validate_regex_patterns`), so a
/// pattern that fails to compile here never reaches this function in practice; an
/// unparseable pattern found anyway is treated as non-matching rather than panicking.
fn url_matches_never_cache_patterns(uri: &http::Uri, patterns: &[String]) -> bool {
    let path = uri.path();
    patterns
        .iter()
        .any(|pattern| Regex::new(pattern).map(|re| re.is_match(path)).unwrap_or(false))
}

/// `is_request_cache_lookupable`.
pub fn is_request_cache_lookupable(
    request: &HeaderSet,
    tunnelling: bool,
    caching_enabled: bool,
    ttl_override: bool,
    config: &OverridableConfig,
    via: &mut ViaString,
) -> bool {
    if tunnelling {
        via.set(IDX_CACHEABILITY_DETAIL, detail::TUNNELLING);
        return false;
    }
    if !caching_enabled {
        via.set(IDX_CACHEABILITY_DETAIL, detail::CACHE_DISABLED);
        return false;
    }
    let Some(method) = request.method.as_ref() else {
        via.set(IDX_CACHEABILITY_DETAIL, detail::METHOD);
        return false;
    };
    if !method_is_lookupable(method) {
        via.set(IDX_CACHEABILITY_DETAIL, detail::METHOD);
        return false;
    }
    if let Some(uri) = request.uri.as_ref() {
        if url_matches_never_cache_patterns(uri, &config.cacheability.never_cache_url_patterns) {
            via.set(IDX_CACHEABILITY_DETAIL, detail::DYNAMIC_URL);
            return false;
        }
        let max_forwards_zero = request
            .get_str("max-forwards")
            .and_then(|v| v.parse::<i64>().ok())
            == Some(0);
        if url_is_dynamic(uri) && !ttl_override && !max_forwards_zero {
            via.set(IDX_CACHEABILITY_DETAIL, detail::DYNAMIC_URL);
            return false;
        }
    }
    if request.has("range") && !config.cacheability.range_lookup_enabled {
        via.set(IDX_CACHEABILITY_DETAIL, detail::RANGE);
        return false;
    }
    via.set(IDX_CACHEABILITY_DETAIL, detail::OK);
    true
}

/// `is_response_cacheable`.
#[allow(clippy::too_many_arguments)]
pub fn is_response_cacheable(
    request: &HeaderSet,
    response: &HeaderSet,
    request_was_lookupable: bool,
    plugin_veto: bool,
    config: &OverridableConfig,
    via: &mut ViaString,
) -> bool {
    if plugin_veto {
        via.set(IDX_CACHEABILITY_DETAIL, detail::PLUGIN_VETO);
        return false;
    }
    if !request_was_lookupable {
        via.set(IDX_CACHEABILITY_DETAIL, detail::CACHE_DISABLED);
        return false;
    }
    let Some(method) = request.method.as_ref() else {
        via.set(IDX_CACHEABILITY_DETAIL, detail::METHOD);
        return false;
    };
    if !method_is_cacheable(method) {
        via.set(IDX_CACHEABILITY_DETAIL, detail::METHOD);
        return false;
    }
    if response.has("www-authenticate") && !config.cacheability.ignore_auth {
        via.set(IDX_CACHEABILITY_DETAIL, detail::WWW_AUTHENTICATE);
        return false;
    }

    let server_cc = response.cache_control();
    if !config.cacheability.ignore_server_no_cache
        && (server_cc.has("no-store") || server_cc.has("private"))
    {
        via.set(IDX_CACHEABILITY_DETAIL, detail::SERVER_NO_STORE);
        return false;
    }
    if response.get_str("pragma").map(|v| v.contains("no-cache")) == Some(true)
        && !config.cacheability.ignore_server_no_cache
        && !server_cc.has("max-age")
        && !server_cc.has("s-maxage")
    {
        via.set(IDX_CACHEABILITY_DETAIL, detail::SERVER_NO_STORE);
        return false;
    }

    let client_cc = request.cache_control();
    if !config.cacheability.ignore_client_no_cache && client_cc.has("no-store") {
        via.set(IDX_CACHEABILITY_DETAIL, detail::CLIENT_NO_STORE);
        return false;
    }

    match config.cacheability.required_headers {
        RequiredHeadersPolicy::None => {}
        RequiredHeadersPolicy::AtLeastLastModified => {
            if !response.has("last-modified") && !response.has("expires") && !server_cc.has("max-age")
            {
                via.set(IDX_CACHEABILITY_DETAIL, detail::MISSING_REQUIRED_HEADERS);
                return false;
            }
        }
        RequiredHeadersPolicy::CacheControl => {
            if !response.has("cache-control") {
                via.set(IDX_CACHEABILITY_DETAIL, detail::MISSING_REQUIRED_HEADERS);
                return false;
            }
        }
    }

    let Some(status) = response.status else {
        via.set(IDX_CACHEABILITY_DETAIL, detail::STATUS_NOT_CACHEABLE);
        return false;
    };
    if status_never_cacheable(status) {
        via.set(IDX_CACHEABILITY_DETAIL, detail::STATUS_NOT_CACHEABLE);
        return false;
    }

    let positive_cc = server_cc.has("max-age") || server_cc.has("s-maxage") || server_cc.has("public");
    let has_expires = response.has("expires");
    let negative_cacheable = config.cacheability.negative_caching_enabled
        && config
            .cacheability
            .negative_caching_statuses
            .contains(&status.as_u16());

    if status_needs_positive_cache_control(status) {
        if !positive_cc {
            via.set(IDX_CACHEABILITY_DETAIL, detail::STATUS_NOT_CACHEABLE);
            return false;
        }
        via.set(IDX_CACHEABILITY_DETAIL, detail::OK);
        return true;
    }

    let cacheable_by_default = STATUS_CACHEABLE_BY_DEFAULT.contains(&status.as_u16());
    if cacheable_by_default || positive_cc || has_expires || negative_cacheable {
        via.set(IDX_CACHEABILITY_DETAIL, detail::OK);
        true
    } else {
        via.set(IDX_CACHEABILITY_DETAIL, detail::STATUS_NOT_CACHEABLE);
        false
    }
}

/// `is_cache_response_returnable`.
pub fn is_cache_response_returnable(
    request: &HeaderSet,
    cached_response: &HeaderSet,
    cached_method: &Method,
    config: &OverridableConfig,
    via: &mut ViaString,
) -> bool {
    let client_cc = request.cache_control();
    if client_cc.has("no-cache") {
        via.set(IDX_CACHEABILITY_DETAIL, detail::CLIENT_NO_STORE);
        return false;
    }
    let Some(req_method) = request.method.as_ref() else {
        return false;
    };
    let method_matches = req_method == cached_method
        || (*req_method == Method::HEAD && *cached_method == Method::GET);
    if !method_matches {
        via.set(IDX_CACHEABILITY_DETAIL, detail::METHOD_MISMATCH);
        return false;
    }
    if do_cookies_prevent_caching(config.cacheability.cookie_policy, cached_response) {
        via.set(IDX_CACHEABILITY_DETAIL, detail::COOKIE);
        return false;
    }
    via.set(IDX_CACHEABILITY_DETAIL, detail::OK);
    true
}

/// `is_stale_cache_response_returnable`. `pending_revalidate_once` is the cached
/// object's `need_revalidate_once` flag: once a negatively-cached object has been
/// through one bounded re-check, it must not be served stale again until a fresh
/// write clears the flag.
pub fn is_stale_cache_response_returnable(
    request: &HeaderSet,
    cached_response: &HeaderSet,
    current_age: i64,
    max_age: i64,
    config: &OverridableConfig,
    authorization_ok: bool,
    pending_revalidate_once: bool,
) -> bool {
    if pending_revalidate_once {
        return false;
    }
    let client_cc = request.cache_control();
    if client_cc.has("no-cache") {
        return false;
    }
    let server_cc = cached_response.cache_control();
    for forbidding in [
        "must-revalidate",
        "proxy-revalidate",
        "no-cache",
        "no-store",
        "s-maxage",
    ] {
        if server_cc.has(forbidding) {
            return false;
        }
    }
    if current_age > config.freshness.cache_max_stale_age + max_age {
        return false;
    }
    authorization_ok
}

/// `do_cookies_prevent_caching`.
pub fn do_cookies_prevent_caching(policy: CookiePolicy, response: &HeaderSet) -> bool {
    let has_cookie_header = response.has("set-cookie");
    match policy {
        CookiePolicy::All => false,
        CookiePolicy::None => has_cookie_header,
        CookiePolicy::Images => {
            has_cookie_header
                && !response
                    .get_str("content-type")
                    .map(|ct| ct.starts_with("image/"))
                    .unwrap_or(false)
        }
        CookiePolicy::AllButText => {
            has_cookie_header
                && response
                    .get_str("content-type")
                    .map(|ct| ct.starts_with("text/"))
                    .unwrap_or(false)
        }
        CookiePolicy::AllButTextExt => {
            if !has_cookie_header {
                return false;
            }
            let is_text = response
                .get_str("content-type")
                .map(|ct| ct.starts_with("text/"))
                .unwrap_or(false);
            if !is_text {
                return false;
            }
            let is_public = response.cache_control().has("public");
            !is_public
        }
    }
}

/// Whether `Cache-Control: only-if-cached` was sent by the client.
pub fn client_requested_only_if_cached(request: &HeaderSet) -> bool {
    request.cache_control().has("only-if-cached")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http::{HeaderName, HeaderValue, Version};

    fn req(method: Method, uri: &str) -> HeaderSet {
        HeaderSet::new_request(method, uri.parse().unwrap(), Version::HTTP_11)
    }

    fn resp(status: u16) -> HeaderSet {
        HeaderSet::new_response(StatusCode::from_u16(status).unwrap(), Version::HTTP_11)
    }

    #[test]
    fn lookupable_rejects_tunnelling() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/a");
        assert!(!is_request_cache_lookupable(
            &request, true, true, false, &config, &mut via
        ));
        assert_eq!(via.get(IDX_CACHEABILITY_DETAIL), detail::TUNNELLING);
    }

    #[test]
    fn lookupable_rejects_unsafe_dynamic_url() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/a?x=1");
        assert!(!is_request_cache_lookupable(
            &request, false, true, false, &config, &mut via
        ));
        assert_eq!(via.get(IDX_CACHEABILITY_DETAIL), detail::DYNAMIC_URL);
    }

    #[test]
    fn lookupable_allows_dynamic_url_with_max_forwards_zero() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let mut request = req(Method::GET, "http://example.com/a?x=1");
        request.insert(
            HeaderName::from_static("max-forwards"),
            HeaderValue::from_static("0"),
        );
        assert!(is_request_cache_lookupable(
            &request, false, true, false, &config, &mut via
        ));
    }

    #[test]
    fn lookupable_rejects_url_matching_never_cache_pattern() {
        let mut config = Config::default();
        config.cacheability.never_cache_url_patterns = vec!["^/api/".to_string()];
        let config = config.to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/api/orders");
        assert!(!is_request_cache_lookupable(
            &request, false, true, false, &config, &mut via
        ));
        assert_eq!(via.get(IDX_CACHEABILITY_DETAIL), detail::DYNAMIC_URL);
    }

    #[test]
    fn lookupable_allows_non_matching_url_with_never_cache_patterns_configured() {
        let mut config = Config::default();
        config.cacheability.never_cache_url_patterns = vec!["^/api/".to_string()];
        let config = config.to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/static/logo.png");
        assert!(is_request_cache_lookupable(
            &request, false, true, false, &config, &mut via
        ));
    }

    #[test]
    fn response_cacheable_by_default_status() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/a");
        let response = resp(200);
        assert!(is_response_cacheable(
            &request, &response, true, false, &config, &mut via
        ));
    }

    #[test]
    fn response_302_needs_positive_cache_control() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/a");
        let response = resp(302);
        assert!(!is_response_cacheable(
            &request, &response, true, false, &config, &mut via
        ));

        let mut cacheable = resp(302);
        cacheable.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("max-age=60"),
        );
        assert!(is_response_cacheable(
            &request, &cacheable, true, false, &config, &mut via
        ));
    }

    #[test]
    fn response_206_never_cacheable() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::GET, "http://example.com/a");
        let mut response = resp(206);
        response.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("max-age=60"),
        );
        assert!(!is_response_cacheable(
            &request, &response, true, false, &config, &mut via
        ));
    }

    #[test]
    fn head_can_reuse_cached_get() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::HEAD, "http://example.com/a");
        let response = resp(200);
        assert!(is_cache_response_returnable(
            &request, &response, &Method::GET, &config, &mut via
        ));
    }

    #[test]
    fn mismatched_methods_reject() {
        let config = Config::default().to_overridable();
        let mut via = ViaString::default();
        let request = req(Method::POST, "http://example.com/a");
        let response = resp(200);
        assert!(!is_cache_response_returnable(
            &request, &response, &Method::GET, &config, &mut via
        ));
    }

    #[test]
    fn cookie_policy_none_blocks_any_set_cookie() {
        let mut response = resp(200);
        response.insert(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("a=b"),
        );
        assert!(do_cookies_prevent_caching(CookiePolicy::None, &response));
        assert!(!do_cookies_prevent_caching(CookiePolicy::All, &response));
    }

    #[test]
    fn cookie_policy_images_permits_image_content_type() {
        let mut response = resp(200);
        response.insert(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("a=b"),
        );
        response.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("image/png"),
        );
        assert!(!do_cookies_prevent_caching(CookiePolicy::Images, &response));
    }

    #[test]
    fn cookie_policy_all_but_text_ext_relaxes_for_public() {
        let mut response = resp(200);
        response.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/html"),
        );
        response.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("public"),
        );
        assert!(!do_cookies_prevent_caching(
            CookiePolicy::AllButTextExt,
            &response
        ));
    }

    #[test]
    fn stale_returnable_respects_must_revalidate() {
        let config = Config::default().to_overridable();
        let request = req(Method::GET, "http://example.com/a");
        let mut response = resp(200);
        response.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("max-age=60, must-revalidate"),
        );
        assert!(!is_stale_cache_response_returnable(
            &request, &response, 120, 60, &config, true, false
        ));
    }

    #[test]
    fn stale_returnable_bounded_by_max_stale_age() {
        let mut config = Config::default();
        config.freshness.cache_max_stale_age = 30;
        let config = config.to_overridable();
        let request = req(Method::GET, "http://example.com/a");
        let response = resp(200);
        assert!(is_stale_cache_response_returnable(
            &request, &response, 90, 60, &config, true, false
        ));
        assert!(!is_stale_cache_response_returnable(
            &request, &response, 200, 60, &config, true, false
        ));
    }

    #[test]
    fn stale_returnable_blocked_while_one_bounded_recheck_pending() {
        let config = Config::default().to_overridable();
        let request = req(Method::GET, "http://example.com/a");
        let response = resp(200);
        assert!(is_stale_cache_response_returnable(
            &request, &response, 0, 60, &config, true, false
        ));
        assert!(!is_stale_cache_response_returnable(
            &request, &response, 0, 60, &config, true, true
        ));
    }
}
