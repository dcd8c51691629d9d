//! Component C — Header Builder. Builds `server_request` from
//! `client_request`, and `client_response` from either `server_response` or a cached
//! response. Depends on [`crate::freshness`] for the Age computation used when
//! serving from cache.

use http::{HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::cacheability::cache_control::CacheControlExt;
use crate::config::{ClientIpPolicy, OverridableConfig};
use crate::freshness::parse_http_date;
use crate::headers::HeaderSet;
use crate::state::CachedObject;
use crate::via::{ViaString, IDX_WARNING};

/// Headers a 304 merge must never let the new response overwrite
/// (Design Notes §9 "Open question: header-merge vs replace on cache update"). The
/// RFC 7232 §4.1 vs RFC 2616 §10.3.5 tension is intentional — this exact set is
/// deliberate, and callers should not narrow or widen it casually.
pub const MERGE_BLACKLIST: &[&str] = &[
    "age",
    "etag",
    "expires",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "content-length",
    "set-cookie",
    "content-type",
    "warning",
];

/// Merge a 304's headers onto a cached response: everything not in
/// [`MERGE_BLACKLIST`] overwrites; Warning headers follow their own rule (drop the
/// cached copy's 1xx warnings, then append every warning the 304 carried).
pub fn merge_304_headers(cached: &mut HeaderSet, response_304: &HeaderSet) {
    cached.headers.remove("warning");
    for value in response_304.headers.get_all("warning") {
        cached.headers.append(HeaderName::from_static("warning"), value.clone());
    }

    for (name, value) in response_304.headers.iter() {
        if MERGE_BLACKLIST.contains(&name.as_str()) {
            continue;
        }
        cached.headers.insert(name.clone(), value.clone());
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Build the Host header value, appending `:port` only when non-default for the scheme
///.
pub fn host_header_value(host: &str, port: u16, scheme: &str) -> String {
    if Some(port) == default_port(scheme) {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Strip the fragment from a URL.
pub fn normalize_url(uri: &Uri) -> Uri {
    // `http::Uri` never retains a fragment (it has no such component), so parsing a
    // re-serialized URI through it is already fragment-free; this is a named seam so
    // the invariant stays documented and callable on its own.
    uri.clone()
}

/// Build the outgoing server request from the client request.
///
/// `next_hop_is_proxy` selects request-line style: CONNECT and parent-proxy next hops
/// that are themselves proxies use absolute-URI form; everything else uses origin-form
/// (represented here simply by whether the URI carries a full authority).
pub fn build_server_request(
    client_request: &HeaderSet,
    client_addr: Option<std::net::IpAddr>,
    config: &OverridableConfig,
) -> HeaderSet {
    let method = client_request.method.clone().unwrap_or(Method::GET);
    let uri = client_request
        .uri
        .clone()
        .map(|u| normalize_url(&u))
        .unwrap_or_else(|| Uri::from_static("/"));
    let version = client_request.version;

    let mut server_request = HeaderSet::new_request(method, uri.clone(), version);
    server_request.copy_end_to_end_from(client_request);

    if let Some(addr) = client_addr {
        match config.header_policy.client_ip_policy {
            ClientIpPolicy::NeverInsert => {}
            ClientIpPolicy::IfAbsent => {
                if !server_request.has("client-ip") {
                    insert_client_ip(&mut server_request, addr);
                }
            }
            ClientIpPolicy::Always => insert_client_ip(&mut server_request, addr),
        }

        if config.header_policy.insert_forwarded {
            append_forwarded_for(&mut server_request, addr);
        } else {
            append_x_forwarded_for(&mut server_request, addr);
        }
    }

    if config.header_policy.insert_via {
        append_via(&mut server_request, "transact-core");
    }

    if let Some(host) = uri.host() {
        let scheme = uri.scheme_str().unwrap_or("http");
        let port = uri.port_u16().unwrap_or_else(|| default_port(scheme).unwrap_or(80));
        let value = host_header_value(host, port, scheme);
        if let Ok(hv) = HeaderValue::from_str(&value) {
            server_request.insert(HeaderName::from_static("host"), hv);
        }
    }

    server_request
}

fn insert_client_ip(request: &mut HeaderSet, addr: std::net::IpAddr) {
    if let Ok(v) = HeaderValue::from_str(&addr.to_string()) {
        request.insert(HeaderName::from_static("client-ip"), v);
    }
}

fn append_x_forwarded_for(request: &mut HeaderSet, addr: std::net::IpAddr) {
    let existing = request.get_str("x-forwarded-for").map(str::to_string);
    let value = match existing {
        Some(prior) => format!("{prior}, {addr}"),
        None => addr.to_string(),
    };
    if let Ok(hv) = HeaderValue::from_str(&value) {
        request.insert(HeaderName::from_static("x-forwarded-for"), hv);
    }
}

fn append_forwarded_for(request: &mut HeaderSet, addr: std::net::IpAddr) {
    let existing = request.get_str("forwarded").map(str::to_string);
    let clause = format!("for={addr}");
    let value = match existing {
        Some(prior) => format!("{prior}, {clause}"),
        None => clause,
    };
    if let Ok(hv) = HeaderValue::from_str(&value) {
        request.insert(HeaderName::from_static("forwarded"), hv);
    }
}

fn append_via(headers: &mut HeaderSet, proxy_name: &str) {
    let version_token = match headers.version {
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        _ => "1.1",
    };
    let clause = format!("{version_token} {proxy_name}");
    let existing = headers.get_str("via").map(str::to_string);
    let value = match existing {
        Some(prior) => format!("{prior}, {clause}"),
        None => clause,
    };
    if let Ok(hv) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("via"), hv);
    }
}

/// Whether the cached/upstream response is returnable and the client request carries
/// no conditional headers of its own: in that case the conditional
/// headers we'd otherwise add for revalidation are stripped from a *normal* upstream
/// request so a non-200 upstream response doesn't waste bandwidth serving a 304 body
/// the client didn't ask to validate against.
pub fn strip_conditional_headers_for_plain_request(
    server_request: &mut HeaderSet,
    client_request_is_conditional: bool,
    cached_response_returnable: bool,
    config: &OverridableConfig,
) {
    if client_request_is_conditional || !cached_response_returnable {
        return;
    }
    if matches!(config.freshness.when_to_revalidate, crate::config::WhenToRevalidate::StaleIfIms) {
        return;
    }
    server_request.remove("if-modified-since");
    server_request.remove("if-none-match");
}

/// Build a conditional revalidation request against `cached`.
pub fn issue_revalidate(server_request: &mut HeaderSet, cached: &CachedObject, auth_only_stale_check: bool) {
    let cached_was_fresh_200_get_head = cached.response.status == Some(StatusCode::OK)
        && matches!(
            cached.response.method.as_ref(),
            Some(&Method::GET) | Some(&Method::HEAD) | None
        );

    if auth_only_stale_check && cached_was_fresh_200_get_head {
        server_request.method = Some(Method::HEAD);
        return;
    }

    if cached.response.status != Some(StatusCode::OK) {
        return;
    }

    if let Some(lm) = cached.response.get_str("last-modified") {
        if let Ok(hv) = HeaderValue::from_str(lm) {
            server_request.insert(HeaderName::from_static("if-modified-since"), hv);
        }
    }
    if let Some(etag) = cached.response.get_str("etag") {
        let stripped = etag.strip_prefix("W/").unwrap_or(etag);
        if let Ok(hv) = HeaderValue::from_str(stripped) {
            server_request.insert(HeaderName::from_static("if-none-match"), hv);
        }
    }
}

/// Content-Length / Transfer-Encoding decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyLengthDecision {
    /// Trust this exact Content-Length (possibly 0 for a body-precluded status).
    ContentLength(u64),
    Chunked,
    /// A single satisfiable byte-range: 206 with `Content-Range: bytes start-end/total_len`.
    PartialContent { start: u64, end: u64, total_len: u64 },
    /// More than one satisfiable byte-range: 206 multipart/byteranges.
    MultipartByteranges { ranges: Vec<(u64, u64)>, total_len: u64, boundary: String },
    /// Every range in the request fell outside `0..total_len`: 416.
    RangeNotSatisfiable { total_len: u64 },
}

/// Parse a `Range: bytes=...` header against a known total length. Returns `None` if
/// the header isn't a byte-range spec, or is too malformed to act on — the response is
/// then served in full. Returns `Some(Err(()))` when the header parses but every range
/// in it falls outside `0..total_len`, which the caller turns into a 416.
pub fn parse_range_ranges(range_header: &str, total_len: u64) -> Option<Result<Vec<(u64, u64)>, ()>> {
    let spec = range_header.strip_prefix("bytes=")?;
    if spec.is_empty() {
        return None;
    }
    let mut satisfiable = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let (start_str, end_str) = part.split_once('-')?;
        if start_str.is_empty() {
            let suffix_len: u64 = end_str.parse().ok()?;
            if suffix_len == 0 || total_len == 0 {
                continue;
            }
            satisfiable.push((total_len.saturating_sub(suffix_len), total_len - 1));
        } else {
            let start: u64 = start_str.parse().ok()?;
            if start >= total_len {
                continue;
            }
            let end = if end_str.is_empty() {
                total_len.saturating_sub(1)
            } else {
                end_str.parse::<u64>().ok()?.min(total_len.saturating_sub(1))
            };
            if end < start {
                continue;
            }
            satisfiable.push((start, end));
        }
    }
    if satisfiable.is_empty() {
        Some(Err(()))
    } else {
        Some(Ok(satisfiable))
    }
}

/// Range-aware body-length decision: `None` means no Range request is in play and the
/// caller should fall back to [`decide_body_length`]; `Some` overrides it.
pub fn decide_range_response(range_header: Option<&str>, total_len: Option<u64>) -> Option<BodyLengthDecision> {
    let total_len = total_len?;
    match parse_range_ranges(range_header?, total_len)? {
        Err(()) => Some(BodyLengthDecision::RangeNotSatisfiable { total_len }),
        Ok(ranges) if ranges.len() == 1 => {
            let (start, end) = ranges[0];
            Some(BodyLengthDecision::PartialContent { start, end, total_len })
        }
        Ok(ranges) => Some(BodyLengthDecision::MultipartByteranges {
            ranges,
            total_len,
            boundary: "transact-core-byteranges".to_string(),
        }),
    }
}

/// Apply a [`BodyLengthDecision`] to the outgoing response: status, Content-Length,
/// and Content-Range / 416's mandatory `Content-Range: bytes */total_len`.
pub fn apply_body_length_decision(response: &mut HeaderSet, decision: BodyLengthDecision) {
    match decision {
        BodyLengthDecision::ContentLength(len) => {
            if let Ok(hv) = HeaderValue::from_str(&len.to_string()) {
                response.insert(HeaderName::from_static("content-length"), hv);
            }
        }
        BodyLengthDecision::Chunked => {
            response.insert(
                HeaderName::from_static("transfer-encoding"),
                HeaderValue::from_static("chunked"),
            );
        }
        BodyLengthDecision::PartialContent { start, end, total_len } => {
            response.status = Some(StatusCode::PARTIAL_CONTENT);
            if let Ok(hv) = HeaderValue::from_str(&(end - start + 1).to_string()) {
                response.insert(HeaderName::from_static("content-length"), hv);
            }
            if let Ok(hv) = HeaderValue::from_str(&format!("bytes {start}-{end}/{total_len}")) {
                response.insert(HeaderName::from_static("content-range"), hv);
            }
        }
        BodyLengthDecision::MultipartByteranges { ranges: _, total_len: _, boundary } => {
            // Byte-range part assembly belongs to the body writer, not header construction.
            response.status = Some(StatusCode::PARTIAL_CONTENT);
            if let Ok(hv) = HeaderValue::from_str(&format!("multipart/byteranges; boundary={boundary}")) {
                response.insert(HeaderName::from_static("content-type"), hv);
            }
            response.headers.remove("content-length");
            response.insert(
                HeaderName::from_static("transfer-encoding"),
                HeaderValue::from_static("chunked"),
            );
        }
        BodyLengthDecision::RangeNotSatisfiable { total_len } => {
            response.status = Some(StatusCode::RANGE_NOT_SATISFIABLE);
            if let Ok(hv) = HeaderValue::from_str(&format!("bytes */{total_len}")) {
                response.insert(HeaderName::from_static("content-range"), hv);
            }
            response.headers.remove("content-length");
        }
    }
}

/// Rewrite `uri`'s path by the first matching redirect rule's prefix; `None` if no
/// rule's `from_prefix` matches.
pub fn apply_redirect_rule(uri: &Uri, rules: &[crate::config::RedirectRule]) -> Option<Uri> {
    let path = uri.path();
    let rule = rules.iter().find(|r| path.starts_with(r.from_prefix.as_str()))?;
    let new_path = format!("{}{}", rule.to_prefix, &path[rule.from_prefix.len()..]);
    let pq = match uri.query() {
        Some(q) => format!("{new_path}?{q}"),
        None => new_path,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(pq.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Whether the response's status/method precludes a body at all: 1xx, 204, 304, or a
/// HEAD request.
pub fn response_body_precluded(status: StatusCode, request_method: &Method) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || *request_method == Method::HEAD
}

pub fn decide_body_length(
    status: StatusCode,
    request_method: &Method,
    origin_content_length: Option<u64>,
    serving_from_cache: bool,
    cached_object_size: Option<u64>,
    client_is_http11: bool,
    config: &OverridableConfig,
) -> BodyLengthDecision {
    if response_body_precluded(status, request_method) {
        return BodyLengthDecision::ContentLength(0);
    }
    if !serving_from_cache {
        if let Some(cl) = origin_content_length {
            return BodyLengthDecision::ContentLength(cl);
        }
    } else if let Some(size) = cached_object_size {
        return BodyLengthDecision::ContentLength(size);
    }
    if client_is_http11 && config.header_policy.chunking_enabled {
        BodyLengthDecision::Chunked
    } else {
        BodyLengthDecision::ContentLength(0)
    }
}

/// Keep-alive decision for the outgoing client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveDecision {
    KeepAlive,
    Close,
}

pub fn decide_keep_alive(
    client_version: Version,
    client_wants_close: bool,
    body_length_known: bool,
) -> KeepAliveDecision {
    if client_version == Version::HTTP_10 && !client_wants_close {
        // HTTP/1.0 defaults to close unless Keep-Alive was explicitly negotiated
        // upstream of this decision (not modeled here: assume it was not).
        return KeepAliveDecision::Close;
    }
    if client_wants_close || !body_length_known {
        KeepAliveDecision::Close
    } else {
        KeepAliveDecision::KeepAlive
    }
}

/// Apply the keep-alive decision to `client_response`, stripping hop-by-hop first and
/// using `Proxy-Connection` only when the client itself used that spelling.
pub fn apply_keep_alive(
    client_response: &mut HeaderSet,
    client_request: &HeaderSet,
    decision: KeepAliveDecision,
) {
    client_response.strip_hop_by_hop();
    let header_name = if client_request.has("proxy-connection") {
        "proxy-connection"
    } else {
        "connection"
    };
    let value = match decision {
        KeepAliveDecision::KeepAlive => "keep-alive",
        KeepAliveDecision::Close => "close",
    };
    client_response.insert(
        HeaderName::from_bytes(header_name.as_bytes()).unwrap(),
        HeaderValue::from_static(value),
    );
}

/// Insert an `Age:` header into a client response served from cache.
pub fn insert_age(client_response: &mut HeaderSet, current_age_secs: i64) {
    if client_response.has("age") {
        return; // honour the origin's own Age if already present.
    }
    let age = current_age_secs.max(0);
    if let Ok(hv) = HeaderValue::from_str(&age.to_string()) {
        client_response.insert(HeaderName::from_static("age"), hv);
    }
}

/// Warning codes this module ever inserts.
pub const WARNING_111_REVALIDATION_FAILED: &str = "111 transact-core \"Revalidation Failed\"";
pub const WARNING_113_HEURISTIC_EXPIRATION: &str =
    "113 transact-core \"Heuristic Expiration\"";

/// Insert the stale-upstream-down warning and record it in the Via trace.
pub fn insert_warning_111(client_response: &mut HeaderSet, via: &mut ViaString) {
    client_response.append(
        HeaderName::from_static("warning"),
        HeaderValue::from_static(WARNING_111_REVALIDATION_FAILED),
    );
    via.set(IDX_WARNING, b'1');
}

/// Insert the heuristic-freshness warning and record it in the Via trace.
pub fn insert_warning_113(client_response: &mut HeaderSet, via: &mut ViaString) {
    client_response.append(
        HeaderName::from_static("warning"),
        HeaderValue::from_static(WARNING_113_HEURISTIC_EXPIRATION),
    );
    via.set(IDX_WARNING, b'3');
}

/// Clear any stale-related Warning headers before merging a revalidation success
///.
pub fn clear_warnings(client_response: &mut HeaderSet) {
    client_response.headers.remove("warning");
}

/// Push `Expires` out by `lifetime_secs` from `now`, for negative revalidation.
pub fn bump_expires(response: &mut HeaderSet, now: std::time::SystemTime, lifetime_secs: i64) {
    let new_expires = now + std::time::Duration::from_secs(lifetime_secs.max(0) as u64);
    if let Ok(hv) = HeaderValue::from_str(&httpdate::fmt_http_date(new_expires)) {
        response.insert(HeaderName::from_static("expires"), hv);
    }
}

/// WebSocket scheme swap applied before remap.
pub fn websocket_upgrade_pre_remap(uri: &Uri) -> Option<Uri> {
    let scheme = uri.scheme_str()?;
    let new_scheme = match scheme {
        "http" => "ws",
        "https" => "wss",
        _ => return None,
    };
    swap_scheme(uri, new_scheme)
}

/// Restore `http`/`https` after remap.
pub fn websocket_upgrade_post_remap(uri: &Uri) -> Option<Uri> {
    let scheme = uri.scheme_str()?;
    let new_scheme = match scheme {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };
    swap_scheme(uri, new_scheme)
}

fn swap_scheme(uri: &Uri, new_scheme: &str) -> Option<Uri> {
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(new_scheme.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Whether the client's `Upgrade:`/`Connection:` pair requests a known upgrade token
///. `h2c` is deliberately unrecognized here — "An `h2c`
/// Upgrade is silently ignored."
pub fn requested_upgrade_token(request: &HeaderSet) -> Option<&'static str> {
    let connection_mentions_upgrade = request
        .get_str("connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !connection_mentions_upgrade {
        return None;
    }
    match request.get_str("upgrade").map(str::to_ascii_lowercase).as_deref() {
        Some("websocket") => Some("websocket"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http::Version;

    fn req(method: Method, uri: &str) -> HeaderSet {
        HeaderSet::new_request(method, uri.parse().unwrap(), Version::HTTP_11)
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header_value("example.com", 80, "http"), "example.com");
        assert_eq!(host_header_value("example.com", 8080, "http"), "example.com:8080");
        assert_eq!(host_header_value("example.com", 443, "https"), "example.com");
    }

    #[test]
    fn build_server_request_strips_hop_by_hop_and_sets_host() {
        let config = Config::default().to_overridable();
        let mut client_request = req(Method::GET, "http://example.com:8080/a");
        client_request.insert(
            HeaderName::from_static("connection"),
            HeaderValue::from_static("keep-alive"),
        );
        let server_request = build_server_request(&client_request, None, &config);
        assert!(!server_request.has("connection"));
        assert_eq!(server_request.get_str("host"), Some("example.com:8080"));
    }

    #[test]
    fn client_ip_policy_if_absent_inserts_when_missing() {
        let config = Config::default().to_overridable();
        let client_request = req(Method::GET, "http://example.com/a");
        let addr: std::net::IpAddr = "203.0.113.5".parse().unwrap();
        let server_request = build_server_request(&client_request, Some(addr), &config);
        assert_eq!(server_request.get_str("client-ip"), Some("203.0.113.5"));
        assert_eq!(server_request.get_str("x-forwarded-for"), Some("203.0.113.5"));
    }

    #[test]
    fn body_precluded_statuses_force_zero_length() {
        let config = Config::default().to_overridable();
        let decision = decide_body_length(
            StatusCode::NOT_MODIFIED,
            &Method::GET,
            Some(500),
            false,
            None,
            true,
            &config,
        );
        assert_eq!(decision, BodyLengthDecision::ContentLength(0));
    }

    #[test]
    fn head_request_forces_zero_length() {
        let config = Config::default().to_overridable();
        let decision = decide_body_length(StatusCode::OK, &Method::HEAD, Some(500), false, None, true, &config);
        assert_eq!(decision, BodyLengthDecision::ContentLength(0));
    }

    #[test]
    fn origin_content_length_is_trusted_when_not_serving_from_cache() {
        let config = Config::default().to_overridable();
        let decision =
            decide_body_length(StatusCode::OK, &Method::GET, Some(42), false, None, true, &config);
        assert_eq!(decision, BodyLengthDecision::ContentLength(42));
    }

    #[test]
    fn cached_object_size_used_when_serving_from_cache() {
        let config = Config::default().to_overridable();
        let decision =
            decide_body_length(StatusCode::OK, &Method::GET, None, true, Some(7), true, &config);
        assert_eq!(decision, BodyLengthDecision::ContentLength(7));
    }

    #[test]
    fn chunking_used_when_no_length_known_and_http11() {
        let config = Config::default().to_overridable();
        let decision =
            decide_body_length(StatusCode::OK, &Method::GET, None, false, None, true, &config);
        assert_eq!(decision, BodyLengthDecision::Chunked);
    }

    #[test]
    fn keep_alive_closes_on_http10_by_default() {
        let decision = decide_keep_alive(Version::HTTP_10, false, true);
        assert_eq!(decision, KeepAliveDecision::Close);
    }

    #[test]
    fn keep_alive_closes_when_length_unknown() {
        let decision = decide_keep_alive(Version::HTTP_11, false, false);
        assert_eq!(decision, KeepAliveDecision::Close);
    }

    #[test]
    fn proxy_connection_spelling_preserved_toward_client() {
        let mut client_request = req(Method::GET, "http://example.com/a");
        client_request.insert(
            HeaderName::from_static("proxy-connection"),
            HeaderValue::from_static("keep-alive"),
        );
        let mut client_response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        apply_keep_alive(&mut client_response, &client_request, KeepAliveDecision::KeepAlive);
        assert_eq!(client_response.get_str("proxy-connection"), Some("keep-alive"));
        assert!(!client_response.has("connection"));
    }

    #[test]
    fn merge_304_respects_blacklist_and_warning_rule() {
        let mut cached = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        cached.insert(HeaderName::from_static("etag"), HeaderValue::from_static("\"old\""));
        cached.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/html"));
        cached.append(HeaderName::from_static("warning"), HeaderValue::from_static("110 - \"stale\""));
        cached.insert(HeaderName::from_static("x-custom"), HeaderValue::from_static("old"));

        let mut response_304 = HeaderSet::new_response(StatusCode::NOT_MODIFIED, Version::HTTP_11);
        response_304.insert(HeaderName::from_static("etag"), HeaderValue::from_static("\"new\""));
        response_304.insert(HeaderName::from_static("x-custom"), HeaderValue::from_static("new"));

        merge_304_headers(&mut cached, &response_304);

        assert_eq!(cached.get_str("etag"), Some("\"old\"")); // blacklisted, not overwritten
        assert_eq!(cached.get_str("x-custom"), Some("new")); // not blacklisted, overwritten
        assert_eq!(cached.headers.get_all("warning").iter().count(), 0); // cached 110 dropped, 304 had none
    }

    #[test]
    fn websocket_scheme_round_trips() {
        let uri: Uri = "http://example.com/chat".parse().unwrap();
        let ws = websocket_upgrade_pre_remap(&uri).unwrap();
        assert_eq!(ws.scheme_str(), Some("ws"));
        let restored = websocket_upgrade_post_remap(&ws).unwrap();
        assert_eq!(restored.scheme_str(), Some("http"));
    }

    #[test]
    fn h2c_upgrade_is_ignored() {
        let mut request = req(Method::GET, "http://example.com/a");
        request.insert(HeaderName::from_static("connection"), HeaderValue::from_static("Upgrade"));
        request.insert(HeaderName::from_static("upgrade"), HeaderValue::from_static("h2c"));
        assert_eq!(requested_upgrade_token(&request), None);
    }

    #[test]
    fn websocket_upgrade_detected() {
        let mut request = req(Method::GET, "http://example.com/a");
        request.insert(HeaderName::from_static("connection"), HeaderValue::from_static("Upgrade"));
        request.insert(HeaderName::from_static("upgrade"), HeaderValue::from_static("websocket"));
        assert_eq!(requested_upgrade_token(&request), Some("websocket"));
    }

    #[test]
    fn strip_conditional_headers_when_not_client_conditional() {
        let config = Config::default().to_overridable();
        let mut server_request = req(Method::GET, "http://example.com/a");
        server_request.insert(
            HeaderName::from_static("if-modified-since"),
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );
        strip_conditional_headers_for_plain_request(&mut server_request, false, true, &config);
        assert!(!server_request.has("if-modified-since"));
    }

    #[test]
    fn strip_conditional_headers_suppressed_by_stale_if_ims() {
        let mut config = Config::default();
        config.freshness.when_to_revalidate = crate::config::WhenToRevalidate::StaleIfIms;
        let config = config.to_overridable();
        let mut server_request = req(Method::GET, "http://example.com/a");
        server_request.insert(
            HeaderName::from_static("if-modified-since"),
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );
        strip_conditional_headers_for_plain_request(&mut server_request, false, true, &config);
        assert!(server_request.has("if-modified-since"));
    }

    #[test]
    fn issue_revalidate_strips_weak_etag_prefix() {
        let mut server_request = req(Method::GET, "http://example.com/a");
        let mut cached_response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        cached_response.method = Some(Method::GET);
        cached_response.insert(HeaderName::from_static("etag"), HeaderValue::from_static("W/\"v1\""));
        let cached = CachedObject {
            lookup_url: "http://example.com/a".parse().unwrap(),
            response: cached_response,
            request_sent_time: std::time::SystemTime::now(),
            response_received_time: std::time::SystemTime::now(),
            object_size: 0,
            is_negative: false,
            need_revalidate_once: false,
        };
        issue_revalidate(&mut server_request, &cached, false);
        assert_eq!(server_request.get_str("if-none-match"), Some("\"v1\""));
    }

    #[test]
    fn parse_http_date_reads_rfc1123() {
        let parsed = parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT");
        assert!(parsed.is_some());
    }

    #[test]
    fn single_range_is_satisfiable() {
        assert_eq!(parse_range_ranges("bytes=0-499", 1000), Some(Ok(vec![(0, 499)])));
    }

    #[test]
    fn suffix_range_counts_from_end() {
        assert_eq!(parse_range_ranges("bytes=-500", 1000), Some(Ok(vec![(500, 999)])));
    }

    #[test]
    fn open_ended_range_runs_to_total_len() {
        assert_eq!(parse_range_ranges("bytes=900-", 1000), Some(Ok(vec![(900, 999)])));
    }

    #[test]
    fn range_past_total_len_is_unsatisfiable() {
        assert_eq!(parse_range_ranges("bytes=2000-3000", 1000), Some(Err(())));
    }

    #[test]
    fn non_byte_unit_is_ignored() {
        assert_eq!(parse_range_ranges("items=0-1", 1000), None);
    }

    #[test]
    fn multiple_ranges_collected_in_order() {
        assert_eq!(
            parse_range_ranges("bytes=0-99,200-299", 1000),
            Some(Ok(vec![(0, 99), (200, 299)]))
        );
    }

    #[test]
    fn decide_range_response_single_range_is_partial_content() {
        let decision = decide_range_response(Some("bytes=0-99"), Some(1000)).unwrap();
        assert_eq!(decision, BodyLengthDecision::PartialContent { start: 0, end: 99, total_len: 1000 });
    }

    #[test]
    fn decide_range_response_unsatisfiable_range_is_416() {
        let decision = decide_range_response(Some("bytes=5000-6000"), Some(1000)).unwrap();
        assert_eq!(decision, BodyLengthDecision::RangeNotSatisfiable { total_len: 1000 });
    }

    #[test]
    fn apply_partial_content_sets_status_and_content_range() {
        let mut response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        apply_body_length_decision(
            &mut response,
            BodyLengthDecision::PartialContent { start: 0, end: 99, total_len: 1000 },
        );
        assert_eq!(response.status, Some(StatusCode::PARTIAL_CONTENT));
        assert_eq!(response.get_str("content-range"), Some("bytes 0-99/1000"));
        assert_eq!(response.get_str("content-length"), Some("100"));
    }

    #[test]
    fn apply_range_not_satisfiable_sets_416_and_star_content_range() {
        let mut response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
        apply_body_length_decision(&mut response, BodyLengthDecision::RangeNotSatisfiable { total_len: 1000 });
        assert_eq!(response.status, Some(StatusCode::RANGE_NOT_SATISFIABLE));
        assert_eq!(response.get_str("content-range"), Some("bytes */1000"));
        assert!(!response.has("content-length"));
    }

    #[test]
    fn redirect_rule_rewrites_matching_prefix() {
        let rules = vec![crate::config::RedirectRule {
            from_prefix: "/old".to_string(),
            to_prefix: "/new".to_string(),
        }];
        let uri: Uri = "http://example.com/old/path?x=1".parse().unwrap();
        let rewritten = apply_redirect_rule(&uri, &rules).unwrap();
        assert_eq!(rewritten.path(), "/new/path");
        assert_eq!(rewritten.query(), Some("x=1"));
    }

    #[test]
    fn redirect_rule_no_match_returns_none() {
        let rules = vec![crate::config::RedirectRule {
            from_prefix: "/old".to_string(),
            to_prefix: "/new".to_string(),
        }];
        let uri: Uri = "http://example.com/other".parse().unwrap();
        assert!(apply_redirect_rule(&uri, &rules).is_none());
    }
}
