//! Component E — Error Responder. `ErrorKind` is a pure data taxonomy —
//! the transaction's classification of *why* it is about to produce an error response
//! — distinct from [`crate::error::CoreError`], which models this crate's own
//! implementation failures. Conflating the two would blur the line between a
//! transaction outcome and an internal fault: errors are modelled as events here,
//! not exceptions.

use http::{HeaderName, HeaderValue, StatusCode, Version};

use crate::headers::HeaderSet;

/// HTTP-visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    ProxyAuthRequired,
    HostMissing,
    SchemeUnsupported,
    MethodUnsupported,
    BadConnectPort,
    PostNoContentLength,
    PostInvalidContentLength,
    TransferEncodingUnacceptable,
    ForbiddenByAcl,
    LoopDetected,
    UriTooLong,
    VersionUnsupported,
    TooEarly,
    OriginDown,
    NextHopCongested,
    NextHopDnsFail,
    ConnectFailed,
    OriginHangup,
    ActiveTimeout,
    InactiveTimeout,
    BadResponse,
    EntityTooLarge,
    RedirectLoop,
    WebSocketLimitExceeded,
}

/// Whether keep-alive must be disabled on this error's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveDisposition {
    Preserve,
    ForceClose,
}

/// The concrete (status, reason phrase, body template name, keep-alive disposition)
/// an [`ErrorKind`] maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMapping {
    pub status: StatusCode,
    pub reason: &'static str,
    pub body_template: &'static str,
    pub keep_alive: KeepAliveDisposition,
}

impl ErrorKind {
    /// Map this kind to its response shape.
    pub fn mapping(self) -> ErrorMapping {
        use KeepAliveDisposition::*;
        let (status, reason, body_template, keep_alive) = match self {
            ErrorKind::MalformedRequest => {
                (StatusCode::BAD_REQUEST, "Malformed Request", "malformed_request", ForceClose)
            }
            ErrorKind::ProxyAuthRequired => (
                StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                "Proxy Authentication Required",
                "proxy_auth_required",
                Preserve,
            ),
            ErrorKind::HostMissing => {
                (StatusCode::BAD_REQUEST, "Host Header Missing", "host_missing", ForceClose)
            }
            ErrorKind::SchemeUnsupported => (
                StatusCode::BAD_REQUEST,
                "Unsupported URL Scheme",
                "scheme_unsupported",
                ForceClose,
            ),
            ErrorKind::MethodUnsupported => (
                StatusCode::NOT_IMPLEMENTED,
                "Method Not Supported",
                "method_unsupported",
                Preserve,
            ),
            ErrorKind::BadConnectPort => {
                (StatusCode::FORBIDDEN, "Tunnel Port Forbidden", "bad_connect_port", ForceClose)
            }
            ErrorKind::PostNoContentLength => (
                StatusCode::LENGTH_REQUIRED,
                "Content-Length Required",
                "post_no_cl",
                ForceClose,
            ),
            ErrorKind::PostInvalidContentLength => (
                StatusCode::BAD_REQUEST,
                "Invalid Content-Length",
                "post_invalid_cl",
                ForceClose,
            ),
            ErrorKind::TransferEncodingUnacceptable => (
                StatusCode::NOT_IMPLEMENTED,
                "Unacceptable Transfer-Encoding",
                "te_unacceptable",
                ForceClose,
            ),
            ErrorKind::ForbiddenByAcl => {
                (StatusCode::FORBIDDEN, "Forbidden", "forbidden_acl", ForceClose)
            }
            ErrorKind::LoopDetected => (
                StatusCode::BAD_REQUEST,
                "Multi-Hop Cycle Detected",
                "loop_detected",
                ForceClose,
            ),
            ErrorKind::UriTooLong => {
                (StatusCode::URI_TOO_LONG, "Request URI Too Long", "uri_too_long", ForceClose)
            }
            ErrorKind::VersionUnsupported => (
                StatusCode::HTTP_VERSION_NOT_SUPPORTED,
                "HTTP Version Not Supported",
                "version_unsupported",
                ForceClose,
            ),
            ErrorKind::TooEarly => (
                StatusCode::from_u16(425).unwrap(),
                "Too Early",
                "too_early",
                Preserve,
            ),
            ErrorKind::OriginDown => {
                (StatusCode::BAD_GATEWAY, "Origin Server Down", "origin_down", ForceClose)
            }
            ErrorKind::NextHopCongested => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Next Hop Congested",
                "next_hop_congested",
                ForceClose,
            ),
            ErrorKind::NextHopDnsFail => (
                StatusCode::BAD_GATEWAY,
                "Unable to Resolve Next Hop",
                "next_hop_dns_fail",
                ForceClose,
            ),
            ErrorKind::ConnectFailed => (
                StatusCode::BAD_GATEWAY,
                "Connection Failed",
                "connect_failed",
                ForceClose,
            ),
            ErrorKind::OriginHangup => {
                (StatusCode::BAD_GATEWAY, "Origin Closed Connection", "origin_hangup", ForceClose)
            }
            ErrorKind::ActiveTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "Active Timeout",
                "active_timeout",
                ForceClose,
            ),
            ErrorKind::InactiveTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "Inactive Timeout",
                "inactive_timeout",
                ForceClose,
            ),
            ErrorKind::BadResponse => {
                (StatusCode::BAD_GATEWAY, "Invalid Response From Origin", "bad_response", ForceClose)
            }
            ErrorKind::EntityTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Entity Too Large",
                "entity_too_large",
                Preserve,
            ),
            ErrorKind::RedirectLoop => {
                (StatusCode::LOOP_DETECTED, "Redirect Loop Detected", "redirect_loop", ForceClose)
            }
            ErrorKind::WebSocketLimitExceeded => (
                StatusCode::SERVICE_UNAVAILABLE,
                "WebSocket Connection Limit Exceeded",
                "websocket_limit_exceeded",
                ForceClose,
            ),
        };
        ErrorMapping { status, reason, body_template, keep_alive }
    }

    /// Whether this kind stems from next-hop congestion and therefore carries a
    /// `Retry-After`.
    pub fn carries_retry_after(self) -> bool {
        matches!(self, ErrorKind::NextHopCongested)
    }
}

/// Build the client-facing error response for `kind`: sets status,
/// clears caching signals unconditionally, and attaches `Retry-After` when the kind
/// calls for one.
pub fn build_error_response(kind: ErrorKind, retry_after_secs: Option<u64>, version: Version) -> HeaderSet {
    let mapping = kind.mapping();
    let mut response = HeaderSet::new_response(mapping.status, version);

    response.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    response.remove("expires");
    response.remove("last-modified");

    if kind.carries_retry_after() {
        if let Some(secs) = retry_after_secs {
            if let Ok(hv) = HeaderValue::from_str(&secs.to_string()) {
                response.insert(HeaderName::from_static("retry-after"), hv);
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_detected_maps_to_400() {
        let mapping = ErrorKind::LoopDetected.mapping();
        assert_eq!(mapping.status, StatusCode::BAD_REQUEST);
        assert_eq!(mapping.reason, "Multi-Hop Cycle Detected");
    }

    #[test]
    fn active_timeout_never_implies_keep_alive() {
        let mapping = ErrorKind::ActiveTimeout.mapping();
        assert_eq!(mapping.keep_alive, KeepAliveDisposition::ForceClose);
    }

    #[test]
    fn only_congestion_carries_retry_after() {
        assert!(ErrorKind::NextHopCongested.carries_retry_after());
        assert!(!ErrorKind::OriginDown.carries_retry_after());
    }

    #[test]
    fn error_response_clears_caching_signals() {
        let response = build_error_response(ErrorKind::OriginDown, None, Version::HTTP_11);
        assert_eq!(response.get_str("cache-control"), Some("no-store"));
        assert!(!response.has("expires"));
        assert!(!response.has("last-modified"));
    }

    #[test]
    fn congestion_error_carries_retry_after_when_given() {
        let response = build_error_response(ErrorKind::NextHopCongested, Some(30), Version::HTTP_11);
        assert_eq!(response.get_str("retry-after"), Some("30"));
        assert_eq!(response.status, Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn non_congestion_error_never_sets_retry_after_even_if_given() {
        let response = build_error_response(ErrorKind::OriginDown, Some(30), Version::HTTP_11);
        assert!(!response.has("retry-after"));
    }
}
