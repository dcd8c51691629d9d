//! End-to-end scenario tests driving the public [`transact_core`] API through
//! [`MockCollaborators`] — each test exercises the handler chain a real transaction
//! would take, not just one isolated function.

use std::sync::Arc;
use std::time::SystemTime;

use http::{HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use transact_core::collaborators::MachineIdentity;
use transact_core::config::Config;
use transact_core::director;
use transact_core::error_responder::ErrorKind;
use transact_core::headers::HeaderSet;
use transact_core::mock::{MockCollaborators, MockParentSelector};
use transact_core::state::{
    ActiveServer, CacheAction, CachedObject, ParentResult, ParentResultCode, ParentResultCodeHolder,
    RetryType, State, TransactionMode,
};
use transact_core::NextAction;

fn request(method: Method, uri: &str) -> State {
    State::new(HeaderSet::new_request(method, uri.parse::<Uri>().unwrap(), Version::HTTP_11))
}

fn cached_object(url: &str, status: StatusCode, cache_control: &str, is_negative: bool) -> CachedObject {
    let mut response = HeaderSet::new_response(status, Version::HTTP_11);
    response.method = Some(Method::GET);
    if !cache_control.is_empty() {
        response.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_str(cache_control).unwrap(),
        );
    }
    CachedObject {
        lookup_url: url.parse().unwrap(),
        response,
        request_sent_time: SystemTime::now(),
        response_received_time: SystemTime::now(),
        object_size: 128,
        is_negative,
        need_revalidate_once: false,
    }
}

/// Scenario 1: a cold cache miss for a cacheable response ends in a cache write.
#[test]
fn cold_miss_on_cacheable_response_is_written_to_cache() {
    let config = Config::default().to_overridable();
    let collaborators = MockCollaborators::default();
    let mut state = request(Method::GET, "http://example.com/a");
    state.cache_info.lookup_url = Some("http://example.com/a".parse().unwrap());
    state.cache_info.action = Some(CacheAction::Lookup);

    let directive = director::handle_cache_open_read(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::OriginServerOpen);
    assert_eq!(state.cache_info.action, Some(CacheAction::PrepareToWrite));

    state.cache_info.action = Some(CacheAction::Write);
    state.server_response = HeaderSet::new_response(StatusCode::OK, Version::HTTP_11);
    state.server_response.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("max-age=60"),
    );

    let directive = director::handle_cache_operation_on_forward_server_response(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::CacheIssueWrite);
    assert_eq!(state.client_response.status, Some(StatusCode::OK));
}

/// Scenario 2: a stale hit is revalidated, the origin answers 304, and the merged
/// object is served and re-stored.
#[test]
fn stale_hit_revalidates_and_304_updates_cache() {
    let config = Config::default().to_overridable();
    let collaborators = MockCollaborators::default();
    let mut state = request(Method::GET, "http://example.com/a");
    let mut object = cached_object("http://example.com/a", StatusCode::OK, "max-age=0", false);
    object.response.insert(HeaderName::from_static("etag"), HeaderValue::from_static("\"v1\""));
    let object = Arc::new(object);
    state.cache_info.object_read = Some(object.clone());
    state.cache_info.object_store = Some(object);
    state.cache_info.action = Some(CacheAction::Lookup);

    director::handle_cache_open_read_hit_freshness(&mut state, &config, &collaborators);
    let directive = director::handle_cache_open_read_hit(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::OriginServerOpen);
    assert_eq!(state.server_request.get_str("if-none-match"), Some("\"v1\""));

    state.cache_info.action = Some(CacheAction::Update);
    state.server_response = HeaderSet::new_response(StatusCode::NOT_MODIFIED, Version::HTTP_11);

    let directive = director::handle_cache_operation_on_forward_server_response(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::InternalCacheUpdateHeaders);
    assert_eq!(state.client_response.status, Some(StatusCode::OK));
}

/// Scenario 3: a request for a host with a configured parent is routed to parent DNS
/// lookup through the real `handle_request` -> `how_to_open_connection` chain; once
/// parent DNS resolution fails and attempts are exhausted, `go_direct` sends the
/// transaction straight to the origin.
#[test]
fn parent_dns_exhaustion_falls_back_to_direct_origin() {
    let mut config = Config::default();
    config.next_hop.go_direct = true;
    let config = config.to_overridable();
    let mut collaborators = MockCollaborators::default();
    collaborators.parent_selector = MockParentSelector {
        find_result: std::sync::Mutex::new(ParentResult {
            result: ParentResultCodeHolder(ParentResultCode::Specified),
            hostname: Some("parent.example.com".to_string()),
            port: Some(8080),
            retry: false,
            retry_type: RetryType::None,
        }),
        exists: true,
        ..Default::default()
    };

    // A query string makes the request non-cache-lookupable, so `handle_request`
    // routes it straight to origin DNS lookup rather than cache lookup.
    let mut state = request(Method::GET, "http://example.com/a?id=1");
    state.dns_info.resolved_p = true;

    // Real production entry point: a non-lookupable request goes straight to origin
    // DNS lookup, which — with a parent configured for this host — must route into
    // parent DNS lookup rather than opening a connection directly.
    let directive = director::handle_request(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::DnsLookup);
    let directive = director::os_dns_lookup(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::DnsLookup);
    assert_eq!(state.current.active_server, ActiveServer::Parent);
    assert_eq!(state.parent_result.result.0, ParentResultCode::Specified);

    // The chosen parent then fails its own DNS resolution, and the transaction has
    // already burned through its whole parent-retry budget.
    state.dns_info.resolved_p = false;
    state.current.simple_retry_attempts = config.next_hop.parent_connect_attempts;
    state.current.unavailable_server_retry_attempts = 0;

    let directive = director::pp_dns_lookup(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::OriginServerOpen);
    assert_eq!(state.current.active_server, ActiveServer::Server);
}

/// Scenario 4: a repeated 5xx from origin while negative revalidation is enabled
/// marks the cached object negative and serves its previously-cached body.
#[test]
fn repeated_server_error_triggers_negative_revalidation() {
    let mut config = Config::default();
    config.negative_revalidation.enabled = true;
    config.negative_revalidation.statuses = vec![503];
    let config = config.to_overridable();
    let collaborators = MockCollaborators::default();
    let mut state = request(Method::GET, "http://example.com/a");
    let object = Arc::new(cached_object("http://example.com/a", StatusCode::OK, "max-age=60", false));
    state.cache_info.object_read = Some(object);
    state.cache_info.action = Some(CacheAction::NoAction);
    state.server_response = HeaderSet::new_response(StatusCode::SERVICE_UNAVAILABLE, Version::HTTP_11);

    let directive = director::handle_cache_operation_on_forward_server_response(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::InternalCacheUpdateHeaders);
    assert_eq!(state.client_response.status, Some(StatusCode::OK));
    assert!(state.client_response.has("expires"));
    assert!(!state.client_response.has("warning"));
}

/// Scenario 5: a WebSocket upgrade tunnels while under the configured connection
/// limit, and is rejected with 503 once the limit is reached.
#[test]
fn websocket_upgrade_respects_connection_limit() {
    let config = Config::default().to_overridable();
    let mut state = request(Method::GET, "http://example.com/chat");
    state.client_request.insert(HeaderName::from_static("connection"), HeaderValue::from_static("Upgrade"));
    state.client_request.insert(HeaderName::from_static("upgrade"), HeaderValue::from_static("websocket"));
    state.server_response = HeaderSet::new_response(StatusCode::SWITCHING_PROTOCOLS, Version::HTTP_11);

    let under_limit = MockCollaborators::default();
    let directive = director::handle_no_cache_operation_on_forward_server_response(&mut state, &config, &under_limit);
    assert_eq!(directive.next_action, NextAction::SslTunnel);
    assert_eq!(state.current.mode, TransactionMode::Tunnelling);

    let mut at_limit = MockCollaborators::default();
    at_limit.connection_limits.active_websocket_connections = config.header_policy.max_websocket_connections;
    let mut state = request(Method::GET, "http://example.com/chat");
    state.client_request.insert(HeaderName::from_static("connection"), HeaderValue::from_static("Upgrade"));
    state.client_request.insert(HeaderName::from_static("upgrade"), HeaderValue::from_static("websocket"));
    state.server_response = HeaderSet::new_response(StatusCode::SWITCHING_PROTOCOLS, Version::HTTP_11);

    let directive = director::handle_no_cache_operation_on_forward_server_response(&mut state, &config, &at_limit);
    assert_eq!(directive.next_action, NextAction::SendErrorCacheNoop);
    assert_eq!(state.client_response.status, Some(StatusCode::SERVICE_UNAVAILABLE));
}

/// Scenario 6: a request that has already cycled through this proxy more than
/// `max_proxy_cycles` times, identified by its own uuid in `Via:`, is rejected.
#[test]
fn loop_through_self_is_detected_by_via_uuid() {
    let mut config = Config::default();
    config.next_hop.max_proxy_cycles = 1;
    let config = config.to_overridable();
    let collaborators = MockCollaborators::default();
    let local_uuid = collaborators.machine.local_uuid();
    let mut state = request(Method::GET, "http://example.com/a");
    for _ in 0..3 {
        state.client_request.append(
            HeaderName::from_static("via"),
            HeaderValue::from_str(&format!("1.1 {local_uuid}")).unwrap(),
        );
    }

    let directive = director::handle_request(&mut state, &config, &collaborators);
    assert_eq!(directive.next_action, NextAction::SendErrorCacheNoop);
    assert_eq!(state.client_response.status, Some(ErrorKind::LoopDetected.mapping().status));
}
