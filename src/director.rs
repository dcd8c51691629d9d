//! Component F — Transaction Director, the largest component by far.
//! Each handler is a free `fn(&mut State, &OverridableConfig, &dyn Collaborators) ->
//! Directive` — the Rust shape of "pure function of State with side-effects only on
//! State" — wiring components A (cacheability), B (freshness), C (header builder),
//! D (next-hop selector) and E (error responder) together per the named transitions.
//! Only the four real suspension points are represented as `Directive`s the surrounding SM re-enters;
//! everything else is an ordinary synchronous call chain within one handler, each
//! decision function calling straight into the next without involving the SM.

use http::{HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use regex::Regex;

use crate::cacheability;
use crate::collaborators::{Collaborators, MarkAction, WriteMode};
use crate::config::{OverridableConfig, WriteLockFailurePolicy};
use crate::error_responder::{build_error_response, ErrorKind};
use crate::freshness::{self, Freshness};
use crate::header_builder;
use crate::next_hop;
use crate::state::{
    ActiveServer, CacheAction, ConnectionOutcome, Directive, DnsLookingUp, NextAction,
    ParentResultCode, ParentResultCodeHolder, RangeSetup, RetryType, State, WriteLockState,
};
use crate::via::{
    IDX_CACHE_RESULT, IDX_ERROR_CLASS, IDX_FRESHNESS, IDX_PARENT_CONNECT, IDX_PROXY_RESULT,
    IDX_SERVER_CONNECT, VIA_IN_CACHE_FRESH, VIA_IN_CACHE_RWW_HIT, VIA_IN_CACHE_STALE,
    VIA_PARENT_FAIL_TO_DIRECT, VIA_PARENT_SUCCESS, VIA_SERVER_CONNECT_FAILURE,
    VIA_SERVER_CONNECT_SUCCESS,
};

fn default_port_for_scheme(scheme: &str) -> u16 {
    match scheme {
        "https" | "wss" => 443,
        _ => 80,
    }
}

/// Terminate the transaction with a generated error response.
fn send_error(state: &mut State, kind: ErrorKind, retry_after_secs: Option<u64>) -> Directive {
    log::debug!("transaction {} failing with {kind:?}", state.id);
    state.via.set(IDX_ERROR_CLASS, b'E');
    state.via.set(IDX_PROXY_RESULT, b'E');
    state.client_response = build_error_response(kind, retry_after_secs, state.client_request.version);
    let client_wants_close = state.client_request.get_str("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    header_builder::apply_keep_alive(
        &mut state.client_response,
        &state.client_request,
        match kind.mapping().keep_alive {
            crate::error_responder::KeepAliveDisposition::ForceClose => {
                header_builder::KeepAliveDecision::Close
            }
            crate::error_responder::KeepAliveDisposition::Preserve if client_wants_close => {
                header_builder::KeepAliveDecision::Close
            }
            crate::error_responder::KeepAliveDisposition::Preserve => {
                header_builder::KeepAliveDecision::KeepAlive
            }
        },
    );
    Directive::terminal(NextAction::SendErrorCacheNoop)
}

/// **ModifyRequest**: fix scheme/port defaults, repair Host, record the
/// original URL, then hand off to remap.
pub fn modify_request(state: &mut State, _config: &OverridableConfig, _collaborators: &dyn Collaborators) -> Directive {
    if let Some(uri) = state.client_request.uri.clone() {
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let port = uri.port_u16().unwrap_or_else(|| default_port_for_scheme(&scheme));
        if let Some(host) = uri.host() {
            let host_value = header_builder::host_header_value(host, port, &scheme);
            if let Ok(hv) = http::HeaderValue::from_str(&host_value) {
                state.client_request.insert(http::HeaderName::from_static("host"), hv);
            }
        }
        state.redirect_info.original_url = Some(uri);
    }
    Directive::new(NextAction::ApiReadRequestHdr, Some(start_remap_request))
}

/// **StartRemapRequest**: short-circuit WebSocket Upgrade requests by
/// swapping the scheme before remap runs.
pub fn start_remap_request(state: &mut State, _config: &OverridableConfig, _collaborators: &dyn Collaborators) -> Directive {
    if header_builder::requested_upgrade_token(&state.client_request).is_some() {
        if let Some(uri) = &state.client_request.uri {
            if let Some(ws_uri) = header_builder::websocket_upgrade_pre_remap(uri) {
                state.client_request.uri = Some(ws_uri);
            }
        }
    }
    Directive::new(NextAction::ApiPreRemap, Some(end_remap_request))
}

/// URL path patterns rejected regardless of `reverse_proxy_mode`, compiled fresh per
/// call — matches `cacheability::url_matches_never_cache_patterns`'s per-call
/// compilation (Dependency notes: `OverridableConfig` must stay `Clone`, so a
/// pre-compiled `Regex` can't live on the config struct).
fn url_matches_acl_deny_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| Regex::new(p).map(|re| re.is_match(path)).unwrap_or(false))
}

/// **EndRemapRequest**: restore the real scheme post-remap, apply the first matching
/// redirect rule, enforce `reverse_proxy_mode`'s host allowlist, then the ACL
/// deny-pattern list — all before `ApiPostRemap` hands off to `HandleRequest`.
pub fn end_remap_request(state: &mut State, config: &OverridableConfig, _collaborators: &dyn Collaborators) -> Directive {
    if let Some(uri) = &state.client_request.uri {
        if let Some(restored) = header_builder::websocket_upgrade_post_remap(uri) {
            state.client_request.uri = Some(restored);
        }
    }

    if let Some(uri) = state.client_request.uri.clone() {
        if let Some(rewritten) = header_builder::apply_redirect_rule(&uri, &config.remap.redirect_rules) {
            state.client_request.uri = Some(rewritten);
        }
    }

    let Some(uri) = state.client_request.uri.clone() else {
        return send_error(state, ErrorKind::MalformedRequest, None);
    };

    if config.remap.reverse_proxy_mode {
        let host_allowed = uri
            .host()
            .map(|h| config.remap.allowed_hosts.iter().any(|allowed| allowed == h))
            .unwrap_or(false);
        if !host_allowed {
            log::warn!("transaction {} rejected by reverse-proxy-mode host allowlist", state.id);
            return send_error(state, ErrorKind::ForbiddenByAcl, None);
        }
    }

    if url_matches_acl_deny_patterns(uri.path(), &config.remap.acl_deny_url_patterns) {
        log::warn!("transaction {} rejected by ACL deny pattern", state.id);
        return send_error(state, ErrorKind::ForbiddenByAcl, None);
    }

    Directive::new(NextAction::ApiPostRemap, Some(handle_request))
}

/// A PUSH request always targets the cache directly; `http::Method` has no built-in
/// constant for it since it isn't a standard request method.
fn is_push_method(method: &Method) -> bool {
    method.as_str() == "PUSH"
}

/// TRACE/OPTIONS + `Max-Forwards` decrement: `None` means the request proceeds through
/// the normal lookup/DNS flow; `Some` is a terminal directive the core answered
/// locally because `Max-Forwards` reached zero.
fn handle_max_forwards(state: &mut State, method: &Method, collaborators: &dyn Collaborators) -> Option<Directive> {
    if *method != Method::TRACE && *method != Method::OPTIONS {
        return None;
    }
    let forwards: u64 = state.client_request.get_str("max-forwards")?.trim().parse().ok()?;
    if forwards > 0 {
        if let Ok(hv) = HeaderValue::from_str(&(forwards - 1).to_string()) {
            state.client_request.insert(HeaderName::from_static("max-forwards"), hv);
        }
        return None;
    }
    Some(if *method == Method::TRACE {
        send_trace_response(state, collaborators)
    } else {
        send_options_response(state)
    })
}

/// Reply to a `Max-Forwards: 0` TRACE with the request itself as the body, per RFC 9110
/// §9.3.8.
fn send_trace_response(state: &mut State, collaborators: &dyn Collaborators) -> Directive {
    let body = collaborators.body_factory().fabricate("trace_echo", state);
    let mut response = crate::headers::HeaderSet::new_response(StatusCode::OK, state.client_request.version);
    if let Ok(hv) = HeaderValue::from_str(&body.buf.len().to_string()) {
        response.insert(HeaderName::from_static("content-length"), hv);
    }
    response.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("message/http"));
    state.client_response = response;
    Directive::terminal(NextAction::SendErrorCacheNoop)
}

/// Reply to a `Max-Forwards: 0` OPTIONS with this proxy's own `Allow` set rather than
/// forwarding further.
fn send_options_response(state: &mut State) -> Directive {
    let mut response = crate::headers::HeaderSet::new_response(StatusCode::OK, state.client_request.version);
    response.insert(HeaderName::from_static("content-length"), HeaderValue::from_static("0"));
    response.insert(
        HeaderName::from_static("allow"),
        HeaderValue::from_static("GET, HEAD, POST, PUT, DELETE, OPTIONS, TRACE, CONNECT"),
    );
    state.client_response = response;
    Directive::terminal(NextAction::SendErrorCacheNoop)
}

/// **HandleRequest**: validate request syntax, decide cache lookup vs
/// DNS-first ordering.
pub fn handle_request(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(uri) = state.client_request.uri.clone() else {
        return send_error(state, ErrorKind::MalformedRequest, None);
    };
    if uri.host().is_none() {
        return send_error(state, ErrorKind::HostMissing, None);
    }
    let scheme = uri.scheme_str().unwrap_or("");
    if !matches!(scheme, "http" | "https" | "ws" | "wss") {
        return send_error(state, ErrorKind::SchemeUnsupported, None);
    }
    if next_hop::self_loop_detected(
        &state.client_request,
        collaborators.machine().local_uuid(),
        config.next_hop.max_proxy_cycles,
    ) {
        log::warn!("transaction {} detected a multi-hop cycle through this proxy", state.id);
        return send_error(state, ErrorKind::LoopDetected, None);
    }
    let Some(method) = state.client_request.method.clone() else {
        return send_error(state, ErrorKind::MalformedRequest, None);
    };
    if method == Method::CONNECT {
        let port = uri.port_u16().unwrap_or(443);
        if !config.connect_ports.contains(&port) {
            return send_error(state, ErrorKind::BadConnectPort, None);
        }
    }
    if let Some(directive) = handle_max_forwards(state, &method, collaborators) {
        return directive;
    }
    if is_push_method(&method) {
        state.cache_info.action = Some(CacheAction::PrepareToWrite);
        state.cache_info.lookup_url = Some(uri);
        return Directive::new(NextAction::CacheLookup, Some(handle_cache_open_read));
    }
    let lookupable = cacheability::is_request_cache_lookupable(
        &state.client_request,
        matches!(state.current.mode, crate::state::TransactionMode::Tunnelling),
        true,
        false,
        config,
        &mut state.via,
    );

    if lookupable {
        state.cache_info.action = Some(CacheAction::Lookup);
        state.cache_info.lookup_url = Some(uri);
        Directive::new(NextAction::CacheLookup, Some(handle_cache_open_read))
    } else {
        state.dns_info.lookup_name = uri.host().map(str::to_string);
        Directive::new(NextAction::DnsLookup, Some(os_dns_lookup))
    }
}

/// **OSDNSLookup**: on failure, serve stale-from-cache or 502; on
/// success, route onward to cache lookup or connection setup.
pub fn os_dns_lookup(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    if !state.dns_info.resolved_p {
        log::debug!(
            "origin server DNS lookup failed for {:?}",
            state.dns_info.lookup_name
        );
        if let Some(object) = state.cache_info.object_read.clone() {
            let now = state.current.now;
            let age = freshness::current_age(
                object.request_sent_time,
                object.response_received_time,
                object.response.get_str("date").and_then(freshness::parse_http_date),
                now,
                config,
            );
            let limit = freshness::freshness_limit(
                &object.response,
                object.response_received_time,
                object.response.get_str("last-modified").and_then(freshness::parse_http_date),
                false,
                config,
            );
            if cacheability::is_stale_cache_response_returnable(
                &state.client_request,
                &object.response,
                age,
                limit,
                config,
                true,
                object.need_revalidate_once,
            ) {
                header_builder::insert_warning_111(&mut state.client_response, &mut state.via);
                return Directive::terminal(NextAction::ServeFromCache);
            }
        }
        return send_error(state, ErrorKind::NextHopDnsFail, None);
    }

    if state.cache_info.action == Some(CacheAction::Lookup) {
        Directive::new(NextAction::CacheLookup, Some(handle_cache_open_read))
    } else {
        how_to_open_connection(state, config, collaborators)
    }
}

/// **PPDNSLookup**: mark the failed parent down, try the next one, or
/// fall back to direct/stale/502.
pub fn pp_dns_lookup(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    if !state.dns_info.resolved_p {
        if let Some(hostname) = state.parent_result.hostname.clone() {
            next_hop::mark(collaborators, &hostname, state.parent_result.port.unwrap_or(0), MarkAction::MarkDown);
        }
        let lookup_name = state.dns_info.lookup_name.clone().unwrap_or_default();
        state.parent_result = next_hop::find_next_hop(collaborators, &lookup_name, state);
        let exhausted = next_hop::parent_attempts_exhausted(&state.current, &config.next_hop);
        if exhausted {
            if config.next_hop.go_direct {
                state.current.active_server = ActiveServer::Server;
                return how_to_open_connection(state, config, collaborators);
            }
            if let Some(object) = state.cache_info.object_read.clone() {
                if cacheability::is_stale_cache_response_returnable(
                    &state.client_request, &object.response, 0, 0, config, true, object.need_revalidate_once,
                ) {
                    header_builder::insert_warning_111(&mut state.client_response, &mut state.via);
                    return Directive::terminal(NextAction::ServeFromCache);
                }
            }
            return send_error(state, ErrorKind::OriginDown, None);
        }
        return Directive::new(NextAction::DnsReverseLookup, Some(pp_dns_lookup));
    }
    how_to_open_connection(state, config, collaborators)
}

/// Component D's entry point: pick parent vs origin before a connection is ever
/// opened. Consulted once per transaction — once `parent_result` is no longer
/// `Undefined`, later re-entries (from the cache-miss/write-lock paths) fall
/// straight through without re-running parent selection.
fn how_to_open_connection(state: &mut State, _config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    if state.parent_result.result.0 == ParentResultCode::Undefined {
        let host = state
            .dns_info
            .lookup_name
            .clone()
            .or_else(|| state.client_request.uri.as_ref().and_then(|u| u.host().map(str::to_string)))
            .unwrap_or_default();

        let parent_applies = if next_hop::is_localhost_bypass(&host) {
            false
        } else if let Some(strategy) = collaborators.next_hop_strategy() {
            strategy.next_hop_exists(state)
        } else {
            collaborators.parent_selector().parent_exists(&host)
        };

        if parent_applies {
            state.parent_result = next_hop::find_next_hop(collaborators, &host, state);
            state.current.active_server = ActiveServer::Parent;
            state.dns_info.looking_up = DnsLookingUp::ParentProxy;
            state.dns_info.resolved_p = false;
            return Directive::new(NextAction::DnsLookup, Some(pp_dns_lookup));
        }
        state.parent_result.result = ParentResultCodeHolder(ParentResultCode::Direct);
    }
    Directive::new(NextAction::OriginServerOpen, Some(handle_response))
}

/// **HandleCacheOpenRead**: split on PUSH / busy / hit / miss.
pub fn handle_cache_open_read(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    if is_push_method(state.client_request.method.as_ref().unwrap_or(&Method::GET)) {
        return handle_cache_open_read_push(state, config, collaborators);
    }
    let Some(url) = state.cache_info.lookup_url.clone() else {
        return handle_cache_open_read_miss(state, config, collaborators);
    };
    let result = collaborators.cache().lookup(&url);
    log::trace!("cache lookup for {url} returned hit={} busy={}", result.hit, result.doc_busy);
    state.via.set(IDX_CACHE_RESULT, result.hit_miss_code);
    state.cache_info.hit_miss_code = result.hit_miss_code;

    if result.doc_busy {
        state.cache_info.object_read = None;
        return handle_cache_open_read_miss(state, config, collaborators);
    }
    match result.object_read {
        Some(object) => {
            state.cache_info.object_read = Some(object);
            Directive::new(NextAction::ApiCacheLookupComplete, Some(handle_cache_open_read_hit_freshness))
        }
        None => handle_cache_open_read_miss(state, config, collaborators),
    }
}

/// **HandleCacheOpenReadPush**: open a cache write slot for an incoming PUSH body,
/// updating an existing object if one is already cached under this URL.
fn handle_cache_open_read_push(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(url) = state.cache_info.lookup_url.clone() else {
        return handle_push_error(state, config, collaborators);
    };
    let mode = if collaborators.cache().lookup(&url).hit {
        WriteMode::Update
    } else {
        WriteMode::Write
    };
    let result = collaborators.cache().open_write(&url, mode);
    state.cache_info.write_lock_state = Some(result);
    match result {
        WriteLockState::Success => {
            state.cache_info.action = Some(match mode {
                WriteMode::Write => CacheAction::Write,
                WriteMode::Update => CacheAction::Update,
                WriteMode::Delete => CacheAction::Delete,
            });
            Directive::new(NextAction::ReadPushHdr, Some(handle_push_tunnel_success))
        }
        _ => handle_push_error(state, config, collaborators),
    }
}

/// **HandleCacheOpenReadHitFreshness**: compute freshness, stamp the
/// via byte, then hand to the serve-vs-revalidate decision.
pub fn handle_cache_open_read_hit_freshness(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(object) = state.cache_info.object_read.clone() else {
        return handle_cache_open_read_miss(state, config, collaborators);
    };
    let now = state.current.now;
    let date = object.response.get_str("date").and_then(freshness::parse_http_date);
    let last_modified = object.response.get_str("last-modified").and_then(freshness::parse_http_date);
    let age = freshness::current_age(object.request_sent_time, object.response_received_time, date, now, config);
    let limit = freshness::freshness_limit(&object.response, object.response_received_time, last_modified, false, config);
    let client_cc = state.client_request.cache_control();
    let age_limit = freshness::age_limit(limit, &client_cc, config);
    let heuristic = !object.response.has("cache-control") && !object.response.has("expires");
    let verdict = freshness::classify(age, limit, age_limit, heuristic, config, false);

    state.via.set(
        IDX_FRESHNESS,
        match verdict {
            Freshness::Fresh => b'F',
            Freshness::Warning => b'W',
            Freshness::Stale => b'S',
        },
    );
    state.cache_info.lookup_result = Some(verdict != Freshness::Stale);

    Directive::new(NextAction::ApiCacheLookupComplete, Some(handle_cache_open_read_hit))
}

/// **HandleCacheOpenReadHit**: serve from cache, or revalidate.
pub fn handle_cache_open_read_hit(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(object) = state.cache_info.object_read.clone() else {
        return handle_cache_open_read_miss(state, config, collaborators);
    };

    let needs_revalidate = state.cache_info.lookup_result != Some(true);
    let returnable = cacheability::is_cache_response_returnable(
        &state.client_request,
        &object.response,
        object.response.method.as_ref().unwrap_or(&Method::GET),
        config,
        &mut state.via,
    );

    if !needs_revalidate && returnable {
        state.client_response = object.response.clone();
        if let Some(decision) =
            header_builder::decide_range_response(state.client_request.get_str("range"), Some(object.object_size))
        {
            state.range_info.setup = Some(match decision {
                header_builder::BodyLengthDecision::RangeNotSatisfiable { .. } => RangeSetup::NotSatisfiable,
                _ => RangeSetup::Requested,
            });
            header_builder::apply_body_length_decision(&mut state.client_response, decision);
        }
        state.via.set(IDX_PROXY_RESULT, VIA_IN_CACHE_FRESH);
        return Directive::terminal(NextAction::ServeFromCache);
    }

    if object.is_negative {
        let age = freshness::current_age(
            object.request_sent_time,
            object.response_received_time,
            object.response.get_str("date").and_then(freshness::parse_http_date),
            state.current.now,
            config,
        );
        if cacheability::is_stale_cache_response_returnable(&state.client_request, &object.response, age, 0, config, true, object.need_revalidate_once) {
            header_builder::insert_warning_111(&mut state.client_response, &mut state.via);
            state.via.set(IDX_PROXY_RESULT, VIA_IN_CACHE_STALE);
            return Directive::terminal(NextAction::ServeFromCache);
        }
    }

    header_builder::issue_revalidate(&mut state.server_request, &object, false);
    how_to_open_connection(state, config, collaborators)
}

/// **HandleCacheOpenReadMiss**: prepare-to-write if cacheable, reject
/// only-if-cached requests with 504, else select an upstream.
pub fn handle_cache_open_read_miss(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    if cacheability::client_requested_only_if_cached(&state.client_request) {
        return send_error(state, ErrorKind::OriginDown, None);
    }
    let method_writes_cache = matches!(
        state.client_request.method.as_ref(),
        Some(&Method::GET) | Some(&Method::HEAD)
    );
    if method_writes_cache && state.cache_info.action == Some(CacheAction::Lookup) {
        state.cache_info.action = Some(CacheAction::PrepareToWrite);
    }
    how_to_open_connection(state, config, collaborators)
}

/// **handle_cache_write_lock**: resolve PREPARE_TO_* into a terminal
/// cache action, or apply the configured write-lock failure recovery.
pub fn handle_cache_write_lock(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(url) = state.cache_info.lookup_url.clone() else {
        return how_to_open_connection(state, config, collaborators);
    };
    let mode = match state.cache_info.action {
        Some(CacheAction::PrepareToWrite) => WriteMode::Write,
        Some(CacheAction::PrepareToUpdate) => WriteMode::Update,
        Some(CacheAction::PrepareToDelete) => WriteMode::Delete,
        _ => return how_to_open_connection(state, config, collaborators),
    };
    let result = collaborators.cache().open_write(&url, mode);
    state.cache_info.write_lock_state = Some(result);

    match result {
        WriteLockState::Success => {
            state.cache_info.action = Some(match mode {
                WriteMode::Write => CacheAction::Write,
                WriteMode::Update => CacheAction::Update,
                WriteMode::Delete => CacheAction::Delete,
            });
            how_to_open_connection(state, config, collaborators)
        }
        WriteLockState::ReadRetry => Directive::new(NextAction::CacheLookup, Some(handle_cache_open_read)),
        WriteLockState::Fail | WriteLockState::Init => {
            header_builder::strip_conditional_headers_for_plain_request(
                &mut state.server_request,
                false,
                false,
                config,
            );
            match config.write_lock_failure_policy {
                WriteLockFailurePolicy::ErrorOnMiss if mode == WriteMode::Write => {
                    send_error(state, ErrorKind::OriginDown, None)
                }
                WriteLockFailurePolicy::ErrorOnMissOrRevalidate => {
                    send_error(state, ErrorKind::OriginDown, None)
                }
                WriteLockFailurePolicy::ErrorOnMissStaleOnRevalidate if mode == WriteMode::Write => {
                    send_error(state, ErrorKind::OriginDown, None)
                }
                _ => {
                    state.cache_info.action = Some(CacheAction::NoAction);
                    how_to_open_connection(state, config, collaborators)
                }
            }
        }
    }
}

fn mark_connect_outcome(state: &mut State, byte: u8) {
    state.via.set(IDX_SERVER_CONNECT, byte);
}

/// **HandleResponse**: validate the response, split by upstream.
pub fn handle_response(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    match state.current.active_server {
        ActiveServer::Parent => handle_response_from_parent(state, config, collaborators),
        ActiveServer::Server => handle_response_from_server(state, config, collaborators),
    }
}

/// **handle_response_from_parent**.
pub fn handle_response_from_parent(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let outcome = state.current.state;
    if outcome.is_response_valid() {
        if state.current.retry_attempts > 0 {
            if let Some(hostname) = state.parent_result.hostname.clone() {
                next_hop::mark(collaborators, &hostname, state.parent_result.port.unwrap_or(0), MarkAction::MarkUp);
            }
        }
        state.via.set(IDX_PARENT_CONNECT, VIA_PARENT_SUCCESS);
        mark_connect_outcome(state, VIA_SERVER_CONNECT_SUCCESS);
        return handle_forward_server_connection_open(state, config, collaborators);
    }

    let retry_kind = collaborators
        .next_hop_strategy()
        .map(|s| s.response_is_retryable(state.server_response.status.unwrap_or(StatusCode::BAD_GATEWAY)))
        .unwrap_or(crate::collaborators::RetryKind::None);
    let retry_type = next_hop::classify_retry(retry_kind, &state.current, &config.next_hop, 1);
    if retry_type != RetryType::None {
        let is_timeout = matches!(outcome, ConnectionOutcome::ActiveTimeout | ConnectionOutcome::InactiveTimeout);
        let exhausted = next_hop::record_attempt(&mut state.current, retry_type, &config.next_hop);
        if exhausted {
            if next_hop::should_mark_down(is_timeout, &config.next_hop) {
                if let Some(hostname) = state.parent_result.hostname.clone() {
                    next_hop::mark(collaborators, &hostname, state.parent_result.port.unwrap_or(0), MarkAction::MarkDown);
                }
            }
            let lookup_name = state.dns_info.lookup_name.clone().unwrap_or_default();
            state.parent_result = next_hop::find_next_hop(collaborators, &lookup_name, state);
        }
    }

    if next_hop::parent_attempts_exhausted(&state.current, &config.next_hop) {
        state.via.set(IDX_PARENT_CONNECT, VIA_PARENT_FAIL_TO_DIRECT);
        if let Some(object) = state.cache_info.object_read.clone() {
            if cacheability::is_stale_cache_response_returnable(&state.client_request, &object.response, 0, 0, config, true, object.need_revalidate_once) {
                header_builder::insert_warning_111(&mut state.client_response, &mut state.via);
                return Directive::terminal(NextAction::ServeFromCache);
            }
        }
        return send_error(state, ErrorKind::OriginDown, None);
    }
    Directive::new(NextAction::OriginServerOpen, Some(handle_response))
}

/// **handle_response_from_server**.
pub fn handle_response_from_server(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let outcome = state.current.state;
    if outcome.is_response_valid() {
        mark_connect_outcome(state, VIA_SERVER_CONNECT_SUCCESS);
        return handle_forward_server_connection_open(state, config, collaborators);
    }

    mark_connect_outcome(state, VIA_SERVER_CONNECT_FAILURE);
    if outcome == ConnectionOutcome::ActiveTimeout {
        return send_error(state, ErrorKind::ActiveTimeout, None);
    }
    if outcome == ConnectionOutcome::OutboundCongestion {
        return send_error(state, ErrorKind::NextHopCongested, Some(30));
    }

    let negative_cached = state.cache_info.object_read.as_ref().map(|o| o.is_negative).unwrap_or(false);
    let max_retries = if negative_cached {
        config.next_hop.connect_attempts_max_retries_down_server
    } else {
        config.next_hop.connect_attempts_max_retries
    };

    if state.client_info.is_transparent && !state.dns_info.active {
        let fallback = next_hop::transparent_dns_fallback(state.client_info.is_transparent, state.dns_info.active);
        if fallback == next_hop::DnsFallback::RetryViaHostDb {
            state.dns_info.active = true;
            return Directive::new(NextAction::DnsLookup, Some(os_dns_lookup));
        }
    }

    if state.current.retry_attempts < max_retries {
        state.current.retry_attempts += 1;
        return Directive::new(NextAction::OriginServerOpen, Some(handle_response));
    }

    if let Some(object) = state.cache_info.object_read.clone() {
        if cacheability::is_stale_cache_response_returnable(&state.client_request, &object.response, 0, 0, config, true, object.need_revalidate_once) {
            header_builder::insert_warning_111(&mut state.client_response, &mut state.via);
            return Directive::terminal(NextAction::ServeFromCache);
        }
    }
    send_error(state, ErrorKind::ConnectFailed, None)
}

fn is_redirect_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Resolve a `Location` header value against the request URI it was sent for: an
/// absolute URI is used as-is, a relative one is rebuilt onto the current
/// scheme/authority.
fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    if let Ok(absolute) = location.parse::<Uri>() {
        if absolute.scheme().is_some() {
            return Some(absolute);
        }
    }
    let mut parts = current.clone().into_parts();
    parts.path_and_query = Some(location.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Intercept a 3xx/`Location` response and restart the transaction at DNS/cache
/// lookup against the redirect target, bounded by `config.remap.max_redirects`.
/// `None` means the response should fall through to normal cache-operation handling
/// (including when redirect-following is disabled, the default).
fn try_restart_redirect(state: &mut State, config: &OverridableConfig) -> Option<Directive> {
    if config.remap.max_redirects == 0 {
        return None;
    }
    let status = state.server_response.status.unwrap_or(StatusCode::OK);
    if !is_redirect_status(status) {
        return None;
    }
    let location = state.server_response.get_str("location")?;
    let current = state.client_request.uri.clone()?;
    let new_uri = resolve_location(&current, location)?;

    if !state.redirect_info.redirect_in_process {
        state.redirect_info.redirect_in_process = true;
        state.redirect_info.number_of_redirections_remaining = config.remap.max_redirects;
    }
    if state.redirect_info.number_of_redirections_remaining == 0 {
        return Some(send_error(state, ErrorKind::RedirectLoop, None));
    }
    state.redirect_info.number_of_redirections_remaining -= 1;

    state.client_request.uri = Some(new_uri.clone());
    if let Some(host) = new_uri.host() {
        let scheme = new_uri.scheme_str().unwrap_or("http");
        let port = new_uri.port_u16().unwrap_or_else(|| default_port_for_scheme(scheme));
        let host_value = header_builder::host_header_value(host, port, scheme);
        if let Ok(hv) = HeaderValue::from_str(&host_value) {
            state.client_request.insert(HeaderName::from_static("host"), hv);
        }
    }

    state.dns_info.resolved_p = false;
    state.dns_info.lookup_name = new_uri.host().map(str::to_string);
    state.parent_result = crate::state::ParentResult::default();
    state.current.retry_attempts = 0;
    state.current.simple_retry_attempts = 0;
    state.current.unavailable_server_retry_attempts = 0;

    let lookupable = cacheability::is_request_cache_lookupable(
        &state.client_request,
        matches!(state.current.mode, crate::state::TransactionMode::Tunnelling),
        true,
        false,
        config,
        &mut state.via,
    );
    Some(if lookupable {
        state.cache_info.action = Some(CacheAction::Lookup);
        state.cache_info.lookup_url = Some(new_uri);
        Directive::new(NextAction::CacheLookup, Some(handle_cache_open_read))
    } else {
        Directive::new(NextAction::DnsLookup, Some(os_dns_lookup))
    })
}

/// **handle_forward_server_connection_open**: swallow/forward interim
/// 1xx, restart on a bounded redirect, else classify the final response against the
/// pending cache action.
pub fn handle_forward_server_connection_open(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let status = state.server_response.status.unwrap_or(StatusCode::OK);
    if status == StatusCode::CONTINUE || status.as_u16() == 103 {
        let expects_continue = state
            .client_request
            .get_str("expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);
        if state.client_request.version >= Version::HTTP_11 && expects_continue {
            state.client_response = state.server_response.clone();
            return Directive::terminal(NextAction::Internal100Response);
        }
        return Directive::new(NextAction::ServerRead, Some(handle_forward_server_connection_open));
    }

    if let Some(directive) = try_restart_redirect(state, config) {
        return directive;
    }

    if state.cache_info.action.map(CacheAction::is_terminal_write).unwrap_or(false)
        || state.cache_info.action.map(CacheAction::is_prepare).unwrap_or(false)
    {
        handle_cache_operation_on_forward_server_response(state, config, collaborators)
    } else {
        handle_no_cache_operation_on_forward_server_response(state, config, collaborators)
    }
}

/// **handle_cache_operation_on_forward_server_response**: the largest
/// sub-decision — 304 merge/delete, 505 downgrade, negative-revalidation, or plain
/// write/replace/delete per method safety.
pub fn handle_cache_operation_on_forward_server_response(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let status = state.server_response.status.unwrap_or(StatusCode::OK);

    if status == StatusCode::HTTP_VERSION_NOT_SUPPORTED && state.server_info.http_version != Some(Version::HTTP_10) {
        state.server_request.version = Version::HTTP_10;
        state.server_info.http_version = Some(Version::HTTP_10);
        return Directive::new(NextAction::OriginServerOpen, Some(handle_response));
    }

    if status == StatusCode::NOT_MODIFIED {
        let Some(object) = state.cache_info.object_store.clone().or_else(|| state.cache_info.object_read.clone()) else {
            return handle_no_cache_operation_on_forward_server_response(state, config, collaborators);
        };
        match state.cache_info.action {
            Some(CacheAction::Update) => {
                let mut merged = (*object).clone();
                header_builder::merge_304_headers(&mut merged.response, &state.server_response);
                header_builder::clear_warnings(&mut merged.response);
                if cacheability::is_response_cacheable(&state.client_request, &merged.response, true, false, config, &mut state.via) {
                    collaborators.cache().update_headers(std::sync::Arc::new(merged.clone()));
                    state.client_response = merged.response;
                    state.via.set(IDX_PROXY_RESULT, VIA_IN_CACHE_RWW_HIT);
                    Directive::terminal(NextAction::InternalCacheUpdateHeaders)
                } else {
                    collaborators.cache().delete(&merged.lookup_url);
                    Directive::terminal(NextAction::InternalCacheDelete)
                }
            }
            Some(CacheAction::Delete) => {
                collaborators.cache().delete(&object.lookup_url);
                state.client_response = state.server_response.clone();
                Directive::terminal(NextAction::InternalCacheDelete)
            }
            _ => handle_no_cache_operation_on_forward_server_response(state, config, collaborators),
        }
    } else if status.is_server_error()
        && config.negative_revalidation.enabled
        && config.negative_revalidation.statuses.contains(&status.as_u16())
    {
        let Some(object) = state.cache_info.object_read.clone() else {
            return handle_no_cache_operation_on_forward_server_response(state, config, collaborators);
        };
        if !object.is_negative {
            let age = freshness::current_age(
                object.request_sent_time, object.response_received_time,
                object.response.get_str("date").and_then(freshness::parse_http_date),
                state.current.now, config,
            );
            if cacheability::is_stale_cache_response_returnable(&state.client_request, &object.response, age, 0, config, true, object.need_revalidate_once) {
                let mut negative = (*object).clone();
                negative.is_negative = true;
                negative.need_revalidate_once = true;
                negative.response_received_time = state.current.now;
                header_builder::bump_expires(&mut negative.response, state.current.now, config.negative_revalidation.lifetime);
                header_builder::clear_warnings(&mut negative.response);
                collaborators.cache().update_headers(std::sync::Arc::new(negative.clone()));
                state.client_response = negative.response;
                state.via.set(IDX_PROXY_RESULT, VIA_IN_CACHE_STALE);
                return Directive::terminal(NextAction::InternalCacheUpdateHeaders);
            }
        }
        handle_no_cache_operation_on_forward_server_response(state, config, collaborators)
    } else {
        let method_invalidates = matches!(
            state.client_request.method.as_ref(),
            Some(&Method::PUT) | Some(&Method::POST) | Some(&Method::DELETE)
        );
        if status.is_server_error() || status.is_client_error() {
            if method_invalidates {
                if let Some(url) = state.cache_info.lookup_url.clone() {
                    collaborators.cache().delete(&url);
                }
                return Directive::terminal(NextAction::InternalCacheDelete);
            }
            state.cache_info.action = Some(CacheAction::NoAction);
            return handle_no_cache_operation_on_forward_server_response(state, config, collaborators);
        }

        let cacheable = cacheability::is_response_cacheable(&state.client_request, &state.server_response, true, false, config, &mut state.via);
        if !cacheable {
            if let Some(url) = state.cache_info.lookup_url.clone() {
                collaborators.cache().delete(&url);
            }
            state.client_response = state.server_response.clone();
            return Directive::terminal(NextAction::InternalCacheDelete);
        }
        let next_action = match state.cache_info.action {
            Some(CacheAction::Update) => NextAction::CacheIssueUpdate,
            _ => NextAction::CacheIssueWrite,
        };
        state.client_response = state.server_response.clone();
        Directive::terminal(next_action)
    }
}

/// **handle_no_cache_operation_on_forward_server_response**: plain
/// pass-through; 200 for CONNECT tunnels; 505 still downgrades; a 101 to a
/// WebSocket upgrade tunnels too, subject to the configured connection cap.
pub fn handle_no_cache_operation_on_forward_server_response(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let status = state.server_response.status.unwrap_or(StatusCode::OK);

    if status == StatusCode::HTTP_VERSION_NOT_SUPPORTED && state.server_info.http_version != Some(Version::HTTP_10) {
        state.server_request.version = Version::HTTP_10;
        state.server_info.http_version = Some(Version::HTTP_10);
        return Directive::new(NextAction::OriginServerOpen, Some(handle_response));
    }

    if state.client_request.method == Some(Method::CONNECT) && status == StatusCode::OK {
        state.current.mode = crate::state::TransactionMode::Tunnelling;
        return Directive::terminal(NextAction::SslTunnel);
    }

    if status == StatusCode::SWITCHING_PROTOCOLS
        && header_builder::requested_upgrade_token(&state.client_request) == Some("websocket")
    {
        let active = collaborators.connection_limits().active_websocket_connections();
        if active >= config.header_policy.max_websocket_connections {
            log::warn!("transaction {} rejected WebSocket upgrade: {active} active connections at the configured limit", state.id);
            return send_error(state, ErrorKind::WebSocketLimitExceeded, None);
        }
        state.current.mode = crate::state::TransactionMode::Tunnelling;
        return Directive::terminal(NextAction::SslTunnel);
    }

    state.client_response = state.server_response.clone();
    if let Some(decision) = header_builder::decide_range_response(
        state.client_request.get_str("range"),
        state.server_response.get_str("content-length").and_then(|v| v.parse::<u64>().ok()),
    ) {
        state.range_info.setup = Some(match decision {
            header_builder::BodyLengthDecision::RangeNotSatisfiable { .. } => RangeSetup::NotSatisfiable,
            _ => RangeSetup::Requested,
        });
        header_builder::apply_body_length_decision(&mut state.client_response, decision);
    }
    let now_age = 0;
    header_builder::insert_age(&mut state.client_response, now_age);
    let decision = header_builder::decide_keep_alive(
        state.client_request.version,
        state.client_request.get_str("connection").map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false),
        state.server_response.has("content-length") || state.server_response.has("transfer-encoding"),
    );
    header_builder::apply_keep_alive(&mut state.client_response, &state.client_request, decision);
    Directive::terminal(NextAction::ServerRead)
}

/// **HandlePushError**: abort a PUSH that failed to validate.
pub fn handle_push_error(state: &mut State, _config: &OverridableConfig, _collaborators: &dyn Collaborators) -> Directive {
    send_error(state, ErrorKind::BadResponse, None)
}

/// **HandlePushTunnelSuccess**: a PUSH body was written into cache.
pub fn handle_push_tunnel_success(state: &mut State, _config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let replacing = state.cache_info.action == Some(CacheAction::Update);
    if let Some(object) = state.cache_info.object_store.clone() {
        collaborators.cache().update_headers(object);
    }
    state.client_response = crate::headers::HeaderSet::new_response(
        if replacing { StatusCode::OK } else { StatusCode::CREATED },
        state.client_request.version,
    );
    Directive::terminal(NextAction::StorePushBody)
}

/// **HandleUpdateCachedObject / Continue**: a plugin-initiated
/// header-only update, no origin contact.
pub fn handle_update_cached_object(state: &mut State, config: &OverridableConfig, collaborators: &dyn Collaborators) -> Directive {
    let Some(object) = state.cache_info.object_read.clone() else {
        return Directive::terminal(NextAction::InternalCacheNoop);
    };
    let mut merged = (*object).clone();
    header_builder::merge_304_headers(&mut merged.response, &state.client_response);
    if cacheability::is_response_cacheable(&state.client_request, &merged.response, true, false, config, &mut state.via) {
        collaborators.cache().update_headers(std::sync::Arc::new(merged));
        Directive::terminal(NextAction::InternalCacheUpdateHeaders)
    } else {
        Directive::terminal(NextAction::InternalCacheNoop)
    }
}

fn default_request_uri() -> Uri {
    Uri::from_static("/")
}
