//! Component D — Next-Hop Selector. Chooses origin vs parent, tracks
//! failures, drives the two retry counters, and detects proxy loops. Depends on
//! [`crate::collaborators::NextHopStrategy`]/[`crate::collaborators::ParentSelector`]
//! (the strategy pre-empts the legacy table when present, per Design Notes §9) and
//! [`crate::collaborators::HostDb`] for the transparent-CTA DNS fallback.

use std::net::{IpAddr, SocketAddr};

use http::StatusCode;
use uuid::Uuid;

use crate::collaborators::{Collaborators, MarkAction, RetryKind};
use crate::config::NextHopConfig;
use crate::headers::HeaderSet;
use crate::state::{Current, ParentResult, ParentResultCode, RetryType};

/// Fold a single [`RetryKind`] verdict plus the current attempt counters into a
/// [`RetryType`]: SIMPLE wins when both would apply, since a
/// simple-retryable response is by definition not also unavailable-retryable.
pub fn classify_retry(
    retry_kind: RetryKind,
    current: &Current,
    config: &NextHopConfig,
    num_parents: u32,
) -> RetryType {
    match retry_kind {
        RetryKind::Simple
            if current.simple_retry_attempts < config.max_simple_retries
                && current.simple_retry_attempts < num_parents =>
        {
            RetryType::Simple
        }
        RetryKind::UnavailableServer
            if current.unavailable_server_retry_attempts < config.max_unavailable_retries =>
        {
            RetryType::UnavailableServer
        }
        _ => RetryType::None,
    }
}

/// Whether a connect failure should invoke the collaborator's mark-down call
///: timeouts are gated by `enable_parent_timeout_markdowns`.
pub fn should_mark_down(is_timeout: bool, config: &NextHopConfig) -> bool {
    !is_timeout || config.enable_parent_timeout_markdowns
}

/// Apply a mark-down/mark-up call against whichever collaborator is active
/// (the [`crate::collaborators::NextHopStrategy`] pre-empts
/// [`crate::collaborators::ParentSelector`] when present).
pub fn mark(collaborators: &dyn Collaborators, hostname: &str, port: u16, action: MarkAction) {
    log::debug!("marking next hop {hostname}:{port} as {action:?}");
    if let Some(strategy) = collaborators.next_hop_strategy() {
        strategy.mark_next_hop(hostname, action);
        return;
    }
    match action {
        MarkAction::MarkUp => collaborators.parent_selector().mark_parent_up(hostname, port),
        MarkAction::MarkDown => collaborators.parent_selector().mark_parent_down(hostname, port),
    }
}

/// Bump the per-parent and per-transaction retry counters after a retryable failure,
/// returning `true` when this parent is now exhausted and next-parent selection must
/// run.
pub fn record_attempt(current: &mut Current, retry_type: RetryType, config: &NextHopConfig) -> bool {
    current.retry_attempts += 1;
    match retry_type {
        RetryType::Simple => current.simple_retry_attempts += 1,
        RetryType::UnavailableServer => current.unavailable_server_retry_attempts += 1,
        RetryType::Both => {
            current.simple_retry_attempts += 1;
            current.unavailable_server_retry_attempts += 1;
        }
        RetryType::None => {}
    }
    current.retry_attempts % config.per_parent_connect_attempts.max(1) == 0
}

/// Whether the total parent-attempt budget is exhausted.
pub fn parent_attempts_exhausted(current: &Current, config: &NextHopConfig) -> bool {
    current.simple_retry_attempts + current.unavailable_server_retry_attempts
        >= config.parent_connect_attempts
}

/// Advance the parent-result state machine by one step: UNDEFINED → SPECIFIED →
/// (retry or) SPECIFIED → FAIL → DIRECT (if `go_direct` and not API-forced) → origin.
pub fn advance_parent_result(
    _current_code: ParentResultCode,
    parent_found: bool,
    parents_exhausted: bool,
    config: &NextHopConfig,
    api_forced_no_direct: bool,
) -> ParentResultCode {
    if parent_found {
        return ParentResultCode::Specified;
    }
    if !parents_exhausted {
        return ParentResultCode::Fail;
    }
    if config.go_direct && !api_forced_no_direct {
        ParentResultCode::Direct
    } else {
        ParentResultCode::Fail
    }
}

/// Whether `host` is exempt from parent selection entirely.
pub fn is_localhost_bypass(host: &str) -> bool {
    host == "127.0.0.1" || host.eq_ignore_ascii_case("localhost")
}

/// Direct-loop detection: the chosen destination is this machine's own address on the
/// listening port.
pub fn is_direct_loop(dst: SocketAddr, local_addresses: &[IpAddr], listening_port: u16) -> bool {
    dst.port() == listening_port && local_addresses.contains(&dst.ip())
}

/// Count how many times `uuid` appears as a `Via:` header comment token — the
/// self-loop signal.
pub fn count_self_via_occurrences(request: &HeaderSet, uuid: Uuid) -> u32 {
    let needle = uuid.to_string();
    request
        .headers
        .get_all("via")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.matches(needle.as_str()).count() as u32)
        .sum()
}

/// Whether this request has cycled through this proxy more than `max_proxy_cycles`
/// times.
pub fn self_loop_detected(request: &HeaderSet, uuid: Uuid, max_proxy_cycles: u32) -> bool {
    count_self_via_occurrences(request, uuid) > max_proxy_cycles
}

/// Outcome of a transparent-mode origin DNS failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsFallback {
    RetryViaHostDb,
    CommitToCta,
}

/// Decide the transparent-CTA fallback step. `already_retried_via_hostdb` tracks
/// whether the one permitted HostDB re-resolution has already run for this
/// transaction; a second failure always commits to the CTA.
pub fn transparent_dns_fallback(is_transparent: bool, already_retried_via_hostdb: bool) -> DnsFallback {
    if is_transparent && !already_retried_via_hostdb {
        DnsFallback::RetryViaHostDb
    } else {
        DnsFallback::CommitToCta
    }
}

/// Ask whichever next-hop collaborator is active for the current parent result
///.
pub fn find_next_hop(
    collaborators: &dyn Collaborators,
    lookup_name: &str,
    state: &crate::state::State,
) -> ParentResult {
    if let Some(strategy) = collaborators.next_hop_strategy() {
        strategy.find_next_hop(state)
    } else {
        collaborators.parent_selector().find_parent(lookup_name)
    }
}
