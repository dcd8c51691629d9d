//! The transaction data model: a single flat `State` record, mutated in
//! place by successive Director handler invocations. Design Notes §9 permits modeling
//! the transaction as a tagged union of per-phase states instead; this crate keeps a
//! flat-record shape because the Director's handlers are free functions of
//! `&mut State`, not methods dispatched on a state enum, and a flat record is what lets
//! every component (A–E) read the exact same field set without per-phase projection.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::SystemTime;

use http::{Uri, Version};
use uuid::Uuid;

use crate::config::OverridableConfig;
use crate::headers::HeaderSet;
use crate::via::ViaString;

/// Unique id for a transaction, and (when generated once per process) the proxy's own
/// loop-detection identity consulted by [`crate::next_hop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `cache_info.action` sum type. No terminal action (`Write`/`Update`/
/// `Replace`/`Delete`) may be set without having passed through its `PrepareTo*`
/// counterpart and obtained a write lock, enforced by [`crate::director`] rather than
/// by this type (a plain enum can't encode a state-transition history).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    NoAction,
    Lookup,
    Write,
    Update,
    Delete,
    Replace,
    Serve,
    ServeAndUpdate,
    ServeAndDelete,
    PrepareToWrite,
    PrepareToUpdate,
    PrepareToDelete,
}

impl CacheAction {
    /// True for the `PrepareTo*` variants.
    pub fn is_prepare(self) -> bool {
        matches!(
            self,
            CacheAction::PrepareToWrite | CacheAction::PrepareToUpdate | CacheAction::PrepareToDelete
        )
    }

    /// True for the terminal write-family variants that must be preceded by a prepare step.
    pub fn is_terminal_write(self) -> bool {
        matches!(
            self,
            CacheAction::Write | CacheAction::Update | CacheAction::Replace | CacheAction::Delete
        )
    }
}

/// `write_lock_state` result from the cache subsystem's `open_write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLockState {
    Success,
    Fail,
    ReadRetry,
    Init,
}

impl Default for WriteLockState {
    fn default() -> Self {
        WriteLockState::Init
    }
}

/// The last observed connection outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Alive,
    Error,
    Closed,
    ParseError,
    InactiveTimeout,
    ActiveTimeout,
    OpenRawError,
    BadIncomingResponse,
    OutboundCongestion,
    ParentRetry,
    Undefined,
}

impl ConnectionOutcome {
    /// Any non-`Alive` state means the response is invalid.
    pub fn is_response_valid(self) -> bool {
        matches!(self, ConnectionOutcome::Alive)
    }
}

/// `current.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Generic,
    Tunnelling,
    Static,
}

/// Retry policy classification driven by [`crate::next_hop::response_is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryType {
    None,
    Simple,
    UnavailableServer,
    Both,
}

/// `dns_info.looking_up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsLookingUp {
    OriginServer,
    ParentProxy,
    HostNone,
    Undefined,
}

/// `dns_info.os_addr_style`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsAddrStyle {
    TryClient,
    TryHostdb,
    UseClient,
    UseHostdb,
    UseApi,
}

/// Parent-selection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentResultCode {
    Undefined,
    Specified,
    Direct,
    Fail,
}

/// `range_info.setup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSetup {
    None,
    Requested,
    NotHandled,
    NotSatisfiable,
    NotTransformRequested,
}

/// Which of `server_info`/`parent_info` is the active upstream target
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveServer {
    Server,
    Parent,
}

/// Connection attributes tracked per endpoint.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub addr: Option<SocketAddr>,
    pub http_version: Option<Version>,
    pub keep_alive: bool,
    pub chunked_encoding: bool,
    pub last_connect_error: Option<ConnectionOutcome>,
    pub src_addr: Option<SocketAddr>,
    /// True when this port was reached through a transparently-intercepted connection
    /// whose destination address came from the client (the client target address).
    pub is_transparent: bool,
}

/// A read-only, cache-subsystem-owned cached response.
#[derive(Debug, Clone)]
pub struct CachedObject {
    /// The URL this object is stored under; carried on the object itself because
    /// `update_headers(object)` takes no separate key.
    pub lookup_url: Uri,
    pub response: HeaderSet,
    pub request_sent_time: SystemTime,
    pub response_received_time: SystemTime,
    pub object_size: u64,
    /// Set when this entry was stored from a negative-cached (error) upstream response
    ///.
    pub is_negative: bool,
    /// Set while `handle_cache_operation_on_forward_server_response`'s negative
    /// revalidation path is still pending its one bounded re-check.
    pub need_revalidate_once: bool,
}

/// Cache info.
#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    pub action: Option<CacheAction>,
    pub lookup_url: Option<Uri>,
    pub object_read: Option<Arc<CachedObject>>,
    pub object_store: Option<Arc<CachedObject>>,
    pub write_lock_state: Option<WriteLockState>,
    pub hit_miss_code: u8,
    pub lookup_result: Option<bool>,
}

/// DNS info.
#[derive(Debug, Clone)]
pub struct DnsInfo {
    pub looking_up: DnsLookingUp,
    pub lookup_name: Option<String>,
    pub resolved_p: bool,
    pub addr: Option<IpAddr>,
    pub srv_port: Option<u16>,
    pub record: Option<String>,
    pub active: bool,
    pub os_addr_style: OsAddrStyle,
}

impl Default for DnsInfo {
    fn default() -> Self {
        DnsInfo {
            looking_up: DnsLookingUp::Undefined,
            lookup_name: None,
            resolved_p: false,
            addr: None,
            srv_port: None,
            record: None,
            active: false,
            os_addr_style: OsAddrStyle::TryClient,
        }
    }
}

impl DnsInfo {
    /// `resolved_p = true` implies `addr` is routable.
    pub fn check_invariant(&self) -> bool {
        !self.resolved_p || self.addr.is_some()
    }
}

/// Parent selection result.
#[derive(Debug, Clone, Default)]
pub struct ParentResult {
    pub result: ParentResultCodeHolder,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub retry: bool,
    pub retry_type: RetryType,
}

/// Wrapper so `ParentResult` can `#[derive(Default)]` while `ParentResultCode` has no
/// natural zero value other than `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentResultCodeHolder(pub ParentResultCode);

impl Default for ParentResultCodeHolder {
    fn default() -> Self {
        ParentResultCodeHolder(ParentResultCode::Undefined)
    }
}

impl Default for RetryType {
    fn default() -> Self {
        RetryType::None
    }
}

/// Redirect info.
#[derive(Debug, Clone, Default)]
pub struct RedirectInfo {
    pub redirect_in_process: bool,
    pub original_url: Option<Uri>,
    pub number_of_redirections_remaining: u32,
}

/// Range info.
#[derive(Debug, Clone, Default)]
pub struct RangeInfo {
    pub setup: Option<RangeSetup>,
    pub range_output_cl: Option<u64>,
    pub ranges: Vec<(u64, u64)>,
}

/// `current` group.
#[derive(Debug, Clone)]
pub struct Current {
    pub state: ConnectionOutcome,
    pub active_server: ActiveServer,
    pub mode: TransactionMode,
    pub retry_type: RetryType,
    pub simple_retry_attempts: u32,
    pub unavailable_server_retry_attempts: u32,
    pub retry_attempts: u32,
    pub now: SystemTime,
}

impl Default for Current {
    fn default() -> Self {
        Current {
            state: ConnectionOutcome::Undefined,
            active_server: ActiveServer::Server,
            mode: TransactionMode::Generic,
            retry_type: RetryType::None,
            simple_retry_attempts: 0,
            unavailable_server_retry_attempts: 0,
            retry_attempts: 0,
            now: SystemTime::now(),
        }
    }
}

/// The runtime action codes the surrounding SM dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    ApiPreRemap,
    RemapRequest,
    ApiPostRemap,
    ApiReadRequestHdr,
    PostRemapSkip,
    CacheLookup,
    CacheIssueWrite,
    CacheIssueWriteTransform,
    CacheIssueUpdate,
    CachePrepareUpdate,
    ApiCacheLookupComplete,
    DnsLookup,
    DnsReverseLookup,
    ApiOsDns,
    OriginServerOpen,
    OriginServerRawOpen,
    ServerRead,
    ServeFromCache,
    SendErrorCacheNoop,
    InternalCacheNoop,
    InternalCacheDelete,
    InternalCacheUpdateHeaders,
    InternalCacheWrite,
    Internal100Response,
    ServerParseNextHdr,
    SslTunnel,
    ReadPushHdr,
    StorePushBody,
    TransformRead,
    WaitForFullBody,
    RequestBufferReadComplete,
}

/// A Director handler: a pure function of `State`, given the
/// transaction's overridable config and the collaborator trait objects it may consult.
pub type Handler =
    fn(&mut State, &OverridableConfig, &dyn crate::collaborators::Collaborators) -> Directive;

/// The two-field record a handler returns to tell the surrounding SM what to do next
/// and, if the transaction isn't finished, which handler to re-enter with (Design Notes §9).
#[derive(Clone, Copy)]
pub struct Directive {
    pub next_action: NextAction,
    /// The handler the SM must re-enter once the corresponding I/O completes.
    /// `None` for a terminal action.
    pub continuation: Option<Handler>,
}

impl std::fmt::Debug for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directive")
            .field("next_action", &self.next_action)
            .field("continuation", &self.continuation.map(|h| h as usize))
            .finish()
    }
}

impl Directive {
    pub fn new(next_action: NextAction, continuation: Option<Handler>) -> Self {
        Directive {
            next_action,
            continuation,
        }
    }

    /// A terminal directive: the SM performs `next_action` and does not re-enter the core.
    pub fn terminal(next_action: NextAction) -> Self {
        Directive {
            next_action,
            continuation: None,
        }
    }
}

/// The flat transaction record.
pub struct State {
    pub id: TransactionId,
    pub via: ViaString,

    pub client_request: HeaderSet,
    pub server_request: HeaderSet,
    pub server_response: HeaderSet,
    pub client_response: HeaderSet,

    pub cache_info: CacheInfo,

    pub client_info: ConnectionInfo,
    pub server_info: ConnectionInfo,
    pub parent_info: ConnectionInfo,

    pub current: Current,
    pub dns_info: DnsInfo,
    pub parent_result: ParentResult,
    pub redirect_info: RedirectInfo,
    pub range_info: RangeInfo,

    pub next_action: NextAction,
    pub transact_return_point: Option<Handler>,
}

impl State {
    /// Start a new transaction from a parsed client request.
    pub fn new(client_request: HeaderSet) -> Self {
        State {
            id: TransactionId::new(),
            via: ViaString::default(),
            client_request,
            server_request: HeaderSet::default(),
            server_response: HeaderSet::default(),
            client_response: HeaderSet::default(),
            cache_info: CacheInfo::default(),
            client_info: ConnectionInfo::default(),
            server_info: ConnectionInfo::default(),
            parent_info: ConnectionInfo::default(),
            current: Current::default(),
            dns_info: DnsInfo::default(),
            parent_result: ParentResult::default(),
            redirect_info: RedirectInfo::default(),
            range_info: RangeInfo::default(),
            next_action: NextAction::ApiReadRequestHdr,
            transact_return_point: None,
        }
    }

    /// `current.server` always points at the active upstream.
    pub fn active_server(&self) -> &ConnectionInfo {
        match self.current.active_server {
            ActiveServer::Server => &self.server_info,
            ActiveServer::Parent => &self.parent_info,
        }
    }

    pub fn active_server_mut(&mut self) -> &mut ConnectionInfo {
        match self.current.active_server {
            ActiveServer::Server => &mut self.server_info,
            ActiveServer::Parent => &mut self.parent_info,
        }
    }

    /// Apply a `Directive` returned by a handler: write
    /// `next_action`/`transact_return_point`.
    pub fn apply(&mut self, directive: Directive) {
        self.next_action = directive.next_action;
        self.transact_return_point = directive.continuation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn sample_state() -> State {
        State::new(HeaderSet::new_request(
            Method::GET,
            "http://example.com/a".parse().unwrap(),
            Version::HTTP_11,
        ))
    }

    #[test]
    fn active_server_defaults_to_server_info() {
        let mut state = sample_state();
        state.server_info.addr = Some("10.0.0.1:80".parse().unwrap());
        assert_eq!(state.active_server().addr, state.server_info.addr);
    }

    #[test]
    fn active_server_switches_to_parent_info() {
        let mut state = sample_state();
        state.current.active_server = ActiveServer::Parent;
        state.parent_info.addr = Some("10.0.0.2:3128".parse().unwrap());
        assert_eq!(state.active_server().addr, state.parent_info.addr);
    }

    #[test]
    fn cache_action_prepare_classification() {
        assert!(CacheAction::PrepareToWrite.is_prepare());
        assert!(!CacheAction::Write.is_prepare());
        assert!(CacheAction::Write.is_terminal_write());
    }

    #[test]
    fn dns_invariant_requires_addr_when_resolved() {
        let mut dns = DnsInfo::default();
        dns.resolved_p = true;
        assert!(!dns.check_invariant());
        dns.addr = Some("10.0.0.1".parse().unwrap());
        assert!(dns.check_invariant());
    }

    #[test]
    fn connection_outcome_validity() {
        assert!(ConnectionOutcome::Alive.is_response_valid());
        assert!(!ConnectionOutcome::ActiveTimeout.is_response_valid());
    }
}
