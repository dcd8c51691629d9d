//! Trait boundary to everything the core does not own: DNS, HostDB,
//! parent selection, the cache subsystem, the error-body factory, and machine
//! identity. Every trait here is object-safe and consumed as `&dyn Trait`, and
//! [`Collaborators`] simply bundles references to one of each — interface
//! abstractions injected at SM construction, never singletons. The core never
//! constructs a collaborator or reaches for a process-wide registry; that belongs to
//! the surrounding SM, not this crate.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use http::{StatusCode, Uri, Version};
use uuid::Uuid;

use crate::state::{CachedObject, ParentResult, State, WriteLockState};

/// Address family preference passed to [`DnsResolver::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    Any,
    V4Only,
    V6Only,
}

/// Result of a DNS lookup.
#[derive(Debug, Clone, Default)]
pub struct DnsAnswer {
    pub addr: Option<IpAddr>,
    pub srv_port: Option<u16>,
    pub record: Option<String>,
    pub failed_p: bool,
}

/// `DNS resolver` collaborator.
pub trait DnsResolver: Send + Sync {
    fn lookup(&self, name: &str, family_preference: IpFamily) -> DnsAnswer;
}

/// `HostDB` collaborator: read-modify-read only.
pub trait HostDb: Send + Sync {
    fn get_http_version(&self, addr: IpAddr) -> Option<Version>;
    fn mark_up(&self, addr: IpAddr);
    fn last_fail_time(&self, addr: IpAddr) -> Option<SystemTime>;
}

/// Mark-up/mark-down action against a next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkAction {
    MarkUp,
    MarkDown,
}

/// Retry classification from `response_is_retryable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    None,
    Simple,
    UnavailableServer,
}

/// The legacy parent-table collaborator.
pub trait ParentSelector: Send + Sync {
    fn find_parent(&self, lookup_name: &str) -> ParentResult;
    fn next_parent(&self, lookup_name: &str) -> ParentResult;
    fn mark_parent_up(&self, hostname: &str, port: u16);
    fn mark_parent_down(&self, hostname: &str, port: u16);
    fn parent_exists(&self, lookup_name: &str) -> bool;
    fn api_parent_exists(&self, lookup_name: &str) -> bool;
}

/// The pluggable next-hop-strategy collaborator (Design Notes §9): when present, this
/// pre-empts [`ParentSelector`] entirely.
pub trait NextHopStrategy: Send + Sync {
    fn find_next_hop(&self, state: &State) -> ParentResult;
    fn mark_next_hop(&self, hostname: &str, action: MarkAction);
    fn next_hop_exists(&self, state: &State) -> bool;
    fn response_is_retryable(&self, status: StatusCode) -> RetryKind;
    fn parent_is_proxy(&self) -> bool;
    fn go_direct(&self) -> bool;
    fn use_pristine(&self) -> bool;
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Default)]
pub struct CacheLookupResult {
    pub hit: bool,
    pub object_read: Option<Arc<CachedObject>>,
    pub hit_miss_code: u8,
    /// Another writer holds this object.
    pub doc_busy: bool,
}

/// `open_write` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Write,
    Update,
    Delete,
}

/// The cache subsystem collaborator.
pub trait CacheStore: Send + Sync {
    fn lookup(&self, url: &Uri) -> CacheLookupResult;
    fn open_write(&self, url: &Uri, mode: WriteMode) -> WriteLockState;
    fn update_headers(&self, object: Arc<CachedObject>);
    fn delete(&self, url: &Uri);
}

/// A fabricated internal error body.
#[derive(Debug, Clone)]
pub struct FabricatedBody {
    pub buf: Vec<u8>,
    pub content_type: &'static str,
    pub language: Option<&'static str>,
}

/// The error-body-template collaborator.
pub trait BodyFactory: Send + Sync {
    fn fabricate(&self, template_name: &str, state: &State) -> FabricatedBody;
}

/// Machine identity collaborator: local uuid (loop detection) and local addresses
/// (self-match detection).
pub trait MachineIdentity: Send + Sync {
    fn local_uuid(&self) -> Uuid;
    fn local_addresses(&self) -> &[IpAddr];
}

/// Process-wide resource-limit accounting the core consults but never owns (the
/// surrounding SM is the one actually holding upgraded connections open).
pub trait ConnectionLimits: Send + Sync {
    /// Connections currently tunnelling as an upgraded (e.g. WebSocket) stream.
    fn active_websocket_connections(&self) -> u32;
}

/// Bundles one reference to each collaborator the Director needs. Implemented once by
/// the surrounding SM (or, in tests, by [`crate::mock::MockCollaborators`]) and passed
/// to every handler as `&dyn Collaborators`.
pub trait Collaborators: Send + Sync {
    fn dns(&self) -> &dyn DnsResolver;
    fn host_db(&self) -> &dyn HostDb;
    fn parent_selector(&self) -> &dyn ParentSelector;
    fn next_hop_strategy(&self) -> Option<&dyn NextHopStrategy>;
    fn cache(&self) -> &dyn CacheStore;
    fn body_factory(&self) -> &dyn BodyFactory;
    fn machine(&self) -> &dyn MachineIdentity;
    fn connection_limits(&self) -> &dyn ConnectionLimits;
}
