//! In-memory test doubles for the [`crate::collaborators`] traits. Lets unit and
//! scenario tests drive the Director without a real DNS resolver, cache store, or
//! parent table, using plain mock structs rather than an async test harness.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use http::{StatusCode, Uri, Version};
use uuid::Uuid;

use crate::collaborators::{
    BodyFactory, CacheLookupResult, CacheStore, Collaborators, ConnectionLimits, DnsAnswer,
    DnsResolver, FabricatedBody, HostDb, IpFamily, MachineIdentity, MarkAction, NextHopStrategy,
    ParentSelector, RetryKind, WriteMode,
};
use crate::state::{CachedObject, ParentResult, State, WriteLockState};

/// A scripted DNS resolver: returns a fixed answer for every lookup.
#[derive(Default)]
pub struct MockDns {
    pub answer: Mutex<DnsAnswer>,
}

impl MockDns {
    pub fn resolving(addr: IpAddr) -> Self {
        MockDns {
            answer: Mutex::new(DnsAnswer {
                addr: Some(addr),
                srv_port: None,
                record: None,
                failed_p: false,
            }),
        }
    }

    pub fn failing() -> Self {
        MockDns {
            answer: Mutex::new(DnsAnswer {
                failed_p: true,
                ..Default::default()
            }),
        }
    }
}

impl DnsResolver for MockDns {
    fn lookup(&self, _name: &str, _family_preference: IpFamily) -> DnsAnswer {
        self.answer.lock().unwrap().clone()
    }
}

/// A HostDB double tracking mark-up calls and a fixed set of recorded failures.
#[derive(Default)]
pub struct MockHostDb {
    pub marked_up: Mutex<Vec<IpAddr>>,
    pub fail_times: Mutex<HashMap<IpAddr, SystemTime>>,
}

impl HostDb for MockHostDb {
    fn get_http_version(&self, _addr: IpAddr) -> Option<Version> {
        Some(Version::HTTP_11)
    }

    fn mark_up(&self, addr: IpAddr) {
        self.marked_up.lock().unwrap().push(addr);
    }

    fn last_fail_time(&self, addr: IpAddr) -> Option<SystemTime> {
        self.fail_times.lock().unwrap().get(&addr).copied()
    }
}

/// A parent-table double driven by a caller-supplied script of results.
#[derive(Default)]
pub struct MockParentSelector {
    pub find_result: Mutex<ParentResult>,
    pub marked_down: Mutex<Vec<String>>,
    pub marked_up: Mutex<Vec<String>>,
    pub exists: bool,
}

impl ParentSelector for MockParentSelector {
    fn find_parent(&self, _lookup_name: &str) -> ParentResult {
        self.find_result.lock().unwrap().clone()
    }

    fn next_parent(&self, _lookup_name: &str) -> ParentResult {
        self.find_result.lock().unwrap().clone()
    }

    fn mark_parent_up(&self, hostname: &str, _port: u16) {
        self.marked_up.lock().unwrap().push(hostname.to_string());
    }

    fn mark_parent_down(&self, hostname: &str, _port: u16) {
        self.marked_down.lock().unwrap().push(hostname.to_string());
    }

    fn parent_exists(&self, _lookup_name: &str) -> bool {
        self.exists
    }

    fn api_parent_exists(&self, _lookup_name: &str) -> bool {
        self.exists
    }
}

/// A scripted cache store backed by a `HashMap<Uri, CachedObject>`.
#[derive(Default)]
pub struct MockCache {
    pub objects: Mutex<HashMap<String, Arc<CachedObject>>>,
    pub write_lock_result: Mutex<WriteLockState>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockCache {
    pub fn with_object(url: &str, object: CachedObject) -> Self {
        let mut objects = HashMap::new();
        objects.insert(url.to_string(), Arc::new(object));
        MockCache {
            objects: Mutex::new(objects),
            write_lock_result: Mutex::new(WriteLockState::Success),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl CacheStore for MockCache {
    fn lookup(&self, url: &Uri) -> CacheLookupResult {
        let objects = self.objects.lock().unwrap();
        match objects.get(&url.to_string()) {
            Some(obj) => CacheLookupResult {
                hit: true,
                object_read: Some(obj.clone()),
                hit_miss_code: crate::via::VIA_IN_CACHE_FRESH,
                doc_busy: false,
            },
            None => CacheLookupResult {
                hit: false,
                object_read: None,
                hit_miss_code: crate::via::VIA_CACHE_MISS,
                doc_busy: false,
            },
        }
    }

    fn open_write(&self, _url: &Uri, _mode: WriteMode) -> WriteLockState {
        *self.write_lock_result.lock().unwrap()
    }

    fn update_headers(&self, object: Arc<CachedObject>) {
        let url = object.lookup_url.to_string();
        self.objects.lock().unwrap().insert(url, object);
    }

    fn delete(&self, url: &Uri) {
        self.deleted.lock().unwrap().push(url.to_string());
        self.objects.lock().unwrap().remove(&url.to_string());
    }
}

/// A body factory that always returns a fixed plain-text body.
pub struct MockBodyFactory;

impl BodyFactory for MockBodyFactory {
    fn fabricate(&self, template_name: &str, _state: &State) -> FabricatedBody {
        FabricatedBody {
            buf: format!("body for {template_name}").into_bytes(),
            content_type: "text/plain",
            language: None,
        }
    }
}

/// A fixed machine identity.
pub struct MockMachineIdentity {
    pub uuid: Uuid,
    pub addresses: Vec<IpAddr>,
}

impl Default for MockMachineIdentity {
    fn default() -> Self {
        MockMachineIdentity {
            uuid: Uuid::nil(),
            addresses: Vec::new(),
        }
    }
}

impl MachineIdentity for MockMachineIdentity {
    fn local_uuid(&self) -> Uuid {
        self.uuid
    }

    fn local_addresses(&self) -> &[IpAddr] {
        &self.addresses
    }
}

/// A next-hop strategy double; when `None` at construction the legacy
/// [`MockParentSelector`] path is exercised instead (mirrors the "pre-empts the legacy
/// parent-table codepath when present" rule in Design Notes §9).
pub struct MockNextHopStrategy {
    pub result: ParentResult,
    pub retry_kind: RetryKind,
    pub go_direct: bool,
}

impl NextHopStrategy for MockNextHopStrategy {
    fn find_next_hop(&self, _state: &State) -> ParentResult {
        self.result.clone()
    }

    fn mark_next_hop(&self, _hostname: &str, _action: MarkAction) {}

    fn next_hop_exists(&self, _state: &State) -> bool {
        true
    }

    fn response_is_retryable(&self, _status: StatusCode) -> RetryKind {
        self.retry_kind
    }

    fn parent_is_proxy(&self) -> bool {
        false
    }

    fn go_direct(&self) -> bool {
        self.go_direct
    }

    fn use_pristine(&self) -> bool {
        false
    }
}

/// A connection-limit double reporting a fixed, caller-set count.
#[derive(Default)]
pub struct MockConnectionLimits {
    pub active_websocket_connections: u32,
}

impl ConnectionLimits for MockConnectionLimits {
    fn active_websocket_connections(&self) -> u32 {
        self.active_websocket_connections
    }
}

/// Bundles every mock above into one [`Collaborators`] implementor.
pub struct MockCollaborators {
    pub dns: MockDns,
    pub host_db: MockHostDb,
    pub parent_selector: MockParentSelector,
    pub next_hop_strategy: Option<MockNextHopStrategy>,
    pub cache: MockCache,
    pub body_factory: MockBodyFactory,
    pub machine: MockMachineIdentity,
    pub connection_limits: MockConnectionLimits,
}

impl Default for MockCollaborators {
    fn default() -> Self {
        MockCollaborators {
            dns: MockDns::default(),
            host_db: MockHostDb::default(),
            parent_selector: MockParentSelector::default(),
            next_hop_strategy: None,
            cache: MockCache::default(),
            body_factory: MockBodyFactory,
            machine: MockMachineIdentity::default(),
            connection_limits: MockConnectionLimits::default(),
        }
    }
}

impl Collaborators for MockCollaborators {
    fn dns(&self) -> &dyn DnsResolver {
        &self.dns
    }

    fn host_db(&self) -> &dyn HostDb {
        &self.host_db
    }

    fn parent_selector(&self) -> &dyn ParentSelector {
        &self.parent_selector
    }

    fn next_hop_strategy(&self) -> Option<&dyn NextHopStrategy> {
        self.next_hop_strategy.as_ref().map(|s| s as &dyn NextHopStrategy)
    }

    fn cache(&self) -> &dyn CacheStore {
        &self.cache
    }

    fn body_factory(&self) -> &dyn BodyFactory {
        &self.body_factory
    }

    fn machine(&self) -> &dyn MachineIdentity {
        &self.machine
    }

    fn connection_limits(&self) -> &dyn ConnectionLimits {
        &self.connection_limits
    }
}
