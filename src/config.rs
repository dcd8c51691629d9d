//! Configuration tunables for the decision core.
//!
//! `serde`-derived structs, `validator`-checked at load time, parsed from YAML with
//! `serde_yaml`. Nothing here is server configuration or remap/upstream resource
//! lists — those live in the surrounding SM and are referenced only through the
//! `collaborators` trait boundary.
//!
//! Every handler in [`crate::director`] receives `&OverridableConfig`, never
//! `&Config` — the global snapshot is cloned into a per-transaction overridable copy
//! once at transaction start, and plugins
//! (out of scope here, but the seam is preserved) may freely mutate their copy.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreResult;

/// How aggressively Set-Cookie/Cookie headers block caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookiePolicy {
    None,
    All,
    Images,
    AllButText,
    AllButTextExt,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        CookiePolicy::AllButTextExt
    }
}

/// Required-header policy applied in `is_response_cacheable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredHeadersPolicy {
    None,
    AtLeastLastModified,
    CacheControl,
}

impl Default for RequiredHeadersPolicy {
    fn default() -> Self {
        RequiredHeadersPolicy::None
    }
}

/// `cache.when_to_revalidate` override knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenToRevalidate {
    Auto = 0,
    StaleIfHeuristic = 1,
    AlwaysStale = 2,
    NeverStale = 3,
    StaleIfIms = 4,
}

impl Default for WhenToRevalidate {
    fn default() -> Self {
        WhenToRevalidate::Auto
    }
}

/// Client-IP header insertion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIpPolicy {
    NeverInsert,
    IfAbsent,
    Always,
}

impl Default for ClientIpPolicy {
    fn default() -> Self {
        ClientIpPolicy::IfAbsent
    }
}

/// Cache write-lock failure recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteLockFailurePolicy {
    ErrorOnMiss,
    ErrorOnMissOrRevalidate,
    ErrorOnMissStaleOnRevalidate,
    ReadRetry,
    SilentNoAction,
}

impl Default for WriteLockFailurePolicy {
    fn default() -> Self {
        WriteLockFailurePolicy::ReadRetry
    }
}

/// Cacheability policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheabilityConfig {
    #[serde(default)]
    pub cookie_policy: CookiePolicy,
    #[serde(default)]
    pub required_headers: RequiredHeadersPolicy,
    #[serde(default)]
    pub ignore_server_no_cache: bool,
    #[serde(default)]
    pub ignore_client_no_cache: bool,
    #[serde(default)]
    pub ignore_auth: bool,
    #[serde(default)]
    pub negative_caching_enabled: bool,
    #[serde(default)]
    pub negative_caching_statuses: Vec<u16>,
    #[serde(default)]
    pub range_lookup_enabled: bool,
    /// URL patterns that are never cache-lookupable regardless of method or query
    /// string, e.g. `^/api/` for an application that marks its own dynamic routes.
    #[serde(default)]
    #[validate(custom(function = "validate_regex_patterns"))]
    pub never_cache_url_patterns: Vec<String>,
}

fn validate_regex_patterns(patterns: &[String]) -> Result<(), ValidationError> {
    for pattern in patterns {
        if Regex::new(pattern).is_err() {
            return Err(ValidationError::new("invalid_regex_pattern"));
        }
    }
    Ok(())
}

impl Default for CacheabilityConfig {
    fn default() -> Self {
        CacheabilityConfig {
            cookie_policy: CookiePolicy::default(),
            required_headers: RequiredHeadersPolicy::default(),
            ignore_server_no_cache: false,
            ignore_client_no_cache: false,
            ignore_auth: false,
            negative_caching_enabled: false,
            negative_caching_statuses: vec![404, 410],
            range_lookup_enabled: true,
            never_cache_url_patterns: Vec::new(),
        }
    }
}

/// Freshness policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FreshnessConfig {
    #[serde(default = "default_guaranteed_max_lifetime")]
    pub cache_guaranteed_max_lifetime: i64,
    #[serde(default = "default_heuristic_min")]
    pub heuristic_min: i64,
    #[serde(default = "default_heuristic_max")]
    pub heuristic_max: i64,
    #[serde(default = "default_lm_factor")]
    pub lm_factor: f64,
    #[serde(default)]
    pub when_to_revalidate: WhenToRevalidate,
    #[serde(default)]
    pub cache_max_stale_age: i64,
    #[serde(default)]
    pub serve_stale_on_write_lock_fail: bool,
}

fn default_guaranteed_max_lifetime() -> i64 {
    86_400 * 365
}
fn default_heuristic_min() -> i64 {
    0
}
fn default_heuristic_max() -> i64 {
    86_400
}
fn default_lm_factor() -> f64 {
    0.10
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        FreshnessConfig {
            cache_guaranteed_max_lifetime: default_guaranteed_max_lifetime(),
            heuristic_min: default_heuristic_min(),
            heuristic_max: default_heuristic_max(),
            lm_factor: default_lm_factor(),
            when_to_revalidate: WhenToRevalidate::default(),
            cache_max_stale_age: 0,
            serve_stale_on_write_lock_fail: false,
        }
    }
}

/// Header-building policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HeaderPolicyConfig {
    #[serde(default)]
    pub client_ip_policy: ClientIpPolicy,
    #[serde(default)]
    pub insert_forwarded: bool,
    #[serde(default)]
    pub insert_via: bool,
    #[serde(default = "default_true")]
    pub chunking_enabled: bool,
    #[serde(default = "default_max_websocket_connections")]
    pub max_websocket_connections: u32,
}

fn default_true() -> bool {
    true
}
fn default_max_websocket_connections() -> u32 {
    65_535
}

impl Default for HeaderPolicyConfig {
    fn default() -> Self {
        HeaderPolicyConfig {
            client_ip_policy: ClientIpPolicy::default(),
            insert_forwarded: false,
            insert_via: true,
            chunking_enabled: true,
            max_websocket_connections: default_max_websocket_connections(),
        }
    }
}

/// Next-hop selection policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NextHopConfig {
    #[serde(default = "default_parent_connect_attempts")]
    pub parent_connect_attempts: u32,
    #[serde(default = "default_per_parent_connect_attempts")]
    pub per_parent_connect_attempts: u32,
    #[serde(default = "default_max_simple_retries")]
    pub max_simple_retries: u32,
    #[serde(default = "default_max_unavailable_retries")]
    pub max_unavailable_retries: u32,
    #[serde(default)]
    pub enable_parent_timeout_markdowns: bool,
    #[serde(default = "default_max_proxy_cycles")]
    pub max_proxy_cycles: u32,
    #[serde(default)]
    pub go_direct: bool,
    #[serde(default = "default_connect_attempts_max_retries")]
    pub connect_attempts_max_retries: u32,
    #[serde(default = "default_connect_attempts_max_retries_down_server")]
    pub connect_attempts_max_retries_down_server: u32,
    #[serde(default)]
    pub connect_attempts_rr_retries: u32,
}

fn default_parent_connect_attempts() -> u32 {
    4
}
fn default_per_parent_connect_attempts() -> u32 {
    2
}
fn default_max_simple_retries() -> u32 {
    1
}
fn default_max_unavailable_retries() -> u32 {
    2
}
fn default_max_proxy_cycles() -> u32 {
    0
}
fn default_connect_attempts_max_retries() -> u32 {
    1
}
fn default_connect_attempts_max_retries_down_server() -> u32 {
    3
}

impl Default for NextHopConfig {
    fn default() -> Self {
        NextHopConfig {
            parent_connect_attempts: default_parent_connect_attempts(),
            per_parent_connect_attempts: default_per_parent_connect_attempts(),
            max_simple_retries: default_max_simple_retries(),
            max_unavailable_retries: default_max_unavailable_retries(),
            enable_parent_timeout_markdowns: true,
            max_proxy_cycles: default_max_proxy_cycles(),
            go_direct: true,
            connect_attempts_max_retries: default_connect_attempts_max_retries(),
            connect_attempts_max_retries_down_server:
                default_connect_attempts_max_retries_down_server(),
            connect_attempts_rr_retries: 2,
        }
    }
}

/// Negative-revalidation policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NegativeRevalidationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_negative_revalidating_lifetime")]
    pub lifetime: i64,
    #[serde(default)]
    pub statuses: Vec<u16>,
}

fn default_negative_revalidating_lifetime() -> i64 {
    60
}

impl Default for NegativeRevalidationConfig {
    fn default() -> Self {
        NegativeRevalidationConfig {
            enabled: false,
            lifetime: default_negative_revalidating_lifetime(),
            statuses: vec![500, 502, 503, 504],
        }
    }
}

/// A single prefix-rewrite redirect rule applied in `EndRemapRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectRule {
    pub from_prefix: String,
    pub to_prefix: String,
}

/// Remap/ACL policy applied at `EndRemapRequest`, before the request is handed to
/// `HandleRequest`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemapConfig {
    /// When set, only `allowed_hosts` may be requested; anything else is rejected
    /// with `ErrorKind::ForbiddenByAcl` rather than proxied.
    #[serde(default)]
    pub reverse_proxy_mode: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// URL path patterns rejected with `ErrorKind::ForbiddenByAcl` regardless of
    /// `reverse_proxy_mode`.
    #[serde(default)]
    #[validate(custom(function = "validate_regex_patterns"))]
    pub acl_deny_url_patterns: Vec<String>,
    #[serde(default)]
    pub redirect_rules: Vec<RedirectRule>,
    /// Maximum internal 3xx/Location redirects the core will follow for one
    /// transaction before giving up with `ErrorKind::RedirectLoop`. `0` disables
    /// internal redirect-following entirely (3xx responses pass straight through).
    #[serde(default)]
    pub max_redirects: u32,
}

impl Default for RemapConfig {
    fn default() -> Self {
        RemapConfig {
            reverse_proxy_mode: false,
            allowed_hosts: Vec::new(),
            acl_deny_url_patterns: Vec::new(),
            redirect_rules: Vec::new(),
            max_redirects: 0,
        }
    }
}

/// Root configuration, combining every policy group the transaction core consults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub cacheability: CacheabilityConfig,
    #[serde(default)]
    #[validate(nested)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    #[validate(nested)]
    pub header_policy: HeaderPolicyConfig,
    #[serde(default)]
    #[validate(nested)]
    pub next_hop: NextHopConfig,
    #[serde(default)]
    #[validate(nested)]
    pub negative_revalidation: NegativeRevalidationConfig,
    #[serde(default)]
    pub write_lock_failure_policy: WriteLockFailurePolicy,
    #[serde(default)]
    #[validate(nested)]
    pub remap: RemapConfig,
    /// Ports CONNECT is allowed to reach.
    #[serde(default = "default_connect_ports")]
    pub connect_ports: Vec<u16>,
}

fn default_connect_ports() -> Vec<u16> {
    vec![443, 563]
}

impl Config {
    /// Parse a YAML configuration string, then validate it.
    pub fn from_yaml(raw: &str) -> CoreResult<Self> {
        log::trace!("read conf: {raw}");
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        log::debug!("loaded conf: {config:?}");
        Ok(config)
    }

    /// Load configuration from a YAML file, then validate it.
    ///
    /// Synchronous: configuration is validated at startup, before the (out-of-scope)
    /// SM begins driving events.
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::CoreError::Configuration(format!(
                "unable to read conf file from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        log::debug!("conf file read from {}", path.as_ref().display());
        Self::from_yaml(&raw)
    }

    /// Take a per-transaction overridable copy of this snapshot.
    pub fn to_overridable(&self) -> OverridableConfig {
        OverridableConfig(self.clone())
    }
}

/// Per-transaction mutable copy of [`Config`]. Handlers read only this type — never
/// `&Config` directly — so a plugin hook (out of scope) mutating its copy can never
/// leak into another transaction's view of the global config.
#[derive(Debug, Clone)]
pub struct OverridableConfig(Config);

impl std::ops::Deref for OverridableConfig {
    type Target = Config;
    fn deref(&self) -> &Config {
        &self.0
    }
}

impl std::ops::DerefMut for OverridableConfig {
    fn deref_mut(&mut self) -> &mut Config {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_yaml_round_trips_overrides() {
        let yaml = r#"
cacheability:
  cookie_policy: all
next_hop:
  parent_connect_attempts: 8
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.cacheability.cookie_policy, CookiePolicy::All);
        assert_eq!(config.next_hop.parent_connect_attempts, 8);
    }

    #[test]
    fn overridable_mutation_does_not_touch_global() {
        let config = Config::default();
        let mut overridable = config.to_overridable();
        overridable.next_hop.go_direct = false;
        assert!(config.next_hop.go_direct);
        assert!(!overridable.next_hop.go_direct);
    }
}
