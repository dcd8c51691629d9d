//! MIME header collections tracked by the transaction: `client_request`,
//! `server_request`, `server_response`, `client_response`.
//!
//! Wire parsing is out of scope; this module only represents
//! an already-parsed header collection and the predicates/mutations the Director and
//! components A–E need. Header storage uses the `http` crate's `HeaderMap`, the same
//! representation the `http-cache`/`http-cache-semantics` family builds directly on.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

/// Headers that must never be copied verbatim from one hop to the next
///.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// A structured MIME header collection, with a `valid()` predicate every tracked
/// header set carries.
#[derive(Debug, Clone)]
pub struct HeaderSet {
    pub headers: HeaderMap,
    /// Present on request-shaped header sets (`client_request`, `server_request`).
    pub method: Option<Method>,
    pub uri: Option<Uri>,
    pub version: Version,
    /// Present on response-shaped header sets (`server_response`, `client_response`).
    pub status: Option<StatusCode>,
    valid: bool,
}

impl Default for HeaderSet {
    fn default() -> Self {
        HeaderSet {
            headers: HeaderMap::new(),
            method: None,
            uri: None,
            version: Version::HTTP_11,
            status: None,
            valid: false,
        }
    }
}

impl HeaderSet {
    /// A request-shaped header set. `valid()` is true once method and URI are set.
    pub fn new_request(method: Method, uri: Uri, version: Version) -> Self {
        HeaderSet {
            headers: HeaderMap::new(),
            method: Some(method),
            uri: Some(uri),
            version,
            status: None,
            valid: true,
        }
    }

    /// A response-shaped header set. `valid()` is true once a status is set.
    pub fn new_response(status: StatusCode, version: Version) -> Self {
        HeaderSet {
            headers: HeaderMap::new(),
            method: None,
            uri: None,
            version,
            status: Some(status),
            valid: true,
        }
    }

    /// Whether this header set has been built at all.
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.headers.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Copy every header from `src` except those in [`HOP_BY_HOP_HEADERS`].
    pub fn copy_end_to_end_from(&mut self, src: &HeaderSet) {
        for (name, value) in src.headers.iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            self.headers.append(name.clone(), value.clone());
        }
    }

    /// Strip all hop-by-hop headers in place.
    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP_HEADERS {
            self.headers.remove(*name);
        }
    }

    /// All `Cache-Control` directives, parsed once. See [`crate::cacheability::cache_control`].
    pub fn cache_control(&self) -> crate::cacheability::cache_control::CacheControl {
        crate::cacheability::cache_control::parse(self.headers.get_all("cache-control"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_invalid() {
        assert!(!HeaderSet::default().valid());
    }

    #[test]
    fn new_request_is_valid() {
        let hs = HeaderSet::new_request(
            Method::GET,
            "http://example.com/".parse().unwrap(),
            Version::HTTP_11,
        );
        assert!(hs.valid());
    }

    #[test]
    fn copy_end_to_end_skips_hop_by_hop() {
        let mut src = HeaderSet::new_request(
            Method::GET,
            "http://example.com/".parse().unwrap(),
            Version::HTTP_11,
        );
        src.insert(HeaderName::from_static("connection"), HeaderValue::from_static("close"));
        src.insert(HeaderName::from_static("x-custom"), HeaderValue::from_static("1"));

        let mut dst = HeaderSet::new_request(
            Method::GET,
            "http://example.com/".parse().unwrap(),
            Version::HTTP_11,
        );
        dst.copy_end_to_end_from(&src);

        assert!(!dst.has("connection"));
        assert!(dst.has("x-custom"));
    }
}
