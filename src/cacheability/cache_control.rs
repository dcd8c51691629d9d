//! Cache-Control directive parsing in the style of `http-cache-semantics`-family
//! parsers: never errors, and a directive repeated with conflicting values is treated
//! as invalid (falls back to "absent") rather than surfaced as a parse failure —
//! parsing never signals an error, all downstream decisions stay policy-deterministic.

use std::collections::HashMap;

use http::HeaderValue;

/// Parsed `Cache-Control` directives. A directive with no `=value` (e.g. `no-store`)
/// maps to `None`; `has()` is true either way.
pub type CacheControl = HashMap<Box<str>, Option<Box<str>>>;

pub trait CacheControlExt {
    fn has(&self, directive: &str) -> bool;
    fn get_i64(&self, directive: &str) -> Option<i64>;
}

impl CacheControlExt for CacheControl {
    fn has(&self, directive: &str) -> bool {
        self.contains_key(directive)
    }

    fn get_i64(&self, directive: &str) -> Option<i64> {
        self.get(directive)?.as_deref()?.trim().parse().ok()
    }
}

/// Parse every `Cache-Control` header value present (there may be more than one).
pub fn parse<'a>(headers: impl IntoIterator<Item = &'a HeaderValue>) -> CacheControl {
    let mut cc: CacheControl = CacheControl::new();

    for h in headers.into_iter().filter_map(|v| v.to_str().ok()) {
        for part in h.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut kv = part.splitn(2, '=');
            let key = kv.next().unwrap().trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            let value = kv.next().map(|v| v.trim().trim_matches('"'));

            match cc.get(key.as_str()) {
                // A directive repeated with a conflicting value is invalid; treat it
                // as absent rather than keep either value (RFC 7234 is silent on
                // which wins, so neither should be trusted).
                Some(existing) if existing.as_deref() != value => {
                    cc.remove(key.as_str());
                }
                Some(_) => {}
                None => {
                    cc.insert(key.into_boxed_str(), value.map(Into::into));
                }
            }
        }
    }

    cc
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn parses_directives_with_and_without_values() {
        let header = HeaderValue::from_static("max-age=60, no-cache, public");
        let cc = parse([&header]);
        assert_eq!(cc.get_i64("max-age"), Some(60));
        assert!(cc.has("no-cache"));
        assert!(cc.has("public"));
    }

    #[test]
    fn unquotes_quoted_values() {
        let header = HeaderValue::from_static(r#"no-cache="set-cookie""#);
        let cc = parse([&header]);
        assert_eq!(cc.get("no-cache").unwrap().as_deref(), Some("set-cookie"));
    }

    #[test]
    fn conflicting_repeated_directive_is_dropped() {
        let a = HeaderValue::from_static("max-age=60");
        let b = HeaderValue::from_static("max-age=120");
        let cc = parse([&a, &b]);
        assert!(!cc.has("max-age"));
    }

    #[test]
    fn negative_max_age_parses_as_negative() {
        let header = HeaderValue::from_static("max-age=-1");
        let cc = parse([&header]);
        assert_eq!(cc.get_i64("max-age"), Some(-1));
    }
}
