//! The Via string: a fixed-position status trace embedded in the response `Via:`
//! header. Every position is a single ASCII byte signalling a decision outcome; the
//! byte values at each position are a stable compatibility surface and
//! must never be produced by ad-hoc `format!`ing — only by writing into named index
//! constants on a fixed-size array.

/// Number of tracked positions. Unset positions render as `-`.
pub const VIA_LEN: usize = 8;

const UNSET: u8 = b'-';

/// Position: how the cache lookup for this request was resolved.
pub const IDX_CACHE_RESULT: usize = 0;
/// Position: how parent-proxy connection was resolved (`F` = fail-to-direct, `S` = success).
pub const IDX_PARENT_CONNECT: usize = 1;
/// Position: how the chosen next hop (origin or parent) was connected.
pub const IDX_SERVER_CONNECT: usize = 2;
/// Position: the overall disposition of the proxy's handling of this transaction.
pub const IDX_PROXY_RESULT: usize = 3;
/// Position: error-class detail, set only when an error path was taken.
pub const IDX_ERROR_CLASS: usize = 4;
/// Position: cacheability-rejection detail byte (see [`crate::cacheability`]).
pub const IDX_CACHEABILITY_DETAIL: usize = 5;
/// Position: freshness verdict applied to a hit (`F`/`W`/`S`).
pub const IDX_FRESHNESS: usize = 6;
/// Position: warning header(s) emitted while building the client response.
pub const IDX_WARNING: usize = 7;

pub const VIA_IN_CACHE_FRESH: u8 = b'H';
pub const VIA_CACHE_MISS: u8 = b'M';
pub const VIA_IN_CACHE_STALE: u8 = b'S';
pub const VIA_IN_RAM_CACHE_FRESH: u8 = b'R';
pub const VIA_IN_CACHE_RWW_HIT: u8 = b'W';
pub const VIA_IN_CACHE_NOT_ACCEPTABLE: u8 = b'U';

pub const VIA_PARENT_FAIL_TO_DIRECT: u8 = b'F';
pub const VIA_PARENT_SUCCESS: u8 = b'S';
pub const VIA_SERVER_CONNECT_SUCCESS: u8 = b'S';
pub const VIA_SERVER_CONNECT_FAILURE: u8 = b'F';

/// Fixed-position Via trace. `Default` yields all-unset (`-`) positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViaString([u8; VIA_LEN]);

impl Default for ViaString {
    fn default() -> Self {
        ViaString([UNSET; VIA_LEN])
    }
}

impl ViaString {
    /// Write `byte` into `position`. Positions are always the named `IDX_*` constants.
    pub fn set(&mut self, position: usize, byte: u8) {
        self.0[position] = byte;
    }

    /// Read the byte at `position`.
    pub fn get(&self, position: usize) -> u8 {
        self.0[position]
    }

    /// Render as the literal bytes that go into the `Via:` header value's trace segment.
    pub fn as_str(&self) -> &str {
        // All constants above are ASCII, so this is always valid UTF-8.
        std::str::from_utf8(&self.0).unwrap_or("--------")
    }
}

impl std::fmt::Display for ViaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
