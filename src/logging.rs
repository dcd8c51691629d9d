//! A thin `env_logger` convenience for binaries and tests that embed this crate.
//!
//! This crate's own code only ever calls the `log` facade macros — it never
//! initializes a logger itself, since a library calling `env_logger::init()` would
//! fight with whatever the embedding binary already set up. `init_default_logger`
//! exists for callers (the demo binary, integration tests) that want one sensible
//! default without reaching for `env_logger` directly.

use env_logger::Builder;
use log::LevelFilter;

/// Initialize a stderr logger from `RUST_LOG`, defaulting to `info` when unset.
///
/// Safe to call more than once; only the first call takes effect; later calls are a
/// no-op (matches `env_logger::Builder::try_init`'s semantics).
pub fn init_default_logger() {
    let _ = Builder::from_env(env_logger::Env::default())
        .filter_level(LevelFilter::Info)
        .try_init();
}
