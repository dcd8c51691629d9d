//! A deterministic, synchronous HTTP transaction decision core for a caching
//! forward/reverse proxy.
//!
//! This crate owns no I/O and runs no event loop. It is a pure state machine: a
//! surrounding proxy (out of scope here) drives a [`state::State`] through a sequence
//! of [`director`] handlers, performing the I/O each [`state::Directive`] calls for
//! (DNS resolution, cache lookup, upstream connect, reading upstream headers) and
//! feeding the result back in before calling the next handler.
//!
//! # Layout
//!
//! - [`error`] — this crate's own fallible-operation error type.
//! - [`via`] — the fixed-position diagnostic string threaded through a transaction.
//! - [`headers`] — the structured header-set representation the rest of the crate
//!   operates on.
//! - [`config`] — policy tunables, loaded from YAML and validated at startup.
//! - [`state`] — the transaction data model, `Directive`, and `NextAction`.
//! - [`collaborators`] — trait boundary to everything this crate does not own.
//! - [`mock`] — in-memory collaborator doubles for driving the core in tests.
//! - [`cacheability`] — Component A: pure cacheability predicates.
//! - [`freshness`] — Component B: freshness-limit/age/classification arithmetic.
//! - [`header_builder`] — Component C: outgoing request/response header construction.
//! - [`next_hop`] — Component D: origin-vs-parent selection and retry bookkeeping.
//! - [`error_responder`] — Component E: the HTTP-visible error taxonomy.
//! - [`director`] — Component F: the handlers wiring A–E into the transaction.
//! - [`logging`] — an optional `env_logger` convenience for embedding binaries.

pub mod cacheability;
pub mod collaborators;
pub mod config;
pub mod director;
pub mod error;
pub mod error_responder;
pub mod freshness;
pub mod header_builder;
pub mod headers;
pub mod logging;
pub mod mock;
pub mod next_hop;
pub mod state;
pub mod via;

pub use collaborators::Collaborators;
pub use config::{Config, OverridableConfig};
pub use error::{CoreError, CoreResult};
pub use headers::HeaderSet;
pub use state::{Directive, Handler, NextAction, State};
