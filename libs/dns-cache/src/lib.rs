//! Persistent DNS answer cache keyed by `(FQDN, qtype)` (§4.B).
//!
//! Two layers, grounded on the teacher's `moka`-based in-memory caches
//! (used for the DNS record cache in `libs/connlib/tunnel`) stacked over a
//! durable store the teacher itself has no equivalent of: a small
//! `moka::future::Cache` hot layer in front of a `sqlx` sqlite table,
//! with writes batched and flushed by a background worker rather than
//! persisted synchronously on every `save`.

pub mod store;
pub mod text;

pub use store::{Store, StoreConfig};
