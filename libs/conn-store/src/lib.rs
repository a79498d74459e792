//! Component F: schema-driven relational persistence of connection records
//! (§4.F), with a buffered persister feed and periodic retention cleanup.
//!
//! A second [`Store`] pointed at a different sqlite file, fed from the same
//! [`feed::ConnectionHandle`] stream, is how the optional "history database"
//! with independent retention is composed — there is no dedicated type for
//! it here.

pub mod cleanup;
pub mod feed;
pub mod schema;
pub mod store;

pub use cleanup::Cleanup;
pub use feed::{channel, ConnectionHandle, FeedSender, FeedWorker};
pub use store::{ConnStoreConfig, SqlValue, Store};
