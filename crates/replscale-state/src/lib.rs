//! replscale-state — embedded store for the local provider.
//!
//! Backed by [redb](https://docs.rs/redb). Holds everything the
//! store-backed collaborators need: replication instances, tasks and
//! alarms (the local stand-in for the cloud provider), installed wakes,
//! the notification outbox, and per-instance operation markers.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by their natural identifier (instance name, task ARN, wake key).
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
