//! capstan-state: durable deployment records for the rollout controller.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for deployment records and the local scheduler's instance records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Deployment records carry a `revision` counter; writes from the rollout
//! controller go through [`StateStore::commit_deployment`], a
//! compare-and-swap inside a single write transaction, so concurrent
//! readers never observe a half-applied tick.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
