//! Client-side cache for Agora's discussion data.
//!
//! This crate owns the denormalized in-memory collections (communities,
//! per-community thread lists, thread details, reply lists), the shared
//! apply routines that keep every copy of an entity converged, the
//! derived-counter reconciler, and the push-event dispatcher. The
//! subscription and mutation layers live in `agora-sync` and drive this
//! crate from both directions: push events and optimistic writes meet
//! in the same apply code.

pub mod apply;
pub mod cache;
pub mod collection;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod types;

#[cfg(test)]
mod testutil;

pub use cache::{AppliedKey, CacheStore, CollectionKey};
pub use collection::{Collection, Entity, Stored};
pub use counters::{CounterKind, CounterTarget};
pub use dispatch::{Operation, PushEvent, dispatch};
pub use error::StoreError;
pub use types::{
    Community, LatestReply, Provenance, Reaction, ReactionTarget, ReactionType, Reply, Thread,
};
