//! Push-event dispatch.
//!
//! Decodes row payloads per table and routes them to the shared apply
//! routines. Events for tables the store does not cache are skipped;
//! malformed payloads surface as errors so the subscription layer can
//! log them without tearing down the channel.

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::cache::{AppliedKey, CacheStore};
use crate::error::StoreError;
use crate::types::{
    COMMUNITY_TABLE, Community, Provenance, REACTION_TABLE, REPLY_TABLE, Reaction, Reply,
    THREAD_TABLE, Thread,
};

/// A change event pushed over a topic channel.
///
/// `row` is the new row for inserts and updates, and whatever portion
/// of the old row the server replicates for deletes (always at least
/// the id).
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    pub table: String,
    pub operation: Operation,
    pub row: Value,
    /// Topic the channel was filtered on, as the server reports it.
    /// Routing keys off the table; this is kept for logging.
    #[serde(default)]
    pub topic_filter: Option<String>,
}

impl PushEvent {
    pub fn new(table: impl Into<String>, operation: Operation, row: Value) -> Self {
        Self {
            table: table.into(),
            operation,
            row,
            topic_filter: None,
        }
    }
}

/// The kind of row change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// Partial old-row payload of a thread delete.
#[derive(Debug, Deserialize)]
struct ThreadKeyRow {
    id: Uuid,
    community_id: Option<Uuid>,
}

/// Partial old-row payload of a reply delete.
#[derive(Debug, Deserialize)]
struct ReplyKeyRow {
    id: Uuid,
    thread_id: Option<Uuid>,
}

/// Partial old-row payload of a reaction delete.
#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

/// Apply one push event to the store.
pub fn dispatch(store: &CacheStore, event: PushEvent) -> Result<(), StoreError> {
    match event.table.as_str() {
        COMMUNITY_TABLE => dispatch_community(store, event),
        THREAD_TABLE => dispatch_thread(store, event),
        REPLY_TABLE => dispatch_reply(store, event),
        REACTION_TABLE => dispatch_reaction(store, event),
        other => {
            trace!(table = other, "push event for unhandled table skipped");
            Ok(())
        }
    }
}

fn dispatch_community(store: &CacheStore, event: PushEvent) -> Result<(), StoreError> {
    match event.operation {
        Operation::Insert => {
            store.apply_community_insert(decode::<Community>(COMMUNITY_TABLE, event.row)?);
        }
        Operation::Update => {
            store.apply_community_update(decode::<Community>(COMMUNITY_TABLE, event.row)?);
        }
        Operation::Delete => {
            let key = decode_key::<IdRow>(COMMUNITY_TABLE, event.row)?;
            store.apply_community_remove(key.id);
        }
    }
    Ok(())
}

fn dispatch_thread(store: &CacheStore, event: PushEvent) -> Result<(), StoreError> {
    match event.operation {
        Operation::Insert => {
            let thread = decode::<Thread>(THREAD_TABLE, event.row)?;
            store.apply_thread_insert(thread, Provenance::Confirmed);
        }
        Operation::Update => {
            store.apply_thread_update(decode::<Thread>(THREAD_TABLE, event.row)?);
        }
        Operation::Delete => {
            let key = decode_key::<ThreadKeyRow>(THREAD_TABLE, event.row)?;
            store.apply_thread_remove(key.id, key.community_id);
        }
    }
    Ok(())
}

fn dispatch_reply(store: &CacheStore, event: PushEvent) -> Result<(), StoreError> {
    match event.operation {
        Operation::Insert => {
            let reply = decode::<Reply>(REPLY_TABLE, event.row)?;
            store.apply_reply_insert(reply, Provenance::Confirmed);
        }
        Operation::Update => {
            store.apply_reply_update(decode::<Reply>(REPLY_TABLE, event.row)?);
        }
        Operation::Delete => {
            let key = decode_key::<ReplyKeyRow>(REPLY_TABLE, event.row)?;
            store.apply_reply_remove(key.id, key.thread_id);
        }
    }
    Ok(())
}

fn dispatch_reaction(store: &CacheStore, event: PushEvent) -> Result<(), StoreError> {
    match event.operation {
        Operation::Insert => {
            let reaction = decode::<Reaction>(REACTION_TABLE, event.row)?;
            store.apply_reaction_insert(&reaction);
        }
        // Reaction rows are immutable; an update carries nothing the
        // cache derives state from.
        Operation::Update => {
            trace!("reaction update event skipped");
        }
        Operation::Delete => {
            // Full old-row replication lets the key be rebuilt even if
            // this client never indexed the row id.
            if let Ok(reaction) = serde_json::from_value::<Reaction>(event.row.clone()) {
                store.take_reaction_key(reaction.id);
                store.apply_reaction_remove(AppliedKey::reaction(&reaction));
            } else {
                let key = decode_key::<IdRow>(REACTION_TABLE, event.row)?;
                store.apply_reaction_remove_by_id(key.id);
            }
        }
    }
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(table: &str, row: Value) -> Result<T, StoreError> {
    serde_json::from_value(row).map_err(|source| StoreError::RowDecode {
        table: table.to_owned(),
        source,
    })
}

fn decode_key<T: serde::de::DeserializeOwned>(table: &str, row: Value) -> Result<T, StoreError> {
    serde_json::from_value(row).map_err(|_| StoreError::IncompleteDelete {
        table: table.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{community, thread};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event(table: &str, operation: Operation, row: Value) -> PushEvent {
        PushEvent::new(table, operation, row)
    }

    #[test]
    fn test_thread_insert_event_places_and_counts() {
        let store = CacheStore::new();
        let c = community("general");
        let community_id = c.id;
        store.replace_communities(vec![c]);
        store.replace_threads(community_id, vec![]);

        let t = thread(community_id, "hello", false, 10);
        let row = serde_json::to_value(&t).unwrap();
        dispatch(&store, event(THREAD_TABLE, Operation::Insert, row)).unwrap();

        assert_eq!(store.threads(community_id).unwrap().len(), 1);
        assert_eq!(store.community(community_id).unwrap().thread_count, 1);
    }

    #[test]
    fn test_delete_event_with_partial_old_row() {
        let store = CacheStore::new();
        let c = community("general");
        let community_id = c.id;
        store.replace_communities(vec![c]);
        let t = thread(community_id, "hello", false, 10);
        store.replace_threads(community_id, vec![t.clone()]);
        // Hydration settles the thread's counter contribution.
        store.with_communities(|communities| {
            communities.update_value(community_id, |c| c.thread_count = 1);
        });

        let row = json!({ "id": t.id, "community_id": null });
        dispatch(&store, event(THREAD_TABLE, Operation::Delete, row)).unwrap();

        assert!(store.threads(community_id).unwrap().is_empty());
        assert_eq!(store.community(community_id).unwrap().thread_count, 0);
    }

    #[test]
    fn test_unknown_table_is_skipped() {
        let store = CacheStore::new();
        let row = json!({ "id": Uuid::new_v4() });
        dispatch(&store, event("presence", Operation::Insert, row)).unwrap();
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let store = CacheStore::new();
        let row = json!({ "id": "not-a-uuid" });
        let err = dispatch(&store, event(THREAD_TABLE, Operation::Insert, row)).unwrap_err();
        assert!(matches!(err, StoreError::RowDecode { .. }));
    }

    #[test]
    fn test_delete_without_id_is_incomplete() {
        let store = CacheStore::new();
        let err =
            dispatch(&store, event(REPLY_TABLE, Operation::Delete, json!({}))).unwrap_err();
        assert!(matches!(err, StoreError::IncompleteDelete { .. }));
    }

    #[test]
    fn test_reaction_toggle_roundtrip_via_events() {
        let store = CacheStore::new();
        let community_id = Uuid::new_v4();
        let t = thread(community_id, "t", false, 10);
        store.replace_threads(community_id, vec![t.clone()]);

        let r = crate::testutil::reaction(
            Uuid::new_v4(),
            crate::types::ReactionTarget::Thread(t.id),
            crate::types::ReactionType::Like,
        );
        let row = serde_json::to_value(&r).unwrap();
        dispatch(&store, event(REACTION_TABLE, Operation::Insert, row)).unwrap();
        assert_eq!(store.threads(community_id).unwrap()[0].reaction_count, 1);

        let row = json!({ "id": r.id });
        dispatch(&store, event(REACTION_TABLE, Operation::Delete, row)).unwrap();
        assert_eq!(store.threads(community_id).unwrap()[0].reaction_count, 0);
    }
}
