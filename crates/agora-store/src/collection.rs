//! Ordered entity collections with id lookup.
//!
//! A `Collection` is the unit the cache store hands to readers: an
//! explicit presentation order plus O(1) lookup by id. Placement rules
//! live here so the push-event path and the optimistic path position
//! entities through the same code.

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{Community, Provenance, Reply, Thread};

/// Anything storable in a collection.
pub trait Entity {
    fn id(&self) -> Uuid;
}

impl Entity for Community {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Thread {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Reply {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// A cache entry together with its provenance tag.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub value: T,
    pub provenance: Provenance,
}

/// An ordered sequence of entities plus a lookup by id.
///
/// Mutation goes through the cache store's single entry point; readers
/// only ever see cloned snapshots.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    order: Vec<Uuid>,
    items: HashMap<Uuid, Stored<T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            items: HashMap::new(),
        }
    }
}

impl<T: Entity + Clone> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Stored<T>> {
        self.items.get(&id)
    }

    /// Iterate entries in presentation order.
    pub fn iter(&self) -> impl Iterator<Item = &Stored<T>> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Snapshot the values in presentation order.
    pub fn values(&self) -> Vec<T> {
        self.iter().map(|stored| stored.value.clone()).collect()
    }

    /// Position of an id in the presentation order.
    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.order.iter().position(|&x| x == id)
    }

    /// Insert at an explicit position. Replaces in place if the id is
    /// already present (idempotent insert).
    pub fn insert_at(&mut self, index: usize, value: T, provenance: Provenance) {
        let id = value.id();
        if self.items.contains_key(&id) {
            self.items.insert(id, Stored { value, provenance });
            return;
        }
        let index = index.min(self.order.len());
        self.order.insert(index, id);
        self.items.insert(id, Stored { value, provenance });
    }

    /// Append at the end of the presentation order.
    pub fn push(&mut self, value: T, provenance: Provenance) {
        let index = self.order.len();
        self.insert_at(index, value, provenance);
    }

    /// Replace an existing entry's value, preserving its position.
    /// Returns false if the id is not present.
    pub fn replace(&mut self, value: T, provenance: Provenance) -> bool {
        let id = value.id();
        if !self.items.contains_key(&id) {
            return false;
        }
        self.items.insert(id, Stored { value, provenance });
        true
    }

    /// Update an entry's value in place via a pure function, preserving
    /// position and provenance. Returns false if the id is not present.
    pub fn update_value(&mut self, id: Uuid, f: impl FnOnce(&mut T)) -> bool {
        match self.items.get_mut(&id) {
            Some(stored) => {
                f(&mut stored.value);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Stored<T>> {
        let removed = self.items.remove(&id)?;
        self.order.retain(|&x| x != id);
        Some(removed)
    }

    /// Move an existing entry to a new position in the order.
    pub fn reposition(&mut self, id: Uuid, index: usize) {
        if !self.items.contains_key(&id) {
            return;
        }
        self.order.retain(|&x| x != id);
        let index = index.min(self.order.len());
        self.order.insert(index, id);
    }

    /// Ids of speculative entries, in presentation order.
    pub fn speculative_ids(&self) -> Vec<Uuid> {
        self.order
            .iter()
            .filter(|id| {
                self.items
                    .get(id)
                    .is_some_and(|s| s.provenance == Provenance::Speculative)
            })
            .copied()
            .collect()
    }
}

/// Index at which a thread belongs in its community's list.
///
/// Pinned threads form a stable prefix (new pins go after existing
/// pins); unpinned threads are ordered by most-recent-activity
/// descending. The candidate's own id is skipped so the function also
/// computes the target slot for a reposition.
pub fn thread_slot(threads: &Collection<Thread>, candidate: &Thread) -> usize {
    // A thread that was pinned and stays pinned keeps its slot; pins
    // never reorder among themselves. Callers must compute the slot
    // before converging the stored value, so the stored entry still
    // carries the old pin state and a pin transition falls through.
    if candidate.is_pinned
        && threads
            .get(candidate.id)
            .is_some_and(|stored| stored.value.is_pinned)
    {
        if let Some(position) = threads.position(candidate.id) {
            return position;
        }
    }

    let mut slot = 0;
    for stored in threads.iter() {
        let existing = &stored.value;
        if existing.id == candidate.id {
            continue;
        }
        let after = if candidate.is_pinned {
            // Stable among pins: go after every existing pin.
            existing.is_pinned
        } else {
            // After the pinned prefix, then recency descending.
            existing.is_pinned || existing.activity_at() >= candidate.activity_at()
        };
        if after {
            slot += 1;
        } else {
            break;
        }
    }
    slot
}

/// Index at which a community belongs: `sort_order` ascending, stable.
pub fn community_slot(communities: &Collection<Community>, candidate: &Community) -> usize {
    let mut slot = 0;
    for stored in communities.iter() {
        if stored.value.id == candidate.id {
            continue;
        }
        if stored.value.sort_order <= candidate.sort_order {
            slot += 1;
        } else {
            break;
        }
    }
    slot
}

/// Index at which a reply belongs: `created_at` ascending, stable.
pub fn reply_slot(replies: &Collection<Reply>, candidate: &Reply) -> usize {
    let mut slot = 0;
    for stored in replies.iter() {
        if stored.value.id == candidate.id {
            continue;
        }
        if stored.value.created_at <= candidate.created_at {
            slot += 1;
        } else {
            break;
        }
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn thread(title: &str, pinned: bool, at: i64) -> Thread {
        Thread {
            id: Uuid::new_v4(),
            community_id: Uuid::nil(),
            title: title.into(),
            content: String::new(),
            author_alias: "ash".into(),
            is_pinned: pinned,
            is_flagged: false,
            created_at: ts(at),
            updated_at: ts(at),
            reply_count: 0,
            reaction_count: 0,
            latest_reply: None,
        }
    }

    fn insert(threads: &mut Collection<Thread>, t: Thread) {
        let slot = thread_slot(threads, &t);
        threads.insert_at(slot, t, Provenance::Confirmed);
    }

    fn titles(threads: &Collection<Thread>) -> Vec<String> {
        threads.iter().map(|s| s.value.title.clone()).collect()
    }

    #[test]
    fn test_pinned_insert_preserves_pin_arrival_order() {
        let mut threads = Collection::new();
        insert(&mut threads, thread("A", true, 1));
        insert(&mut threads, thread("B", false, 5));
        insert(&mut threads, thread("C", false, 3));
        insert(&mut threads, thread("D", true, 2));

        assert_eq!(titles(&threads), vec!["A", "D", "B", "C"]);
    }

    #[test]
    fn test_pinned_thread_keeps_slot_on_activity_change() {
        let mut threads = Collection::new();
        let a = thread("A", true, 1);
        insert(&mut threads, a.clone());
        insert(&mut threads, thread("B", false, 5));
        insert(&mut threads, thread("C", false, 3));
        insert(&mut threads, thread("D", true, 2));
        assert_eq!(titles(&threads), vec!["A", "D", "B", "C"]);

        // A reply lands on A; its activity key moves but its slot must
        // not, since pins are stable among themselves.
        let mut bumped = a.clone();
        bumped.latest_reply = Some(crate::types::LatestReply {
            replied_at: ts(50),
            author_alias: "ivy".into(),
        });
        let slot = thread_slot(&threads, &bumped);
        assert_eq!(slot, 0);
        threads.replace(bumped, Provenance::Confirmed);
        threads.reposition(a.id, slot);

        assert_eq!(titles(&threads), vec!["A", "D", "B", "C"]);
    }

    #[test]
    fn test_newly_pinned_thread_goes_after_existing_pins() {
        let mut threads = Collection::new();
        insert(&mut threads, thread("A", true, 1));
        insert(&mut threads, thread("B", false, 5));
        let c = thread("C", false, 3);
        insert(&mut threads, c.clone());
        insert(&mut threads, thread("D", true, 2));
        assert_eq!(titles(&threads), vec!["A", "D", "B", "C"]);

        let mut pinned = c.clone();
        pinned.is_pinned = true;
        let slot = thread_slot(&threads, &pinned);
        assert_eq!(slot, 2);
        threads.replace(pinned, Provenance::Confirmed);
        threads.reposition(c.id, slot);

        assert_eq!(titles(&threads), vec!["A", "D", "C", "B"]);
    }

    #[test]
    fn test_unpinned_sorted_by_recency_descending() {
        let mut threads = Collection::new();
        insert(&mut threads, thread("old", false, 1));
        insert(&mut threads, thread("newest", false, 9));
        insert(&mut threads, thread("mid", false, 5));

        assert_eq!(titles(&threads), vec!["newest", "mid", "old"]);
    }

    #[test]
    fn test_insert_existing_id_is_replacement() {
        let mut threads = Collection::new();
        let a = thread("A", false, 5);
        let id = a.id;
        insert(&mut threads, a.clone());
        insert(&mut threads, thread("B", false, 3));

        let mut again = a;
        again.title = "A2".into();
        let slot = thread_slot(&threads, &again);
        threads.insert_at(slot, again, Provenance::Confirmed);

        assert_eq!(threads.len(), 2);
        assert_eq!(threads.get(id).unwrap().value.title, "A2");
        assert_eq!(threads.position(id), Some(0));
    }

    #[test]
    fn test_reposition_after_activity_bump() {
        let mut threads = Collection::new();
        insert(&mut threads, thread("top", false, 9));
        let mut bumped = thread("bumped", false, 1);
        insert(&mut threads, bumped.clone());
        assert_eq!(titles(&threads), vec!["top", "bumped"]);

        bumped.latest_reply = Some(crate::types::LatestReply {
            replied_at: ts(20),
            author_alias: "ivy".into(),
        });
        threads.replace(bumped.clone(), Provenance::Confirmed);
        let slot = thread_slot(&threads, &bumped);
        threads.reposition(bumped.id, slot);

        assert_eq!(titles(&threads), vec!["bumped", "top"]);
    }

    #[test]
    fn test_remove_keeps_order_intact() {
        let mut threads = Collection::new();
        insert(&mut threads, thread("A", false, 3));
        let b = thread("B", false, 2);
        insert(&mut threads, b.clone());
        insert(&mut threads, thread("C", false, 1));

        threads.remove(b.id);
        assert_eq!(titles(&threads), vec!["A", "C"]);
        assert!(!threads.contains(b.id));
    }

    #[test]
    fn test_reply_order_chronological_ascending() {
        let mut replies: Collection<Reply> = Collection::new();
        for at in [5, 1, 3] {
            let reply = Reply {
                id: Uuid::new_v4(),
                thread_id: Uuid::nil(),
                parent_reply_id: None,
                author_alias: "ash".into(),
                content: format!("r{at}"),
                created_at: ts(at),
                updated_at: ts(at),
                reaction_count: 0,
            };
            let slot = reply_slot(&replies, &reply);
            replies.insert_at(slot, reply, Provenance::Confirmed);
        }

        let contents: Vec<_> = replies.iter().map(|s| s.value.content.clone()).collect();
        assert_eq!(contents, vec!["r1", "r3", "r5"]);
    }

    #[test]
    fn test_speculative_ids() {
        let mut threads = Collection::new();
        let spec = thread("spec", false, 2);
        threads.push(thread("real", false, 1), Provenance::Confirmed);
        threads.push(spec.clone(), Provenance::Speculative);

        assert_eq!(threads.speculative_ids(), vec![spec.id]);
    }
}
