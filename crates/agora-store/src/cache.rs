//! Process-wide cache of denormalized collections.
//!
//! The `CacheStore` holds every cached view of the discussion data:
//! the communities list, per-community thread lists, per-thread detail
//! entries, and per-thread reply lists. The same entity may appear in
//! several collections at once; the apply routines (`apply.rs`) and the
//! counter reconciler (`counters.rs`) keep all copies moving together.
//!
//! Mutations funnel through the `with_*` helpers, which run a pure
//! closure under the entry lock and then broadcast the changed
//! collection key, so readers observe each update as a single atomic
//! step and renderers get a notification per `set`.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::collection::{Collection, Stored, community_slot};
use crate::types::{Community, Provenance, Reaction, ReactionTarget, ReactionType, Reply, Thread};

/// Broadcast channel capacity for store updates.
/// Sized for hydration bursts; renderers that lag simply re-read.
const UPDATES_CHANNEL_CAPACITY: usize = 1024;

/// Names a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    /// The communities list.
    Communities,
    /// Threads in one community.
    CommunityThreads(Uuid),
    /// The single-thread detail entry.
    ThreadDetail(Uuid),
    /// Replies in one thread.
    ThreadReplies(Uuid),
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Communities => write!(f, "communities"),
            Self::CommunityThreads(id) => write!(f, "threads:{id}"),
            Self::ThreadDetail(id) => write!(f, "detail:{id}"),
            Self::ThreadReplies(id) => write!(f, "replies:{id}"),
        }
    }
}

/// Idempotence key for a logical mutation.
///
/// Entity inserts settle by id; reaction toggles settle by the
/// `(user, target, type)` triple because the optimistic path and the
/// push path never share a reaction row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppliedKey {
    Entity(Uuid),
    Reaction {
        user_id: Uuid,
        target: ReactionTarget,
        reaction_type: ReactionType,
    },
}

impl AppliedKey {
    pub fn reaction(reaction: &Reaction) -> Self {
        Self::Reaction {
            user_id: reaction.user_id,
            target: reaction.target,
            reaction_type: reaction.reaction_type,
        }
    }
}

/// In-memory cache for all discussion collections.
///
/// Thread-safe and designed for concurrent access from multiple tasks.
pub struct CacheStore {
    /// The communities list; `None` until first hydration.
    communities: RwLock<Option<Collection<Community>>>,
    /// Thread lists keyed by community id.
    threads: DashMap<Uuid, Collection<Thread>>,
    /// Thread detail entries keyed by thread id.
    details: DashMap<Uuid, Stored<Thread>>,
    /// Reply lists keyed by thread id.
    replies: DashMap<Uuid, Collection<Reply>>,
    /// Ledger of mutations whose counter arithmetic has been settled.
    applied: DashMap<AppliedKey, ()>,
    /// Reaction row id -> idempotence key, for delete events that only
    /// carry the row id.
    reaction_keys: DashMap<Uuid, AppliedKey>,
    /// Broadcast channel for collection-changed notifications.
    updates_tx: broadcast::Sender<CollectionKey>,
}

impl CacheStore {
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(UPDATES_CHANNEL_CAPACITY);
        Arc::new(Self {
            communities: RwLock::new(None),
            threads: DashMap::new(),
            details: DashMap::new(),
            replies: DashMap::new(),
            applied: DashMap::new(),
            reaction_keys: DashMap::new(),
            updates_tx,
        })
    }

    /// Subscribe to collection-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionKey> {
        self.updates_tx.subscribe()
    }

    /// Notify subscribers that a collection changed.
    pub(crate) fn notify(&self, key: CollectionKey) {
        if self.updates_tx.send(key).is_err() {
            trace!(key = %key, "no subscribers for store update");
        }
    }

    // =========================================================================
    // Readers (cloned snapshots; nothing hands out a mutable view)
    // =========================================================================

    /// The communities list in presentation order, if hydrated.
    pub fn communities(&self) -> Option<Vec<Community>> {
        self.communities
            .read()
            .ok()?
            .as_ref()
            .map(Collection::values)
    }

    /// One community from the communities list.
    pub fn community(&self, community_id: Uuid) -> Option<Community> {
        self.communities
            .read()
            .ok()?
            .as_ref()?
            .get(community_id)
            .map(|stored| stored.value.clone())
    }

    /// Threads in a community in presentation order, if that list is cached.
    pub fn threads(&self, community_id: Uuid) -> Option<Vec<Thread>> {
        self.threads.get(&community_id).map(|c| c.values())
    }

    /// The detail entry for a thread, if cached.
    pub fn thread_detail(&self, thread_id: Uuid) -> Option<Thread> {
        self.details.get(&thread_id).map(|s| s.value.clone())
    }

    /// Replies in a thread in presentation order, if that list is cached.
    pub fn replies(&self, thread_id: Uuid) -> Option<Vec<Reply>> {
        self.replies.get(&thread_id).map(|c| c.values())
    }

    /// Find a thread in any collection: detail entry first, then the
    /// community thread lists.
    pub fn find_thread(&self, thread_id: Uuid) -> Option<Thread> {
        if let Some(detail) = self.details.get(&thread_id) {
            return Some(detail.value.clone());
        }
        self.threads.iter().find_map(|entry| {
            entry
                .value()
                .get(thread_id)
                .map(|stored| stored.value.clone())
        })
    }

    /// Find a reply in any cached reply list.
    pub fn find_reply(&self, reply_id: Uuid) -> Option<Reply> {
        self.replies.iter().find_map(|entry| {
            entry
                .value()
                .get(reply_id)
                .map(|stored| stored.value.clone())
        })
    }

    /// Whether any cached collection holds a copy of the target.
    pub fn holds_target(&self, target: ReactionTarget) -> bool {
        match target {
            ReactionTarget::Thread(id) => self.find_thread(id).is_some(),
            ReactionTarget::Reply(id) => self.find_reply(id).is_some(),
        }
    }

    // =========================================================================
    // Applied-mutation ledger
    // =========================================================================

    /// Record a mutation key as settled. Returns true if the key was
    /// newly recorded, false if it was already settled (the second
    /// arrival of a logical mutation).
    pub(crate) fn mark_applied(&self, key: AppliedKey) -> bool {
        self.applied.insert(key, ()).is_none()
    }

    /// Remove a settled mark. Returns true if the mark was present.
    pub(crate) fn unmark_applied(&self, key: AppliedKey) -> bool {
        self.applied.remove(&key).is_some()
    }

    /// Whether a mutation key has been settled.
    pub fn is_applied(&self, key: AppliedKey) -> bool {
        self.applied.contains_key(&key)
    }

    /// Remember which idempotence key a reaction row id stands for.
    pub(crate) fn index_reaction(&self, reaction_id: Uuid, key: AppliedKey) {
        self.reaction_keys.insert(reaction_id, key);
    }

    /// Re-key a reaction's row-id index entry once the authoritative id
    /// is known, so a later delete event by row id resolves.
    pub fn reindex_reaction(&self, old_id: Uuid, new_id: Uuid) {
        if let Some((_, key)) = self.reaction_keys.remove(&old_id) {
            self.reaction_keys.insert(new_id, key);
        }
    }

    /// Look up (and drop) the idempotence key for a reaction row id.
    pub(crate) fn take_reaction_key(&self, reaction_id: Uuid) -> Option<AppliedKey> {
        self.reaction_keys
            .remove(&reaction_id)
            .map(|(_, key)| key)
    }

    /// Drop every row-id index entry standing for a key. Called when a
    /// toggle is unmarked, so an old row id cannot resolve to a later
    /// re-add of the same toggle.
    pub(crate) fn forget_reaction_key(&self, key: AppliedKey) {
        self.reaction_keys.retain(|_, k| *k != key);
    }

    // =========================================================================
    // Mutation funnel
    // =========================================================================

    /// Mutate the communities list if it is hydrated, then notify.
    /// The closure must be pure and synchronous.
    pub(crate) fn with_communities<R>(
        &self,
        f: impl FnOnce(&mut Collection<Community>) -> R,
    ) -> Option<R> {
        let result = {
            let mut guard = self.communities.write().ok()?;
            let collection = guard.as_mut()?;
            f(collection)
        };
        self.notify(CollectionKey::Communities);
        Some(result)
    }

    /// Mutate a community's thread list if it is cached, then notify.
    pub(crate) fn with_threads<R>(
        &self,
        community_id: Uuid,
        f: impl FnOnce(&mut Collection<Thread>) -> R,
    ) -> Option<R> {
        let result = {
            let mut entry = self.threads.get_mut(&community_id)?;
            f(entry.value_mut())
        };
        self.notify(CollectionKey::CommunityThreads(community_id));
        Some(result)
    }

    /// Mutate a thread's detail entry if it is cached, then notify.
    pub(crate) fn with_detail<R>(
        &self,
        thread_id: Uuid,
        f: impl FnOnce(&mut Stored<Thread>) -> R,
    ) -> Option<R> {
        let result = {
            let mut entry = self.details.get_mut(&thread_id)?;
            f(entry.value_mut())
        };
        self.notify(CollectionKey::ThreadDetail(thread_id));
        Some(result)
    }

    /// Mutate a thread's reply list if it is cached, then notify.
    pub(crate) fn with_replies<R>(
        &self,
        thread_id: Uuid,
        f: impl FnOnce(&mut Collection<Reply>) -> R,
    ) -> Option<R> {
        let result = {
            let mut entry = self.replies.get_mut(&thread_id)?;
            f(entry.value_mut())
        };
        self.notify(CollectionKey::ThreadReplies(thread_id));
        Some(result)
    }

    /// Community ids whose thread list currently holds the given thread.
    pub(crate) fn thread_list_homes(&self, thread_id: Uuid) -> Vec<Uuid> {
        self.threads
            .iter()
            .filter(|entry| entry.value().contains(thread_id))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Thread ids whose reply list currently holds the given reply.
    pub(crate) fn reply_list_homes(&self, reply_id: Uuid) -> Vec<Uuid> {
        self.replies
            .iter()
            .filter(|entry| entry.value().contains(reply_id))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Set the detail entry for a thread.
    pub(crate) fn put_detail(&self, thread: Thread, provenance: Provenance) {
        let thread_id = thread.id;
        self.details.insert(
            thread_id,
            Stored {
                value: thread,
                provenance,
            },
        );
        self.notify(CollectionKey::ThreadDetail(thread_id));
    }

    /// Drop the detail entry for a thread.
    pub(crate) fn remove_detail(&self, thread_id: Uuid) -> Option<Stored<Thread>> {
        let removed = self.details.remove(&thread_id).map(|(_, s)| s);
        if removed.is_some() {
            self.notify(CollectionKey::ThreadDetail(thread_id));
        }
        removed
    }

    /// Whether a detail entry exists for a thread.
    pub(crate) fn has_detail(&self, thread_id: Uuid) -> bool {
        self.details.contains_key(&thread_id)
    }

    /// Whether a community's thread list is cached.
    pub(crate) fn has_thread_list(&self, community_id: Uuid) -> bool {
        self.threads.contains_key(&community_id)
    }

    /// Whether a thread's reply list is cached.
    pub(crate) fn has_reply_list(&self, thread_id: Uuid) -> bool {
        self.replies.contains_key(&thread_id)
    }

    // =========================================================================
    // Hydration (authoritative pull snapshots)
    // =========================================================================

    /// Replace the communities list with an authoritative snapshot.
    pub fn replace_communities(&self, rows: Vec<Community>) {
        let mut collection = Collection::new();
        for community in rows {
            self.mark_applied(AppliedKey::Entity(community.id));
            let slot = community_slot(&collection, &community);
            collection.insert_at(slot, community, Provenance::Confirmed);
        }

        if let Ok(mut guard) = self.communities.write() {
            *guard = Some(collection);
        }
        trace!("cache: communities hydrated");
        self.notify(CollectionKey::Communities);
    }

    /// Replace a community's thread list with an authoritative
    /// snapshot, carrying over still-pending speculative threads.
    pub fn replace_threads(&self, community_id: Uuid, rows: Vec<Thread>) {
        let mut collection = Collection::new();
        for thread in rows {
            self.mark_applied(AppliedKey::Entity(thread.id));
            let slot = crate::collection::thread_slot(&collection, &thread);
            collection.insert_at(slot, thread, Provenance::Confirmed);
        }

        if let Some(old) = self.threads.get(&community_id) {
            for id in old.speculative_ids() {
                if collection.contains(id) {
                    continue;
                }
                if let Some(stored) = old.get(id) {
                    let slot = crate::collection::thread_slot(&collection, &stored.value);
                    collection.insert_at(slot, stored.value.clone(), Provenance::Speculative);
                }
            }
        }

        self.threads.insert(community_id, collection);
        trace!(community_id = %community_id, "cache: thread list hydrated");
        self.notify(CollectionKey::CommunityThreads(community_id));
    }

    /// Replace a thread's detail entry and reply list with an
    /// authoritative snapshot, carrying over still-pending speculative
    /// replies. Copies of the thread in its community list converge to
    /// the authoritative row.
    pub fn replace_thread_detail(&self, thread: Thread, reply_rows: Vec<Reply>) {
        let thread_id = thread.id;
        self.mark_applied(AppliedKey::Entity(thread_id));

        let mut collection = Collection::new();
        for reply in reply_rows {
            self.mark_applied(AppliedKey::Entity(reply.id));
            let slot = crate::collection::reply_slot(&collection, &reply);
            collection.insert_at(slot, reply, Provenance::Confirmed);
        }

        if let Some(old) = self.replies.get(&thread_id) {
            for id in old.speculative_ids() {
                if collection.contains(id) {
                    continue;
                }
                if let Some(stored) = old.get(id) {
                    let slot = crate::collection::reply_slot(&collection, &stored.value);
                    collection.insert_at(slot, stored.value.clone(), Provenance::Speculative);
                }
            }
        }

        self.replies.insert(thread_id, collection);
        self.notify(CollectionKey::ThreadReplies(thread_id));

        // Converge the community list copy before setting the detail.
        self.with_threads(thread.community_id, |threads| {
            if threads.contains(thread_id) {
                let slot = crate::collection::thread_slot(threads, &thread);
                threads.replace(thread.clone(), Provenance::Confirmed);
                threads.reposition(thread_id, slot);
            }
        });

        self.put_detail(thread, Provenance::Confirmed);
        trace!(thread_id = %thread_id, "cache: thread detail hydrated");
    }

    /// Evict a community's cached thread list.
    pub(crate) fn evict_community_threads(&self, community_id: Uuid) {
        if self.threads.remove(&community_id).is_some() {
            self.notify(CollectionKey::CommunityThreads(community_id));
        }
    }

    /// Evict a thread's detail entry and reply list, e.g. when the user
    /// explicitly discards a detail screen's data.
    pub fn evict_thread_detail(&self, thread_id: Uuid) {
        if self.details.remove(&thread_id).is_some() {
            self.notify(CollectionKey::ThreadDetail(thread_id));
        }
        if self.replies.remove(&thread_id).is_some() {
            self.notify(CollectionKey::ThreadReplies(thread_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{community, reply, thread};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_store_reads() {
        let store = CacheStore::new();
        assert!(store.communities().is_none());
        assert!(store.threads(Uuid::new_v4()).is_none());
        assert!(store.thread_detail(Uuid::new_v4()).is_none());
        assert!(store.replies(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_replace_communities_orders_by_sort_order() {
        let store = CacheStore::new();
        let mut a = community("general");
        a.sort_order = 2;
        let mut b = community("announcements");
        b.sort_order = 1;

        store.replace_communities(vec![a, b]);

        let names: Vec<_> = store
            .communities()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["announcements", "general"]);
    }

    #[test]
    fn test_replace_threads_carries_speculative_entries() {
        let store = CacheStore::new();
        let community_id = Uuid::new_v4();
        let confirmed = thread(community_id, "confirmed", false, 10);
        let speculative = thread(community_id, "pending", false, 20);

        store.replace_threads(community_id, vec![confirmed.clone()]);
        store.with_threads(community_id, |threads| {
            let slot = crate::collection::thread_slot(threads, &speculative);
            threads.insert_at(slot, speculative.clone(), Provenance::Speculative);
        });

        // A re-pull that does not yet include the pending thread must
        // not drop it.
        store.replace_threads(community_id, vec![confirmed]);

        let titles: Vec<_> = store
            .threads(community_id)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["pending", "confirmed"]);
    }

    #[test]
    fn test_replace_thread_detail_converges_list_copy() {
        let store = CacheStore::new();
        let community_id = Uuid::new_v4();
        let mut t = thread(community_id, "original", false, 10);
        store.replace_threads(community_id, vec![t.clone()]);

        t.title = "edited".into();
        t.reply_count = 7;
        store.replace_thread_detail(t.clone(), vec![reply(t.id, "first", 11)]);

        let list_copy = &store.threads(community_id).unwrap()[0];
        assert_eq!(list_copy.title, "edited");
        assert_eq!(list_copy.reply_count, 7);
        assert_eq!(store.thread_detail(t.id).unwrap().title, "edited");
        assert_eq!(store.replies(t.id).unwrap().len(), 1);
    }

    #[test]
    fn test_subscribe_receives_notifications() {
        let store = CacheStore::new();
        let mut updates = store.subscribe();

        store.replace_communities(vec![community("general")]);

        assert_eq!(updates.try_recv().unwrap(), CollectionKey::Communities);
    }

    #[test]
    fn test_mark_applied_is_first_write_wins() {
        let store = CacheStore::new();
        let key = AppliedKey::Entity(Uuid::new_v4());
        assert!(store.mark_applied(key));
        assert!(!store.mark_applied(key));
        assert!(store.unmark_applied(key));
        assert!(!store.unmark_applied(key));
    }

    #[test]
    fn test_evict_thread_detail() {
        let store = CacheStore::new();
        let community_id = Uuid::new_v4();
        let t = thread(community_id, "t", false, 1);
        store.replace_thread_detail(t.clone(), vec![]);
        assert!(store.thread_detail(t.id).is_some());

        store.evict_thread_detail(t.id);
        assert!(store.thread_detail(t.id).is_none());
        assert!(store.replies(t.id).is_none());
    }
}
