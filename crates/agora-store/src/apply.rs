//! Shared apply routines for entity changes.
//!
//! Both update paths land here: the change-event dispatcher routes
//! decoded push events to these methods, and the optimistic mutation
//! coordinator calls the same methods for speculative writes and their
//! confirmation or rollback. Placement and counter arithmetic exist
//! once, so the paths cannot diverge.
//!
//! Idempotence: entity inserts settle by id through the applied
//! ledger; reaction toggles settle by `(user, target, type)`. A second
//! arrival of the same logical mutation converges fields but never
//! re-applies counter arithmetic.

use tracing::{debug, trace};
use uuid::Uuid;

use crate::cache::{AppliedKey, CacheStore};
use crate::collection::{community_slot, reply_slot, thread_slot};
use crate::counters::{CounterKind, CounterTarget};
use crate::types::{Community, LatestReply, Provenance, Reaction, ReactionTarget, Reply, Thread};

impl CacheStore {
    // =========================================================================
    // Communities
    // =========================================================================

    /// Insert a community into the communities list by `sort_order`.
    /// An insert for an id already present converges fields instead.
    pub fn apply_community_insert(&self, community: Community) {
        self.mark_applied(AppliedKey::Entity(community.id));
        self.with_communities(|communities| {
            let slot = community_slot(communities, &community);
            if communities.contains(community.id) {
                communities.replace(community.clone(), Provenance::Confirmed);
                communities.reposition(community.id, slot);
            } else {
                communities.insert_at(slot, community.clone(), Provenance::Confirmed);
            }
        });
        trace!(community_id = %community.id, "apply: community insert");
    }

    /// Converge the cached copy of a community, repositioning it if its
    /// `sort_order` moved. Unknown communities are ignored.
    pub fn apply_community_update(&self, community: Community) {
        let replaced = self
            .with_communities(|communities| {
                if communities.replace(community.clone(), Provenance::Confirmed) {
                    let slot = community_slot(communities, &community);
                    communities.reposition(community.id, slot);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if !replaced {
            trace!(community_id = %community.id, "apply: update for uncached community ignored");
        }
    }

    /// Remove a community and evict its cached thread list.
    pub fn apply_community_remove(&self, community_id: Uuid) {
        self.with_communities(|communities| communities.remove(community_id));
        self.evict_community_threads(community_id);
        self.unmark_applied(AppliedKey::Entity(community_id));
        trace!(community_id = %community_id, "apply: community remove");
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Insert a thread into every collection that denormalizes it.
    ///
    /// Positions the thread by the presentation-order rule and bumps
    /// the owning community's `thread_count` exactly once per thread
    /// id. An insert for an id already present converges fields
    /// instead of duplicating the entry.
    pub fn apply_thread_insert(&self, thread: Thread, provenance: Provenance) {
        let thread_id = thread.id;
        let community_id = thread.community_id;
        let newly = self.mark_applied(AppliedKey::Entity(thread_id));

        self.with_threads(community_id, |threads| {
            let slot = thread_slot(threads, &thread);
            if threads.contains(thread_id) {
                threads.replace(thread.clone(), provenance);
                threads.reposition(thread_id, slot);
            } else {
                threads.insert_at(slot, thread.clone(), provenance);
            }
        });

        if self.has_detail(thread_id) {
            self.with_detail(thread_id, |stored| {
                stored.value = thread.clone();
                stored.provenance = provenance;
            });
        }

        if newly {
            self.adjust_counter(
                CounterTarget::Community(community_id),
                CounterKind::ThreadCount,
                1,
            );
        }
        trace!(thread_id = %thread_id, newly, "apply: thread insert");
    }

    /// Converge every cached copy of a thread to an updated row.
    ///
    /// Unknown threads are ignored: an update for something never
    /// cached has nothing to reconcile.
    pub fn apply_thread_update(&self, thread: Thread) {
        let thread_id = thread.id;
        let mut touched = false;

        self.with_threads(thread.community_id, |threads| {
            if threads.contains(thread_id) {
                // Slot first: the stored entry's pin state decides
                // whether this update is a pin transition.
                let slot = thread_slot(threads, &thread);
                threads.replace(thread.clone(), Provenance::Confirmed);
                threads.reposition(thread_id, slot);
                touched = true;
            }
        });

        if self.has_detail(thread_id) {
            self.with_detail(thread_id, |stored| {
                stored.value = thread.clone();
                stored.provenance = Provenance::Confirmed;
            });
            touched = true;
        }

        if !touched {
            trace!(thread_id = %thread_id, "apply: thread update for uncached thread ignored");
        }
    }

    /// Remove a thread from every collection and settle its counter
    /// contribution.
    pub fn apply_thread_remove(&self, thread_id: Uuid, community_hint: Option<Uuid>) {
        let homes = match community_hint {
            Some(community_id) => vec![community_id],
            None => self.thread_list_homes(thread_id),
        };
        let mut owner = community_hint;

        for community_id in homes {
            let removed = self.with_threads(community_id, |threads| threads.remove(thread_id));
            if removed.flatten().is_some() {
                owner = Some(community_id);
            }
        }
        if let Some(stored) = self.remove_detail(thread_id) {
            owner = owner.or(Some(stored.value.community_id));
        }
        self.evict_thread_detail(thread_id);

        let was_applied = self.unmark_applied(AppliedKey::Entity(thread_id));
        if was_applied {
            if let Some(community_id) = owner {
                self.adjust_counter(
                    CounterTarget::Community(community_id),
                    CounterKind::ThreadCount,
                    -1,
                );
            }
        }
        trace!(thread_id = %thread_id, was_applied, "apply: thread remove");
    }

    /// Replace a speculative thread with its authoritative row.
    ///
    /// When the push event for the same create already arrived (and
    /// settled the counter under the real id), the speculative bump is
    /// reversed, so the create is counted exactly once in either
    /// arrival order.
    pub fn confirm_thread(&self, temp_id: Uuid, thread: Thread) {
        let community_id = thread.community_id;

        self.with_threads(community_id, |threads| threads.remove(temp_id));
        self.remove_detail(temp_id);

        let temp_was_applied = self.unmark_applied(AppliedKey::Entity(temp_id));
        let real_newly = self.mark_applied(AppliedKey::Entity(thread.id));
        if temp_was_applied && !real_newly {
            self.adjust_counter(
                CounterTarget::Community(community_id),
                CounterKind::ThreadCount,
                -1,
            );
        }

        self.with_threads(community_id, |threads| {
            let slot = thread_slot(threads, &thread);
            if threads.contains(thread.id) {
                threads.replace(thread.clone(), Provenance::Confirmed);
                threads.reposition(thread.id, slot);
            } else {
                threads.insert_at(slot, thread.clone(), Provenance::Confirmed);
            }
        });
        if self.has_detail(thread.id) {
            self.with_detail(thread.id, |stored| {
                stored.value = thread.clone();
                stored.provenance = Provenance::Confirmed;
            });
        }
        debug!(temp_id = %temp_id, thread_id = %thread.id, "confirmed speculative thread");
    }

    /// Remove a failed speculative thread and restore the counter.
    pub fn rollback_thread(&self, temp_id: Uuid, community_id: Uuid) {
        self.with_threads(community_id, |threads| threads.remove(temp_id));
        self.remove_detail(temp_id);

        if self.unmark_applied(AppliedKey::Entity(temp_id)) {
            self.adjust_counter(
                CounterTarget::Community(community_id),
                CounterKind::ThreadCount,
                -1,
            );
        }
        debug!(temp_id = %temp_id, "rolled back speculative thread");
    }

    // =========================================================================
    // Replies
    // =========================================================================

    /// Insert a reply: bump the owning thread's `reply_count` and
    /// latest-reply summary wherever that thread appears, and place the
    /// reply in the thread's reply list if it is cached.
    ///
    /// Returns false for an orphan (owning thread not cached anywhere).
    pub fn apply_reply_insert(&self, reply: Reply, provenance: Provenance) -> bool {
        let thread_id = reply.thread_id;
        if self.find_thread(thread_id).is_none() && !self.has_reply_list(thread_id) {
            trace!(reply_id = %reply.id, thread_id = %thread_id, "apply: orphan reply ignored");
            return false;
        }

        let newly = self.mark_applied(AppliedKey::Entity(reply.id));

        self.with_replies(thread_id, |replies| {
            let slot = reply_slot(replies, &reply);
            replies.insert_at(slot, reply.clone(), provenance);
        });

        if newly {
            self.adjust_counter(CounterTarget::Thread(thread_id), CounterKind::ReplyCount, 1);
            self.bump_latest_reply(
                thread_id,
                LatestReply {
                    replied_at: reply.created_at,
                    author_alias: reply.author_alias.clone(),
                },
            );
        }
        trace!(reply_id = %reply.id, newly, "apply: reply insert");
        true
    }

    /// Converge every cached copy of a reply to an updated row.
    pub fn apply_reply_update(&self, reply: Reply) {
        let replaced = self
            .with_replies(reply.thread_id, |replies| {
                replies.replace(reply.clone(), Provenance::Confirmed)
            })
            .unwrap_or(false);
        if !replaced {
            trace!(reply_id = %reply.id, "apply: reply update for uncached reply ignored");
        }
    }

    /// Remove a reply and settle the owning thread's counters.
    pub fn apply_reply_remove(&self, reply_id: Uuid, thread_hint: Option<Uuid>) {
        let thread_id = thread_hint.or_else(|| self.reply_list_homes(reply_id).first().copied());

        if let Some(thread_id) = thread_id {
            self.with_replies(thread_id, |replies| replies.remove(reply_id));
        }

        let was_applied = self.unmark_applied(AppliedKey::Entity(reply_id));
        if was_applied {
            if let Some(thread_id) = thread_id {
                self.adjust_counter(CounterTarget::Thread(thread_id), CounterKind::ReplyCount, -1);
                self.refresh_latest_reply(thread_id, None);
            }
        }
        trace!(reply_id = %reply_id, was_applied, "apply: reply remove");
    }

    /// Replace a speculative reply with its authoritative row, settling
    /// the counter exactly once regardless of push-event arrival order.
    pub fn confirm_reply(&self, temp_id: Uuid, reply: Reply) {
        let thread_id = reply.thread_id;

        self.with_replies(thread_id, |replies| replies.remove(temp_id));

        let temp_was_applied = self.unmark_applied(AppliedKey::Entity(temp_id));
        let real_newly = self.mark_applied(AppliedKey::Entity(reply.id));
        if temp_was_applied && !real_newly {
            self.adjust_counter(CounterTarget::Thread(thread_id), CounterKind::ReplyCount, -1);
        }

        self.with_replies(thread_id, |replies| {
            let slot = reply_slot(replies, &reply);
            replies.insert_at(slot, reply.clone(), Provenance::Confirmed);
        });

        if self.has_reply_list(thread_id) {
            self.refresh_latest_reply(thread_id, None);
        } else {
            self.bump_latest_reply(
                thread_id,
                LatestReply {
                    replied_at: reply.created_at,
                    author_alias: reply.author_alias.clone(),
                },
            );
        }
        debug!(temp_id = %temp_id, reply_id = %reply.id, "confirmed speculative reply");
    }

    /// Remove a failed speculative reply, restoring the owning thread's
    /// counter and latest-reply summary.
    pub fn rollback_reply(
        &self,
        temp_id: Uuid,
        thread_id: Uuid,
        prior_latest: Option<LatestReply>,
    ) {
        self.with_replies(thread_id, |replies| replies.remove(temp_id));

        if self.unmark_applied(AppliedKey::Entity(temp_id)) {
            self.adjust_counter(CounterTarget::Thread(thread_id), CounterKind::ReplyCount, -1);
            self.refresh_latest_reply(thread_id, Some(prior_latest));
        }
        debug!(temp_id = %temp_id, "rolled back speculative reply");
    }

    /// Recompute the latest-reply summary from the cached reply list,
    /// falling back to an explicit snapshot when the list is not
    /// cached.
    fn refresh_latest_reply(&self, thread_id: Uuid, fallback: Option<Option<LatestReply>>) {
        if let Some(replies) = self.replies(thread_id) {
            let latest = replies
                .iter()
                .max_by_key(|r| r.created_at)
                .map(|r| LatestReply {
                    replied_at: r.created_at,
                    author_alias: r.author_alias.clone(),
                });
            self.set_latest_reply(thread_id, latest);
        } else if let Some(snapshot) = fallback {
            self.set_latest_reply(thread_id, snapshot);
        }
    }

    // =========================================================================
    // Reactions
    // =========================================================================

    /// Count a reaction on its target in every collection holding a
    /// copy. No-op for duplicates of an already-settled toggle and for
    /// orphans (target not cached anywhere).
    ///
    /// Returns true if the reaction was newly counted.
    pub fn apply_reaction_insert(&self, reaction: &Reaction) -> bool {
        if !self.holds_target(reaction.target) {
            trace!(reaction_id = %reaction.id, target = %reaction.target, "apply: orphan reaction ignored");
            return false;
        }

        let key = AppliedKey::reaction(reaction);
        if !self.mark_applied(key) {
            trace!(reaction_id = %reaction.id, "apply: reaction already settled");
            return false;
        }
        self.index_reaction(reaction.id, key);

        self.adjust_counter(
            reaction_counter_target(reaction.target),
            CounterKind::ReactionCount,
            1,
        );
        true
    }

    /// Un-count a settled reaction toggle. Idempotent: removing a
    /// toggle that was never settled (or already removed) is a no-op.
    ///
    /// Returns true if the reaction was un-counted.
    pub fn apply_reaction_remove(&self, key: AppliedKey) -> bool {
        if !self.unmark_applied(key) {
            trace!("apply: reaction remove for unsettled toggle ignored");
            return false;
        }
        self.forget_reaction_key(key);

        if let AppliedKey::Reaction { target, .. } = key {
            if self.holds_target(target) {
                self.adjust_counter(
                    reaction_counter_target(target),
                    CounterKind::ReactionCount,
                    -1,
                );
            }
        }
        true
    }

    /// Un-count a reaction known only by its row id (push deletes with
    /// a partial old-row payload).
    pub fn apply_reaction_remove_by_id(&self, reaction_id: Uuid) -> bool {
        match self.take_reaction_key(reaction_id) {
            Some(key) => self.apply_reaction_remove(key),
            None => {
                trace!(reaction_id = %reaction_id, "apply: delete for unknown reaction ignored");
                false
            }
        }
    }
}

fn reaction_counter_target(target: ReactionTarget) -> CounterTarget {
    match target {
        ReactionTarget::Thread(id) => CounterTarget::Thread(id),
        ReactionTarget::Reply(id) => CounterTarget::Reply(id),
    }
}
