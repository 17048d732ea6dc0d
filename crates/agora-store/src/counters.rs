//! Aggregate counter reconciliation.
//!
//! Derived counters (`thread_count`, `reply_count`, `reaction_count`)
//! are physically duplicated across collections. `adjust_counter` is
//! the only place the arithmetic happens: both the push-event path and
//! the optimistic path funnel through it, so the two can never disagree
//! about how a counter moves. Decrements clamp at zero.

use tracing::{trace, warn};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::collection::thread_slot;
use crate::types::LatestReply;

/// Which derived counter to adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    ThreadCount,
    ReplyCount,
    ReactionCount,
}

/// The entity whose counter copies should move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterTarget {
    Community(Uuid),
    Thread(Uuid),
    Reply(Uuid),
}

/// Clamped counter arithmetic; decrements below zero saturate.
fn apply_delta(value: u32, delta: i32) -> u32 {
    value.saturating_add_signed(delta)
}

impl CacheStore {
    /// Adjust one derived counter on every cached copy of the target.
    pub fn adjust_counter(&self, target: CounterTarget, kind: CounterKind, delta: i32) {
        match (target, kind) {
            (CounterTarget::Community(community_id), CounterKind::ThreadCount) => {
                self.with_communities(|communities| {
                    communities.update_value(community_id, |c| {
                        c.thread_count = apply_delta(c.thread_count, delta);
                    });
                });
            }
            (CounterTarget::Thread(thread_id), CounterKind::ReplyCount) => {
                self.adjust_thread_copies(thread_id, |t| {
                    t.reply_count = apply_delta(t.reply_count, delta);
                });
            }
            (CounterTarget::Thread(thread_id), CounterKind::ReactionCount) => {
                self.adjust_thread_copies(thread_id, |t| {
                    t.reaction_count = apply_delta(t.reaction_count, delta);
                });
            }
            (CounterTarget::Reply(reply_id), CounterKind::ReactionCount) => {
                for thread_id in self.reply_list_homes(reply_id) {
                    self.with_replies(thread_id, |replies| {
                        replies.update_value(reply_id, |r| {
                            r.reaction_count = apply_delta(r.reaction_count, delta);
                        });
                    });
                }
            }
            (target, kind) => {
                warn!(?target, ?kind, "counter kind does not apply to target");
            }
        }
        trace!(?target, ?kind, delta, "counter adjusted");
    }

    /// Run a counter edit on every cached copy of a thread: its
    /// community-list entries and its detail entry.
    fn adjust_thread_copies(&self, thread_id: Uuid, edit: impl Fn(&mut crate::types::Thread)) {
        for community_id in self.thread_list_homes(thread_id) {
            self.with_threads(community_id, |threads| {
                threads.update_value(thread_id, &edit);
            });
        }
        self.with_detail(thread_id, |stored| edit(&mut stored.value));
    }

    /// Advance the denormalized latest-reply summary on every cached
    /// copy of the thread, but only forwards. Repositions the thread in
    /// its community lists since the activity key may have moved.
    pub fn bump_latest_reply(&self, thread_id: Uuid, latest: LatestReply) {
        self.edit_latest_reply(thread_id, |current| {
            let newer = current
                .as_ref()
                .is_none_or(|existing| latest.replied_at > existing.replied_at);
            if newer {
                *current = Some(latest.clone());
            }
        });
    }

    /// Set the latest-reply summary to an exact value on every cached
    /// copy of the thread (the rollback path restores a snapshot).
    pub fn set_latest_reply(&self, thread_id: Uuid, latest: Option<LatestReply>) {
        self.edit_latest_reply(thread_id, |current| {
            *current = latest.clone();
        });
    }

    fn edit_latest_reply(&self, thread_id: Uuid, edit: impl Fn(&mut Option<LatestReply>)) {
        for community_id in self.thread_list_homes(thread_id) {
            self.with_threads(community_id, |threads| {
                threads.update_value(thread_id, |t| edit(&mut t.latest_reply));
                if let Some(stored) = threads.get(thread_id) {
                    let value = stored.value.clone();
                    let slot = thread_slot(threads, &value);
                    threads.reposition(thread_id, slot);
                }
            });
        }
        self.with_detail(thread_id, |stored| edit(&mut stored.value.latest_reply));
    }
}
