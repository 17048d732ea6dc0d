//! Optimistic mutation coordinator.
//!
//! Writes apply to the cache immediately under a locally-generated id,
//! then the authoritative call runs; on success the speculative entry
//! is replaced by the server's row, on failure it is rolled back.
//! Confirmation and rollback go through the store's shared apply
//! routines, so a push event for the same logical mutation (in either
//! arrival order) settles counters exactly once.

use std::sync::{Arc, RwLock};

use agora_store::{
    AppliedKey, CacheStore, Provenance, Reaction, ReactionTarget, ReactionType, Reply, Thread,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiClient, NewReply, NewThread};
use crate::error::{ApiError, MutationError};

/// The local user's identity as mutations see it.
///
/// The alias is what gets stamped on speculative rows; until one is
/// set, content mutations are refused.
pub struct LocalIdentity {
    user_id: Uuid,
    alias: RwLock<Option<String>>,
}

impl LocalIdentity {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            alias: RwLock::new(None),
        }
    }

    pub fn with_alias(user_id: Uuid, alias: impl Into<String>) -> Self {
        Self {
            user_id,
            alias: RwLock::new(Some(alias.into())),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn alias(&self) -> Option<String> {
        self.alias.read().ok()?.clone()
    }

    pub fn set_alias(&self, alias: impl Into<String>) {
        if let Ok(mut guard) = self.alias.write() {
            *guard = Some(alias.into());
        }
    }
}

/// Coordinates pulls and optimistic writes against one store.
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    api: Arc<dyn ApiClient>,
    identity: LocalIdentity,
}

impl MutationCoordinator {
    pub fn new(store: Arc<CacheStore>, api: Arc<dyn ApiClient>, identity: LocalIdentity) -> Self {
        Self {
            store,
            api,
            identity,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    // =========================================================================
    // Hydration pulls
    // =========================================================================

    /// Pull the communities list into the cache.
    pub async fn refresh_communities(&self) -> Result<(), MutationError> {
        let rows = self.api.list_communities().await?;
        debug!(count = rows.len(), "hydrated communities");
        self.store.replace_communities(rows);
        Ok(())
    }

    /// Pull one community's thread list into the cache.
    pub async fn refresh_threads(&self, community_id: Uuid) -> Result<(), MutationError> {
        let rows = self.api.list_threads(community_id).await?;
        debug!(community_id = %community_id, count = rows.len(), "hydrated threads");
        self.store.replace_threads(community_id, rows);
        Ok(())
    }

    /// Pull one thread's detail and reply list into the cache.
    pub async fn refresh_thread_detail(&self, thread_id: Uuid) -> Result<(), MutationError> {
        let (thread, replies) = self.api.get_thread_detail(thread_id).await?;
        debug!(thread_id = %thread_id, replies = replies.len(), "hydrated thread detail");
        self.store.replace_thread_detail(thread, replies);
        Ok(())
    }

    // =========================================================================
    // Optimistic writes
    // =========================================================================

    /// Create a thread: speculative insert, authoritative call, then
    /// confirm or roll back.
    pub async fn create_thread(
        &self,
        community_id: Uuid,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Thread, MutationError> {
        let alias = self.identity.alias().ok_or(MutationError::MissingAlias)?;
        let title = title.into();
        let content = content.into();
        let now = Utc::now();

        let speculative = Thread {
            id: Uuid::new_v4(),
            community_id,
            title: title.clone(),
            content: content.clone(),
            author_alias: alias.clone(),
            is_pinned: false,
            is_flagged: false,
            created_at: now,
            updated_at: now,
            reply_count: 0,
            reaction_count: 0,
            latest_reply: None,
        };
        let temp_id = speculative.id;
        self.store
            .apply_thread_insert(speculative, Provenance::Speculative);

        let request = NewThread {
            community_id,
            title,
            content,
            author_alias: alias,
        };
        match self.api.create_thread(request).await {
            Ok(thread) => {
                self.store.confirm_thread(temp_id, thread.clone());
                Ok(thread)
            }
            Err(e) => {
                warn!(error = %e, "thread create failed, rolling back");
                self.store.rollback_thread(temp_id, community_id);
                Err(e.into())
            }
        }
    }

    /// Create a reply on a cached thread.
    ///
    /// The owning thread must be cached somewhere; the speculative
    /// reply bumps its counters and latest-reply summary immediately,
    /// and a failed call restores both.
    pub async fn create_reply(
        &self,
        thread_id: Uuid,
        parent_reply_id: Option<Uuid>,
        content: impl Into<String>,
    ) -> Result<Reply, MutationError> {
        let alias = self.identity.alias().ok_or(MutationError::MissingAlias)?;
        let content = content.into();

        let prior_latest = self
            .store
            .find_thread(thread_id)
            .ok_or_else(|| MutationError::PreconditionMissing(format!("thread {thread_id}")))?
            .latest_reply;

        let now = Utc::now();
        let speculative = Reply {
            id: Uuid::new_v4(),
            thread_id,
            parent_reply_id,
            author_alias: alias.clone(),
            content: content.clone(),
            created_at: now,
            updated_at: now,
            reaction_count: 0,
        };
        let temp_id = speculative.id;
        self.store
            .apply_reply_insert(speculative, Provenance::Speculative);

        let request = NewReply {
            thread_id,
            parent_reply_id,
            content,
            author_alias: alias,
        };
        match self.api.create_reply(request).await {
            Ok(reply) => {
                self.store.confirm_reply(temp_id, reply.clone());
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, "reply create failed, rolling back");
                self.store.rollback_reply(temp_id, thread_id, prior_latest);
                Err(e.into())
            }
        }
    }

    /// Add a reaction for the local user.
    ///
    /// A no-op if the user already holds this reaction locally; the
    /// idempotence key is the `(user, target, type)` triple, so the
    /// push event for a confirmed add never double-counts.
    pub async fn add_reaction(
        &self,
        target: ReactionTarget,
        reaction_type: ReactionType,
    ) -> Result<(), MutationError> {
        if !self.store.holds_target(target) {
            return Err(MutationError::PreconditionMissing(target.to_string()));
        }

        let speculative = Reaction {
            id: Uuid::new_v4(),
            user_id: self.identity.user_id,
            target,
            reaction_type,
            created_at: Utc::now(),
        };
        if !self.store.apply_reaction_insert(&speculative) {
            debug!(target = %target, %reaction_type, "reaction already held, skipping");
            return Ok(());
        }

        match self
            .api
            .add_reaction(self.identity.user_id, target, reaction_type)
            .await
        {
            Ok(reaction) => {
                // Re-key the row-id index so a later delete event for
                // the authoritative row resolves to the same toggle.
                self.store.reindex_reaction(speculative.id, reaction.id);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "reaction add failed, rolling back");
                self.store.apply_reaction_remove_by_id(speculative.id);
                Err(e.into())
            }
        }
    }

    /// Remove the local user's reaction.
    ///
    /// Removing a reaction the user does not hold locally still runs
    /// the authoritative call; a server-side `NotFound` is treated as
    /// already-removed.
    pub async fn remove_reaction(
        &self,
        target: ReactionTarget,
        reaction_type: ReactionType,
    ) -> Result<(), MutationError> {
        let key = AppliedKey::Reaction {
            user_id: self.identity.user_id,
            target,
            reaction_type,
        };
        let was_held = self.store.apply_reaction_remove(key);

        match self
            .api
            .remove_reaction(self.identity.user_id, target, reaction_type)
            .await
        {
            Ok(()) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(e) => {
                warn!(error = %e, "reaction remove failed, rolling back");
                if was_held {
                    let restored = Reaction {
                        id: Uuid::new_v4(),
                        user_id: self.identity.user_id,
                        target,
                        reaction_type,
                        created_at: Utc::now(),
                    };
                    self.store.apply_reaction_insert(&restored);
                }
                Err(e.into())
            }
        }
    }
}
