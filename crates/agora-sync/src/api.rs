//! Authoritative API seam.
//!
//! The coordinator talks to the server through this trait: pulls for
//! hydration, writes for mutations. The server assigns ids and
//! timestamps; everything the trait returns is authoritative.

use agora_store::{Community, Reaction, ReactionTarget, ReactionType, Reply, Thread};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ApiError;

/// Fields of a thread create request.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub community_id: Uuid,
    pub title: String,
    pub content: String,
    pub author_alias: String,
}

/// Fields of a reply create request.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub thread_id: Uuid,
    pub parent_reply_id: Option<Uuid>,
    pub content: String,
    pub author_alias: String,
}

#[async_trait]
pub trait ApiClient: Send + Sync + 'static {
    /// All communities, in presentation order.
    async fn list_communities(&self) -> Result<Vec<Community>, ApiError>;

    /// Threads in one community, with derived counters populated.
    async fn list_threads(&self, community_id: Uuid) -> Result<Vec<Thread>, ApiError>;

    /// One thread plus its full reply list.
    async fn get_thread_detail(&self, thread_id: Uuid) -> Result<(Thread, Vec<Reply>), ApiError>;

    /// Create a thread; returns the authoritative row.
    async fn create_thread(&self, new: NewThread) -> Result<Thread, ApiError>;

    /// Create a reply; returns the authoritative row.
    async fn create_reply(&self, new: NewReply) -> Result<Reply, ApiError>;

    /// Record a reaction; returns the authoritative row. Adding a
    /// reaction the user already holds is idempotent server-side.
    async fn add_reaction(
        &self,
        user_id: Uuid,
        target: ReactionTarget,
        reaction_type: ReactionType,
    ) -> Result<Reaction, ApiError>;

    /// Remove a reaction by its logical key.
    async fn remove_reaction(
        &self,
        user_id: Uuid,
        target: ReactionTarget,
        reaction_type: ReactionType,
    ) -> Result<(), ApiError>;
}
