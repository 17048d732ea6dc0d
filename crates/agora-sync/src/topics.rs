//! Topic channels.
//!
//! A topic names one server-side change stream. The canonical string
//! form doubles as the channel name on the wire, so two subscriptions
//! to the same logical stream always collapse onto one channel.

use agora_store::{PushEvent, ReactionTarget};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ChannelError;

/// Names one push-event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKey {
    /// Changes to the communities list.
    Communities,
    /// Thread changes within one community.
    CommunityThreads(Uuid),
    /// Reply changes within one thread.
    ThreadReplies(Uuid),
    /// Reaction changes on one thread or reply.
    Reactions(ReactionTarget),
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Communities => write!(f, "communities"),
            Self::CommunityThreads(id) => write!(f, "community:{id}:threads"),
            Self::ThreadReplies(id) => write!(f, "thread:{id}:replies"),
            Self::Reactions(target) => write!(f, "reactions:{target}"),
        }
    }
}

/// Lifecycle state of one topic's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Opening, or reconnecting after a drop.
    Connecting,
    /// Live and delivering events.
    Connected,
    /// Reconnection attempts exhausted.
    Error,
    /// Torn down by the last unsubscribe.
    Closed,
}

/// Transport seam for push-event channels.
///
/// The production implementation speaks to the realtime server; tests
/// substitute an in-memory provider.
#[async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    /// Open a channel for one topic. Events arrive on the returned
    /// receiver until the channel drops; the subscription manager owns
    /// reconnection.
    async fn open(&self, topic: &TopicKey) -> Result<mpsc::Receiver<PushEvent>, ChannelError>;
}
