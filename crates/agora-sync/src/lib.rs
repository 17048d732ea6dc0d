//! Subscription and mutation layer for Agora's client cache.
//!
//! Sits between the transport (push channels, authoritative API) and
//! the `agora-store` cache: the subscription manager keeps one channel
//! open per distinct topic and pumps push events into the store's
//! dispatcher, while the mutation coordinator applies writes
//! optimistically and reconciles them against the server's response.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod subscription;
pub mod topics;

pub use api::{ApiClient, NewReply, NewThread};
pub use coordinator::{LocalIdentity, MutationCoordinator};
pub use error::{ApiError, ChannelError, MutationError};
pub use subscription::{SubscriptionManager, TopicHandle};
pub use topics::{ChannelProvider, ChannelStatus, TopicKey};
