//! Core entity types for Agora's cached collections.
//!
//! Every entity is immutable-by-replacement: a mutation produces a new
//! value for a key, never an in-place field edit visible to other
//! holders of a previously-read snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Table name for community rows.
pub const COMMUNITY_TABLE: &str = "communities";

/// Table name for discussion thread rows.
pub const THREAD_TABLE: &str = "threads";

/// Table name for reply rows.
pub const REPLY_TABLE: &str = "replies";

/// Table name for reaction rows.
pub const REACTION_TABLE: &str = "reactions";

/// Where a cache entry came from.
///
/// Speculative entries are synthesized locally by the mutation
/// coordinator before the authoritative call resolves; confirmed
/// entries arrived from the server (pull snapshot, RPC result, or
/// push event). Reconciliation queries this tag instead of parsing
/// id conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Locally synthesized, not yet server-confirmed.
    Speculative,
    /// Server-authoritative.
    Confirmed,
}

/// A community that threads belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Derived count of threads in this community. Never negative.
    pub thread_count: u32,
    /// Presentation order within the communities list (ascending).
    pub sort_order: i32,
    pub is_active: bool,
}

/// Denormalized summary of the most recent reply on a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestReply {
    pub replied_at: DateTime<Utc>,
    pub author_alias: String,
}

/// A discussion thread.
///
/// The same thread value appears in its community's thread list and in
/// the single-thread detail cache; all copies converge after
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub community_id: Uuid,
    pub title: String,
    pub content: String,
    pub author_alias: String,
    pub is_pinned: bool,
    pub is_flagged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived count of replies. Never negative.
    pub reply_count: u32,
    /// Derived count of reactions targeting this thread. Never negative.
    pub reaction_count: u32,
    /// Denormalized summary of the most recent reply, if any.
    pub latest_reply: Option<LatestReply>,
}

impl Thread {
    /// The recency key used to order unpinned threads.
    ///
    /// A new reply bumps the thread; reactions do not.
    pub fn activity_at(&self) -> DateTime<Utc> {
        match &self.latest_reply {
            Some(latest) if latest.replied_at > self.created_at => latest.replied_at,
            _ => self.created_at,
        }
    }
}

/// A reply within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    pub thread_id: Uuid,
    /// Parent reply within the same thread, if this is a nested reply.
    /// No cycles by construction: a reply is only created after its
    /// parent exists.
    pub parent_reply_id: Option<Uuid>,
    pub author_alias: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived count of reactions targeting this reply. Never negative.
    pub reaction_count: u32,
}

/// The kinds of reactions a user can leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Like,
    Heart,
    Laugh,
    Sad,
    Angry,
}

impl ReactionType {
    /// Canonical wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Heart => "heart",
            Self::Laugh => "laugh",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }
}

impl std::fmt::Display for ReactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reaction is attached to: exactly one thread or one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionTarget {
    Thread(Uuid),
    Reply(Uuid),
}

impl std::fmt::Display for ReactionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "thread:{id}"),
            Self::Reply(id) => write!(f, "reply:{id}"),
        }
    }
}

/// A user reaction on a thread or reply.
///
/// The wire row carries `thread_id`/`reply_id` as nullable columns;
/// decoding rejects rows that set both or neither, so an in-memory
/// `Reaction` always has exactly one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ReactionRow", into = "ReactionRow")]
pub struct Reaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target: ReactionTarget,
    pub reaction_type: ReactionType,
    pub created_at: DateTime<Utc>,
}

/// Wire shape of a reaction row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReactionRow {
    id: Uuid,
    user_id: Uuid,
    thread_id: Option<Uuid>,
    reply_id: Option<Uuid>,
    reaction_type: ReactionType,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = String;

    fn try_from(row: ReactionRow) -> Result<Self, Self::Error> {
        let target = match (row.thread_id, row.reply_id) {
            (Some(thread_id), None) => ReactionTarget::Thread(thread_id),
            (None, Some(reply_id)) => ReactionTarget::Reply(reply_id),
            (Some(_), Some(_)) => {
                return Err(format!("reaction {} sets both thread_id and reply_id", row.id));
            }
            (None, None) => {
                return Err(format!("reaction {} sets neither thread_id nor reply_id", row.id));
            }
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            target,
            reaction_type: row.reaction_type,
            created_at: row.created_at,
        })
    }
}

impl From<Reaction> for ReactionRow {
    fn from(reaction: Reaction) -> Self {
        let (thread_id, reply_id) = match reaction.target {
            ReactionTarget::Thread(id) => (Some(id), None),
            ReactionTarget::Reply(id) => (None, Some(id)),
        };

        Self {
            id: reaction.id,
            user_id: reaction.user_id,
            thread_id,
            reply_id,
            reaction_type: reaction.reaction_type,
            created_at: reaction.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test_case(ReactionType::Like => "like" ; "like")]
    #[test_case(ReactionType::Heart => "heart" ; "heart")]
    #[test_case(ReactionType::Laugh => "laugh" ; "laugh")]
    #[test_case(ReactionType::Sad => "sad" ; "sad")]
    #[test_case(ReactionType::Angry => "angry" ; "angry")]
    fn test_reaction_type_wire_string(rtype: ReactionType) -> &'static str {
        // The serde form and the canonical string must agree.
        assert_eq!(serde_json::to_value(rtype).unwrap(), rtype.as_str());
        rtype.as_str()
    }

    #[test]
    fn test_activity_at_without_replies() {
        let thread = sample_thread(ts(100), None);
        assert_eq!(thread.activity_at(), ts(100));
    }

    #[test]
    fn test_activity_at_prefers_newer_reply() {
        let latest = LatestReply {
            replied_at: ts(200),
            author_alias: "ivy".into(),
        };
        let thread = sample_thread(ts(100), Some(latest));
        assert_eq!(thread.activity_at(), ts(200));
    }

    #[test]
    fn test_activity_at_ignores_older_reply() {
        // A reply summary carried over from before a thread edit bumped
        // created_at must not move the thread backwards.
        let latest = LatestReply {
            replied_at: ts(50),
            author_alias: "ivy".into(),
        };
        let thread = sample_thread(ts(100), Some(latest));
        assert_eq!(thread.activity_at(), ts(100));
    }

    #[test]
    fn test_reaction_row_decodes_thread_target() {
        let json = r#"{
            "id": "6f0d4d6e-44a3-4f2d-9929-6ddcbfae0b3c",
            "user_id": "0e3ef44c-68a3-4c6e-8a03-3c19cc44cf2b",
            "thread_id": "2c9478a4-4a36-45b6-9e15-5f3ad0f4c0e8",
            "reply_id": null,
            "reaction_type": "heart",
            "created_at": "2026-01-05T10:00:00Z"
        }"#;

        let reaction: Reaction = serde_json::from_str(json).unwrap();
        assert!(matches!(reaction.target, ReactionTarget::Thread(_)));
        assert_eq!(reaction.reaction_type, ReactionType::Heart);
    }

    #[test]
    fn test_reaction_row_rejects_both_targets() {
        let json = r#"{
            "id": "6f0d4d6e-44a3-4f2d-9929-6ddcbfae0b3c",
            "user_id": "0e3ef44c-68a3-4c6e-8a03-3c19cc44cf2b",
            "thread_id": "2c9478a4-4a36-45b6-9e15-5f3ad0f4c0e8",
            "reply_id": "bb1d7a6e-14dd-4b13-8ba1-97d1f57e9d27",
            "reaction_type": "like",
            "created_at": "2026-01-05T10:00:00Z"
        }"#;

        assert!(serde_json::from_str::<Reaction>(json).is_err());
    }

    #[test]
    fn test_reaction_row_rejects_no_target() {
        let json = r#"{
            "id": "6f0d4d6e-44a3-4f2d-9929-6ddcbfae0b3c",
            "user_id": "0e3ef44c-68a3-4c6e-8a03-3c19cc44cf2b",
            "thread_id": null,
            "reply_id": null,
            "reaction_type": "like",
            "created_at": "2026-01-05T10:00:00Z"
        }"#;

        assert!(serde_json::from_str::<Reaction>(json).is_err());
    }

    #[test]
    fn test_reaction_roundtrip_reply_target() {
        let reaction = Reaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            target: ReactionTarget::Reply(Uuid::new_v4()),
            reaction_type: ReactionType::Laugh,
            created_at: ts(42),
        };

        let json = serde_json::to_value(reaction.clone()).unwrap();
        assert!(json.get("thread_id").unwrap().is_null());
        let decoded: Reaction = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.target, reaction.target);
    }

    fn sample_thread(created_at: DateTime<Utc>, latest_reply: Option<LatestReply>) -> Thread {
        Thread {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            title: "title".into(),
            content: "content".into(),
            author_alias: "fern".into(),
            is_pinned: false,
            is_flagged: false,
            created_at,
            updated_at: created_at,
            reply_count: 0,
            reaction_count: 0,
            latest_reply,
        }
    }
}
