//! Fixture constructors shared by the unit tests.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Community, Reaction, ReactionTarget, ReactionType, Reply, Thread};

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn community(name: &str) -> Community {
    Community {
        id: Uuid::new_v4(),
        name: name.into(),
        description: String::new(),
        thread_count: 0,
        sort_order: 0,
        is_active: true,
    }
}

pub fn thread(community_id: Uuid, title: &str, pinned: bool, at: i64) -> Thread {
    Thread {
        id: Uuid::new_v4(),
        community_id,
        title: title.into(),
        content: "body".into(),
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

pub fn reply(thread_id: Uuid, content: &str, at: i64) -> Reply {
    Reply {
        id: Uuid::new_v4(),
        thread_id,
        parent_reply_id: None,
        author_alias: "ivy".into(),
        content: content.into(),
        created_at: ts(at),
        updated_at: ts(at),
        reaction_count: 0,
    }
}

pub fn reaction(user_id: Uuid, target: ReactionTarget, reaction_type: ReactionType) -> Reaction {
    Reaction {
        id: Uuid::new_v4(),
        user_id,
        target,
        reaction_type,
        created_at: ts(1000),
    }
}
