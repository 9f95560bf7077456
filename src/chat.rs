use crate::entity::{ConversationKey, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;

/// A stored chat message. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: UserId,
    pub to: UserId,
    pub listing: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(key: ConversationKey, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: key.from,
            to: key.to,
            listing: key.listing,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            from: self.from,
            to: self.to,
            listing: self.listing,
        }
    }
}

/// Marker that `id1` has an open conversation with `id2` about `listing_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub id1: UserId,
    pub id2: UserId,
    pub listing_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Dialog {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            id1: key.from,
            id2: key.to,
            listing_id: key.listing,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            from: self.id1,
            to: self.id2,
            listing: self.listing_id,
        }
    }
}

/// A message frame as it travels over a live connection. Forwarded to peers
/// byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// The frame payload as a message body. Binary payloads are decoded lossily.
    pub fn body(&self) -> Cow<'_, str> {
        match self {
            Frame::Text(text) => Cow::Borrowed(text.as_str()),
            Frame::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }
}
