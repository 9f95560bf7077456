use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Listing id used for conversations that are not about a particular advert.
pub const NO_LISTING: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One directional view of a chat: `from` talking to `to` about `listing`.
///
/// `(A, B, L)` and `(B, A, L)` are distinct keys; together they make up one
/// logical conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub from: UserId,
    pub to: UserId,
    pub listing: i64,
}

impl ConversationKey {
    pub fn new(from: i64, to: i64, listing: Option<i64>) -> Self {
        Self {
            from: UserId(from),
            to: UserId(to),
            listing: listing.unwrap_or(NO_LISTING),
        }
    }

    /// The key with `from` and `to` swapped. Used to find the recipient's
    /// live connections.
    pub fn mirror(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            listing: self.listing,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.from, self.to, self.listing)
    }
}

/// Process-unique handle for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
