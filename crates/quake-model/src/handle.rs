//! Handles to delivered messages

use crate::subscriber::ChatId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a delivered message, sufficient to edit it later
///
/// Issued by the delivery channel on a successful send. The tracking record
/// that stores it is its only owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    chat: ChatId,
    message_id: i64,
}

impl MessageHandle {
    /// Create handle from a platform message identifier
    #[inline]
    #[must_use]
    pub fn new(chat: ChatId, message_id: i64) -> Self {
        Self { chat, message_id }
    }

    /// Chat the message lives in
    #[inline]
    #[must_use]
    pub fn chat(&self) -> ChatId {
        self.chat
    }

    /// Platform message identifier
    #[inline]
    #[must_use]
    pub fn message_id(&self) -> i64 {
        self.message_id
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat, self.message_id)
    }
}
