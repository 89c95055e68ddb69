//! Conversation models shared by the ChatWave synchronization core.
//!
//! Every type here mirrors a document stored by the external store (field
//! names are camelCase on the wire) or a view model derived from those
//! documents. Nothing in this crate performs I/O.

pub mod reactions;
pub mod summary;

pub use reactions::{ReactionChange, Reactions, REACTION_PALETTE};
pub use summary::{filter_by_name, sort_by_recency, ConversationSummary};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity issued by the auth collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Unique identifier assigned to a two-party conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical id for the unordered pair `{a, b}`.
    ///
    /// Both participants derive the same id no matter who starts the
    /// conversation, so concurrent creators collide on one document.
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}_{}", low.as_str(), high.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a message inside its conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public profile of an account, stored under `users/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(skip)]
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Profile {
    /// Stand-in used when a counterpart has no profile document.
    pub fn placeholder(id: UserId, avatar_base_url: &str) -> Self {
        Self {
            id,
            email: String::new(),
            display_name: "User".to_string(),
            photo_url: default_avatar_url(avatar_base_url, "User"),
            created_at: None,
        }
    }
}

/// Generated avatar for accounts that did not supply one.
pub fn default_avatar_url(base_url: &str, display_name: &str) -> String {
    format!(
        "{}?name={}&background=random",
        base_url,
        urlencoding::encode(display_name)
    )
}

/// Display name derived from the local part of an email address.
pub fn display_name_from_email(email: &str) -> String {
    match email.split('@').next() {
        Some(local) if !local.trim().is_empty() => local.trim().to_string(),
        _ => "User".to_string(),
    }
}

/// ISO-8601 text used for `createdAt` and `lastMessageTime`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A pairwise chat, stored under `chats/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(skip)]
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_sender: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Conversation {
    /// Fresh conversation between `a` and `b`, keyed by the canonical pair id.
    pub fn between(a: &UserId, b: &UserId, now: DateTime<Utc>) -> Self {
        let stamp = iso_timestamp(now);
        Self {
            id: ConversationId::for_pair(a, b),
            participants: vec![a.clone(), b.clone()],
            last_message: None,
            last_message_time: Some(stamp.clone()),
            last_message_sender: None,
            created_at: Some(stamp),
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participant that is not `me`.
    pub fn counterpart(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|id| *id != me)
    }

    /// Denormalized preview text, treating an empty string as absent.
    pub fn preview_text(&self) -> Option<&str> {
        self.last_message.as_deref().filter(|text| !text.is_empty())
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc))
    }
}

/// A single chat message, stored under `chats/{id}/messages/{message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: MessageId,
    pub text: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    /// Milliseconds since the Unix epoch, assigned by the store.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub reactions: Reactions,
}

impl Message {
    /// Counts toward `viewer`'s unread badge.
    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        !self.read && &self.sender_id != viewer
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Per-conversation typing flags, stored under `chats/{id}/typing/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypingStatus(pub BTreeMap<UserId, bool>);

impl TypingStatus {
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.0.get(user).copied().unwrap_or(false)
    }
}
