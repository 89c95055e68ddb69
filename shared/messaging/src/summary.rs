//! Derived list entries for the conversation directory.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::{ConversationId, Profile, UserId};

const OWN_PREVIEW_LEN: usize = 20;
const OTHER_PREVIEW_LEN: usize = 25;

/// One row of the conversation list, rebuilt on every relevant change.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub participants: Vec<UserId>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_sender: Option<UserId>,
    pub unread_count: usize,
    pub counterpart: Profile,
}

impl ConversationSummary {
    /// Short preview of the latest message as seen by `viewer`.
    pub fn preview(&self, viewer: &UserId) -> String {
        let Some(text) = self.last_message.as_deref().filter(|t| !t.is_empty()) else {
            return "No messages yet".to_string();
        };

        let own = self.last_message_sender.as_ref() == Some(viewer);
        let (prefix, limit) = if own {
            ("You: ", OWN_PREVIEW_LEN)
        } else {
            ("", OTHER_PREVIEW_LEN)
        };

        if text.chars().count() > limit {
            let truncated: String = text.chars().take(limit).collect();
            format!("{prefix}{truncated}...")
        } else {
            format!("{prefix}{text}")
        }
    }

    /// Case-insensitive match against the counterpart's display name.
    pub fn matches_search(&self, term: &str) -> bool {
        self.counterpart
            .display_name
            .to_lowercase()
            .contains(&term.to_lowercase())
    }
}

/// Most recent first; entries without a timestamp keep their relative
/// order at the end.
pub fn sort_by_recency(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| match (a.last_message_time, b.last_message_time) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub fn filter_by_name<'a>(
    summaries: &'a [ConversationSummary],
    term: &str,
) -> Vec<&'a ConversationSummary> {
    summaries
        .iter()
        .filter(|summary| summary.matches_search(term))
        .collect()
}
