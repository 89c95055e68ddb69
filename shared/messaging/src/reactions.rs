//! Emoji reactions attached to a message.
//!
//! Each participant holds at most one reaction per message. Choosing the
//! same emoji again removes it; choosing a different one replaces it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::UserId;

/// Emoji offered by the reaction picker.
pub const REACTION_PALETTE: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "🙏"];

/// Outcome of applying a reaction for one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    /// The actor had no reaction and now has one.
    Added,
    /// The actor's previous emoji was replaced.
    Replaced { previous: String },
    /// The actor picked the emoji they already had, so it was removed.
    Removed,
}

/// Mapping from participant to their single reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(pub BTreeMap<UserId, String>);

impl Reactions {
    pub fn get(&self, actor: &UserId) -> Option<&str> {
        self.0.get(actor).map(String::as_str)
    }

    /// What toggling `emoji` for `actor` would do, without applying it.
    pub fn change_for(&self, actor: &UserId, emoji: &str) -> ReactionChange {
        match self.0.get(actor) {
            Some(current) if current == emoji => ReactionChange::Removed,
            Some(current) => ReactionChange::Replaced {
                previous: current.clone(),
            },
            None => ReactionChange::Added,
        }
    }

    pub fn toggle(&mut self, actor: &UserId, emoji: &str) -> ReactionChange {
        let change = self.change_for(actor, emoji);
        match change {
            ReactionChange::Removed => {
                self.0.remove(actor);
            }
            _ => {
                self.0.insert(actor.clone(), emoji.to_string());
            }
        }
        change
    }

    /// Per-emoji counts in emoji order, for the badge under a message.
    pub fn tally(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for emoji in self.0.values() {
            *counts.entry(emoji.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(emoji, count)| (emoji.to_string(), count))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_removes() {
        let alice = UserId::from("alice");
        let mut reactions = Reactions::default();

        assert_eq!(reactions.toggle(&alice, "👍"), ReactionChange::Added);
        assert_eq!(reactions.get(&alice), Some("👍"));
        assert_eq!(reactions.toggle(&alice, "👍"), ReactionChange::Removed);
        assert!(reactions.is_empty());
    }

    #[test]
    fn test_different_emoji_replaces() {
        let alice = UserId::from("alice");
        let mut reactions = Reactions::default();
        reactions.toggle(&alice, "👍");

        assert_eq!(
            reactions.toggle(&alice, "😂"),
            ReactionChange::Replaced {
                previous: "👍".to_string()
            }
        );
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions.get(&alice), Some("😂"));
    }

    #[test]
    fn test_tally_groups_by_emoji() {
        let mut reactions = Reactions::default();
        reactions.toggle(&"alice".into(), "❤️");
        reactions.toggle(&"bob".into(), "❤️");
        reactions.toggle(&"carol".into(), "👍");

        let tally = reactions.tally();
        assert_eq!(tally.len(), 2);
        assert!(tally.contains(&("❤️".to_string(), 2)));
        assert!(tally.contains(&("👍".to_string(), 1)));
    }
}
