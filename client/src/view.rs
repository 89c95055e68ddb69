//! Conversation View Synchronizer.
//!
//! Holds the live state of the one open conversation: its messages, the
//! counterpart's profile and typing flag, and the compose draft. Opening a
//! conversation always closes the previous one first, and closing drops
//! every subscription before returning.

use chatwave_messaging::{ConversationId, Message, MessageId, Profile, ReactionChange};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::directory::Directory;
use crate::error::{ChatError, ChatResult};
use crate::messages::{MessageFeed, MessageStore};
use crate::presence::{TypingDebouncer, TypingFeed, TypingTracker};
use crate::schema;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Closed,
    Loading,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    MessagesChanged,
    TypingChanged(bool),
    /// A live subscription ended and the view closed itself.
    Closed {
        conversation_id: ConversationId,
        reason: String,
    },
}

struct ActiveConversation {
    id: ConversationId,
    viewer: Profile,
    counterpart: Profile,
    message_feed: MessageFeed,
    typing_feed: TypingFeed,
    debouncer: TypingDebouncer,
    messages: Vec<Message>,
    counterpart_typing: bool,
    // marked read but not yet reflected in a snapshot
    marked: HashSet<MessageId>,
}

/// A change received from the open conversation, not yet applied.
#[derive(Debug)]
pub enum ViewUpdate {
    Messages(Option<Vec<Message>>),
    Typing(Option<bool>),
}

pub struct ConversationView {
    store: Arc<dyn DocumentStore>,
    messages: MessageStore,
    typing: TypingTracker,
    directory: Directory,
    quiet_period: Duration,
    phase: ViewPhase,
    active: Option<ActiveConversation>,
    draft: String,
}

impl ConversationView {
    pub fn new(store: Arc<dyn DocumentStore>, config: &ClientConfig) -> Self {
        Self {
            messages: MessageStore::new(store.clone()),
            typing: TypingTracker::new(store.clone()),
            directory: Directory::new(store.clone(), config.avatar_base_url.clone()),
            store,
            quiet_period: config.typing_quiet_period,
            phase: ViewPhase::Closed,
            active: None,
            draft: String::new(),
        }
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.active.as_ref().map(|active| &active.id)
    }

    pub fn messages(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(|active| active.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn counterpart(&self) -> Option<&Profile> {
        self.active.as_ref().map(|active| &active.counterpart)
    }

    pub fn counterpart_typing(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.counterpart_typing)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Close whatever is open, then load `id` for `viewer`. Any load
    /// failure leaves the view closed.
    pub async fn open(&mut self, viewer: &Profile, id: &ConversationId) -> ChatResult<()> {
        self.close();
        self.phase = ViewPhase::Loading;

        match self.load(viewer, id).await {
            Ok(active) => {
                self.active = Some(active);
                self.phase = ViewPhase::Active;
                debug!(conversation_id = %id, "conversation view active");
                Ok(())
            }
            Err(err) => {
                self.phase = ViewPhase::Closed;
                Err(err)
            }
        }
    }

    async fn load(&self, viewer: &Profile, id: &ConversationId) -> ChatResult<ActiveConversation> {
        let doc = self
            .store
            .get(&schema::chat_doc(id))
            .await?
            .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;
        let conversation = schema::decode_conversation(&doc)?;
        let counterpart_id = conversation
            .counterpart(&viewer.id)
            .filter(|_| conversation.involves(&viewer.id))
            .cloned()
            .ok_or_else(|| {
                ChatError::InvalidOperation(format!("{id} is not a conversation of {}", viewer.id))
            })?;

        let counterpart = self.directory.profile(&counterpart_id).await;
        let mut message_feed = self.messages.subscribe(id).await?;
        let mut typing_feed = self.typing.observe(id, &counterpart_id).await?;

        let messages = message_feed.next().await.ok_or_else(|| {
            ChatError::Subscription(format!("message feed of {id} ended while loading"))
        })?;
        let counterpart_typing = typing_feed.next().await.unwrap_or(false);

        match self.messages.mark_all_read(id, &viewer.id).await {
            Ok(0) => {}
            Ok(count) => debug!(conversation_id = %id, count, "marked unread messages on open"),
            Err(err) => warn!(conversation_id = %id, error = %err, "failed to mark messages read"),
        }

        Ok(ActiveConversation {
            id: id.clone(),
            viewer: viewer.clone(),
            counterpart,
            message_feed,
            typing_feed,
            debouncer: self
                .typing
                .debouncer(id.clone(), viewer.id.clone(), self.quiet_period),
            messages,
            counterpart_typing,
            marked: HashSet::new(),
        })
    }

    /// Release every subscription of the open conversation. Returns the id
    /// that was open, if any.
    pub fn close(&mut self) -> Option<ConversationId> {
        self.phase = ViewPhase::Closed;
        self.draft.clear();
        let active = self.active.take()?;
        debug!(conversation_id = %active.id, "conversation view closed");
        Some(active.id)
    }

    /// Wait for the next change of the open conversation. `None` when no
    /// conversation is open.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        loop {
            let update = self.recv().await?;
            if let Some(event) = self.apply(update).await {
                return Some(event);
            }
        }
    }

    /// Receive the next change without applying it. Dropping the future
    /// loses nothing, so it can race other sources in `select!`.
    pub async fn recv(&mut self) -> Option<ViewUpdate> {
        let active = self.active.as_mut()?;
        Some(tokio::select! {
            messages = active.message_feed.next() => ViewUpdate::Messages(messages),
            typing = active.typing_feed.next() => ViewUpdate::Typing(typing),
        })
    }

    /// Apply a received change. New messages from the counterpart are
    /// marked read. `None` when nothing visible changed.
    pub async fn apply(&mut self, update: ViewUpdate) -> Option<ViewEvent> {
        match update {
            ViewUpdate::Messages(Some(messages)) => {
                self.active.as_mut()?.messages = messages;
                self.mark_observed().await;
                Some(ViewEvent::MessagesChanged)
            }
            ViewUpdate::Typing(Some(flag)) => {
                let active = self.active.as_mut()?;
                if active.counterpart_typing == flag {
                    return None;
                }
                active.counterpart_typing = flag;
                Some(ViewEvent::TypingChanged(flag))
            }
            ViewUpdate::Messages(None) | ViewUpdate::Typing(None) => {
                let conversation_id = self.close()?;
                warn!(conversation_id = %conversation_id, "live subscription ended, closing view");
                Some(ViewEvent::Closed {
                    conversation_id,
                    reason: "live subscription ended".to_string(),
                })
            }
        }
    }

    async fn mark_observed(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let unread: Vec<MessageId> = active
            .messages
            .iter()
            .filter(|message| message.is_unread_for(&active.viewer.id))
            .map(|message| message.id.clone())
            .collect();
        active.marked.retain(|id| unread.contains(id));
        let fresh: Vec<MessageId> = unread
            .into_iter()
            .filter(|id| !active.marked.contains(id))
            .collect();
        if fresh.is_empty() {
            return;
        }

        match self.messages.mark_read(&active.id, &fresh).await {
            Ok(()) => active.marked.extend(fresh),
            Err(err) => {
                warn!(conversation_id = %active.id, error = %err, "failed to mark messages read")
            }
        }
    }

    /// Replace the compose text. A non-empty draft counts as a keystroke.
    pub async fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        if !self.draft.is_empty() {
            self.start_typing().await;
        }
    }

    /// Forward a keystroke to the typing tracker. Failures are logged.
    pub async fn start_typing(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(err) = active.debouncer.keystroke().await {
            warn!(conversation_id = %active.id, error = %err, "failed to publish typing state");
        }
    }

    /// Send the draft. A blank draft sends nothing and returns `Ok(None)`;
    /// on failure the draft is kept so the user can retry.
    pub async fn send_message(&mut self) -> ChatResult<Option<MessageId>> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| ChatError::InvalidOperation("No conversation selected".to_string()))?;
        let text = self.draft.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let id = self
            .messages
            .send(&active.id, &active.viewer.id, &active.viewer.display_name, text)
            .await?;
        self.draft.clear();

        if let Err(err) = active.debouncer.stop().await {
            warn!(conversation_id = %active.id, error = %err, "failed to clear typing state");
        }
        Ok(Some(id))
    }

    pub async fn react(&self, message_id: &MessageId, emoji: &str) -> ChatResult<ReactionChange> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| ChatError::InvalidOperation("No conversation selected".to_string()))?;
        self.messages
            .toggle_reaction(&active.id, message_id, &active.viewer.id, emoji)
            .await
    }
}
