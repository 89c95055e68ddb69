//! Message Store Adapter: the ordered message collection of a conversation.

use chatwave_messaging::{
    iso_timestamp, ConversationId, Message, MessageId, ReactionChange, UserId, REACTION_PALETTE,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::schema;
use crate::store::{
    object, Direction, DocumentStore, FieldValue, Query, Snapshot, Subscription, Target,
};

#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn DocumentStore>,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn ordered(conversation: &ConversationId) -> Query {
        Query::new(schema::messages(conversation)).order_by("timestamp", Direction::Ascending)
    }

    fn unread_for(conversation: &ConversationId, viewer: &UserId) -> Query {
        Query::new(schema::messages(conversation))
            .where_eq("read", false)
            .where_ne("senderId", viewer.as_str())
    }

    /// Live message list, ascending by server timestamp.
    pub async fn subscribe(&self, conversation: &ConversationId) -> ChatResult<MessageFeed> {
        let subscription = self
            .store
            .subscribe(Target::Query(Self::ordered(conversation)))
            .await?;
        Ok(MessageFeed { subscription })
    }

    /// Live set of messages `viewer` has not read yet.
    pub async fn subscribe_unread(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> ChatResult<Subscription> {
        Ok(self
            .store
            .subscribe(Target::Query(Self::unread_for(conversation, viewer)))
            .await?)
    }

    /// Append a message, then refresh the conversation's denormalized
    /// summary. The two writes are independent; a failed summary refresh is
    /// logged and the directory falls back to the latest message.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        sender_id: &UserId,
        sender_name: &str,
        text: &str,
    ) -> ChatResult<MessageId> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidOperation(
                "Message text cannot be empty".to_string(),
            ));
        }
        let chat = schema::chat_doc(conversation);
        if self.store.get(&chat).await?.is_none() {
            return Err(ChatError::NotFound("Conversation not found".to_string()));
        }

        let path = self
            .store
            .add(
                &schema::messages(conversation),
                object(json!({
                    "text": text,
                    "senderId": sender_id,
                    "senderName": sender_name,
                    "timestamp": FieldValue::server_timestamp(),
                    "read": false,
                    "reactions": {},
                })),
            )
            .await?;
        let message_id = MessageId::new(path.id());
        debug!(conversation_id = %conversation, message_id = %message_id, "message sent");

        let summary = object(json!({
            "lastMessage": text,
            "lastMessageTime": iso_timestamp(Utc::now()),
            "lastMessageSender": sender_id,
        }));
        if let Err(err) = self.store.update(&chat, summary).await {
            warn!(conversation_id = %conversation, error = %err, "failed to refresh conversation summary");
        }

        Ok(message_id)
    }

    /// Set `read = true` on the given messages in one batch.
    pub async fn mark_read(
        &self,
        conversation: &ConversationId,
        message_ids: &[MessageId],
    ) -> ChatResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let updates = message_ids
            .iter()
            .map(|id| {
                (
                    schema::message_doc(conversation, id),
                    object(json!({ "read": true })),
                )
            })
            .collect();
        self.store.batch_update(updates).await?;
        debug!(conversation_id = %conversation, count = message_ids.len(), "marked messages read");
        Ok(())
    }

    /// Mark every message `viewer` has not read yet. Returns how many.
    pub async fn mark_all_read(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> ChatResult<usize> {
        let unread: Vec<MessageId> = self
            .store
            .query(&Self::unread_for(conversation, viewer))
            .await?
            .iter()
            .map(|doc| MessageId::new(doc.id()))
            .collect();
        self.mark_read(conversation, &unread).await?;
        Ok(unread.len())
    }

    /// Toggle `actor`'s reaction. Only the actor's own map entry is
    /// written, so concurrent reactors never overwrite each other.
    pub async fn toggle_reaction(
        &self,
        conversation: &ConversationId,
        message_id: &MessageId,
        actor: &UserId,
        emoji: &str,
    ) -> ChatResult<ReactionChange> {
        if actor.as_str().contains('.') {
            return Err(ChatError::InvalidOperation(format!(
                "participant id {actor} cannot key a reaction"
            )));
        }
        if !REACTION_PALETTE.contains(&emoji) {
            return Err(ChatError::InvalidOperation(format!(
                "{emoji} is not an offered reaction"
            )));
        }

        let path = schema::message_doc(conversation, message_id);
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".to_string()))?;
        let message = schema::decode_message(&doc)?;

        let change = message.reactions.change_for(actor, emoji);
        let value = match change {
            ReactionChange::Removed => FieldValue::delete(),
            _ => Value::String(emoji.to_string()),
        };
        let mut patch = object(json!({}));
        patch.insert(format!("reactions.{}", actor.as_str()), value);
        self.store.update(&path, patch).await?;

        debug!(message_id = %message_id, ?change, "reaction toggled");
        Ok(change)
    }

    /// Most recent message, used when the conversation has no
    /// denormalized preview.
    pub async fn latest(&self, conversation: &ConversationId) -> ChatResult<Option<Message>> {
        let query = Query::new(schema::messages(conversation))
            .order_by("timestamp", Direction::Descending)
            .limit(1);
        match self.store.query(&query).await?.first() {
            Some(doc) => Ok(Some(schema::decode_message(doc)?)),
            None => Ok(None),
        }
    }
}

/// Live, ordered message list of one conversation.
pub struct MessageFeed {
    subscription: Subscription,
}

impl MessageFeed {
    /// Next message list; `None` when the subscription ends. Malformed
    /// documents are skipped.
    pub async fn next(&mut self) -> Option<Vec<Message>> {
        let snapshot = self.subscription.next().await?;
        Some(decode_messages(snapshot))
    }
}

fn decode_messages(snapshot: Snapshot) -> Vec<Message> {
    snapshot
        .iter()
        .filter_map(|doc| match schema::decode_message(doc) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, "skipping malformed message");
                None
            }
        })
        .collect()
}
