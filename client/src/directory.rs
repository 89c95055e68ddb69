//! Conversation Directory: the signed-in user's sorted, searchable list of
//! conversations.
//!
//! The feed joins every conversation with its counterpart profile, falls
//! back to the latest message when the denormalized preview is missing and
//! keeps one live unread subscription per listed conversation.

use chatwave_messaging::{
    sort_by_recency, Conversation, ConversationId, ConversationSummary, Profile, UserId,
};
use chrono::Utc;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::messages::MessageStore;
use crate::schema;
use crate::store::{to_fields, DocumentStore, Query, Snapshot, StoreError, Subscription, Target};

const MEDIA_PLACEHOLDER: &str = "Media content";

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn DocumentStore>,
    messages: MessageStore,
    avatar_base_url: String,
}

impl Directory {
    pub fn new(store: Arc<dyn DocumentStore>, avatar_base_url: impl Into<String>) -> Self {
        Self {
            messages: MessageStore::new(store.clone()),
            store,
            avatar_base_url: avatar_base_url.into(),
        }
    }

    fn conversations_of(self_id: &UserId) -> Query {
        Query::new(schema::chats()).where_array_contains("participants", self_id.as_str())
    }

    /// Open the live conversation list of `self_id`. Every call yields an
    /// independent feed whose first item is a fresh consistent list.
    pub async fn subscribe(&self, self_id: &UserId) -> ChatResult<DirectoryFeed> {
        let conversations = self
            .store
            .subscribe(Target::Query(Self::conversations_of(self_id)))
            .await?;
        Ok(DirectoryFeed {
            directory: self.clone(),
            self_id: self_id.clone(),
            conversations,
            unread: SelectAll::new(),
            pending: None,
            summaries: Vec::new(),
        })
    }

    /// Profile of `uid`, or the "User" placeholder when none is stored.
    pub async fn profile(&self, uid: &UserId) -> Profile {
        let stored = match self.store.get(&schema::user_doc(uid)).await {
            Ok(Some(doc)) => schema::decode_profile(&doc),
            Ok(None) => return Profile::placeholder(uid.clone(), &self.avatar_base_url),
            Err(err) => Err(err.into()),
        };
        stored.unwrap_or_else(|err| {
            warn!(uid = %uid, error = %err, "falling back to placeholder profile");
            Profile::placeholder(uid.clone(), &self.avatar_base_url)
        })
    }

    pub async fn find_user_by_email(&self, email: &str) -> ChatResult<Option<Profile>> {
        let query = Query::new(schema::users())
            .where_eq("email", email.trim())
            .limit(1);
        match self.store.query(&query).await?.first() {
            Some(doc) => Ok(Some(schema::decode_profile(doc)?)),
            None => Ok(None),
        }
    }

    /// Conversation between `self_id` and the account registered under
    /// `email`, created when none exists yet.
    ///
    /// An existing conversation is reused first. Otherwise the pair id is
    /// written with create-if-absent, so concurrent creators converge on a
    /// single document.
    pub async fn create_or_reuse(&self, self_id: &UserId, email: &str) -> ChatResult<ConversationId> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ChatError::InvalidOperation(
                "Please enter an email address".to_string(),
            ));
        }

        let counterpart = self
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| ChatError::NotFound("User not found".to_string()))?;
        if &counterpart.id == self_id {
            return Err(ChatError::InvalidOperation(
                "You cannot chat with yourself".to_string(),
            ));
        }

        if let Some(existing) = self.existing_between(self_id, &counterpart.id).await? {
            debug!(conversation_id = %existing, "reusing conversation");
            return Ok(existing);
        }

        let conversation = Conversation::between(self_id, &counterpart.id, Utc::now());
        match self
            .store
            .create(&schema::chat_doc(&conversation.id), to_fields(&conversation)?)
            .await
        {
            Ok(()) => {
                info!(conversation_id = %conversation.id, "conversation created");
                Ok(conversation.id)
            }
            Err(StoreError::AlreadyExists(_)) => {
                debug!(conversation_id = %conversation.id, "conversation created concurrently");
                Ok(conversation.id)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn existing_between(
        &self,
        self_id: &UserId,
        counterpart: &UserId,
    ) -> ChatResult<Option<ConversationId>> {
        let docs = self.store.query(&Self::conversations_of(self_id)).await?;
        for doc in &docs {
            match schema::decode_conversation(doc) {
                Ok(conversation) if conversation.involves(counterpart) => {
                    return Ok(Some(conversation.id))
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping malformed conversation"),
            }
        }
        Ok(None)
    }

    async fn summarize(&self, self_id: &UserId, conversation: Conversation) -> ConversationSummary {
        let counterpart_id = conversation
            .counterpart(self_id)
            .cloned()
            .unwrap_or_else(|| self_id.clone());
        let counterpart = self.profile(&counterpart_id).await;

        let mut last_message = conversation.preview_text().map(str::to_string);
        let mut last_message_time = conversation.last_activity();
        let mut last_message_sender = conversation.last_message_sender.clone();

        if last_message.is_none() {
            match self.messages.latest(&conversation.id).await {
                Ok(Some(latest)) => {
                    last_message = Some(if latest.text.is_empty() {
                        MEDIA_PLACEHOLDER.to_string()
                    } else {
                        latest.text.clone()
                    });
                    last_message_time = latest.sent_at().or(last_message_time);
                    last_message_sender = Some(latest.sender_id.clone());
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(conversation_id = %conversation.id, error = %err, "latest message lookup failed");
                }
            }
        }

        ConversationSummary {
            conversation_id: conversation.id,
            participants: conversation.participants,
            last_message,
            last_message_time,
            last_message_sender,
            unread_count: 0,
            counterpart,
        }
    }
}

type UnreadStream = BoxStream<'static, (ConversationId, usize)>;

/// Live conversation list of one user.
pub struct DirectoryFeed {
    directory: Directory,
    self_id: UserId,
    conversations: Subscription,
    unread: SelectAll<UnreadStream>,
    // conversation set whose rebuild has not completed yet
    pending: Option<Snapshot>,
    summaries: Vec<ConversationSummary>,
}

/// A change received by a [`DirectoryFeed`], not yet applied.
#[derive(Debug)]
pub enum DirectoryUpdate {
    Conversations(Snapshot),
    Unread(ConversationId, usize),
}

impl DirectoryFeed {
    /// Most recently emitted list.
    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    /// Next list, emitted when the conversation set or any unread count
    /// changes. `None` once the conversation subscription ends.
    pub async fn next(&mut self) -> Option<ChatResult<Vec<ConversationSummary>>> {
        loop {
            let update = self.recv().await?;
            if let Some(list) = self.apply(update).await {
                return Some(list);
            }
        }
    }

    /// Receive the next change without applying it. Dropping the future
    /// loses nothing, and a rebuild that was interrupted is handed out
    /// again. `None` once the conversation subscription ends.
    pub async fn recv(&mut self) -> Option<DirectoryUpdate> {
        if let Some(snapshot) = self.pending.take() {
            return Some(DirectoryUpdate::Conversations(snapshot));
        }
        tokio::select! {
            snapshot = self.conversations.next() => snapshot.map(DirectoryUpdate::Conversations),
            Some((id, count)) = self.unread.next(), if !self.unread.is_empty() => {
                Some(DirectoryUpdate::Unread(id, count))
            }
        }
    }

    /// Apply a received change. `None` when the list did not change.
    pub async fn apply(
        &mut self,
        update: DirectoryUpdate,
    ) -> Option<ChatResult<Vec<ConversationSummary>>> {
        match update {
            DirectoryUpdate::Conversations(snapshot) => {
                self.pending = Some(snapshot.clone());
                let rebuilt = self.rebuild(&snapshot).await;
                self.pending = None;
                Some(rebuilt.map(|()| self.summaries.clone()))
            }
            DirectoryUpdate::Unread(id, count) => {
                let summary = self
                    .summaries
                    .iter_mut()
                    .find(|summary| summary.conversation_id == id)?;
                if summary.unread_count == count {
                    return None;
                }
                summary.unread_count = count;
                Some(Ok(self.summaries.clone()))
            }
        }
    }

    /// Summaries and unread listeners for `snapshot`. Both replace the
    /// current ones only once every conversation is done.
    async fn rebuild(&mut self, snapshot: &Snapshot) -> ChatResult<()> {
        let mut unread_streams = SelectAll::new();
        let mut summaries = Vec::with_capacity(snapshot.len());
        for doc in snapshot {
            let conversation = match schema::decode_conversation(doc) {
                Ok(conversation) => conversation,
                Err(err) => {
                    warn!(error = %err, "skipping malformed conversation");
                    continue;
                }
            };
            let id = conversation.id.clone();
            let mut summary = self.directory.summarize(&self.self_id, conversation).await;

            let mut unread = self
                .directory
                .messages
                .subscribe_unread(&id, &self.self_id)
                .await?;
            summary.unread_count = unread.next().await.map(|docs| docs.len()).unwrap_or(0);
            unread_streams.push(unread.map(move |docs| (id.clone(), docs.len())).boxed());

            summaries.push(summary);
        }

        sort_by_recency(&mut summaries);
        debug!(uid = %self.self_id, conversations = summaries.len(), "directory rebuilt");
        self.unread = unread_streams;
        self.summaries = summaries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldValue, MemoryStore};
    use serde_json::json;

    async fn seed_user(store: &MemoryStore, uid: &str, email: &str, name: &str) {
        let profile = Profile {
            id: uid.into(),
            email: email.to_string(),
            display_name: name.to_string(),
            photo_url: format!("https://example.com/{uid}.png"),
            created_at: None,
        };
        store
            .set(&schema::user_doc(&profile.id), to_fields(&profile).unwrap())
            .await
            .unwrap();
    }

    fn directory(store: &Arc<MemoryStore>) -> Directory {
        Directory::new(store.clone(), "https://ui-avatars.com/api/")
    }

    #[tokio::test]
    async fn test_create_or_reuse_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice", "alice@example.com", "Alice").await;
        seed_user(&store, "bob", "bob@example.com", "Bob").await;
        let directory = directory(&store);

        let first = directory
            .create_or_reuse(&"alice".into(), "bob@example.com")
            .await
            .unwrap();
        let again = directory
            .create_or_reuse(&"alice".into(), " bob@example.com ")
            .await
            .unwrap();
        let reverse = directory
            .create_or_reuse(&"bob".into(), "alice@example.com")
            .await
            .unwrap();

        assert_eq!(first, ConversationId::from("alice_bob"));
        assert_eq!(first, again);
        assert_eq!(first, reverse);
        assert_eq!(store.query(&Query::new(schema::chats())).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_or_reuse_rejections() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice", "alice@example.com", "Alice").await;
        let directory = directory(&store);

        let err = directory
            .create_or_reuse(&"alice".into(), "nobody@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(ref msg) if msg == "User not found"));

        let err = directory
            .create_or_reuse(&"alice".into(), "alice@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_reuses_conversation_under_legacy_id() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice", "alice@example.com", "Alice").await;
        seed_user(&store, "bob", "bob@example.com", "Bob").await;
        store
            .create(
                &schema::chat_doc(&"legacy".into()),
                crate::store::object(json!({ "participants": ["bob", "alice"] })),
            )
            .await
            .unwrap();

        let id = directory(&store)
            .create_or_reuse(&"alice".into(), "bob@example.com")
            .await
            .unwrap();
        assert_eq!(id, ConversationId::from("legacy"));
    }

    #[tokio::test]
    async fn test_feed_builds_summaries() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice", "alice@example.com", "Alice").await;
        seed_user(&store, "bob", "bob@example.com", "Bob").await;
        let directory = directory(&store);
        let alice = UserId::from("alice");

        let mut feed = directory.subscribe(&alice).await.unwrap();
        assert!(feed.next().await.unwrap().unwrap().is_empty());

        let id = directory
            .create_or_reuse(&alice, "bob@example.com")
            .await
            .unwrap();
        let list = feed.next().await.unwrap().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].counterpart.display_name, "Bob");
        assert_eq!(list[0].unread_count, 0);
        assert_eq!(list[0].preview(&alice), "No messages yet");

        // a message without a summary refresh: the preview falls back to it
        store
            .add(
                &schema::messages(&id),
                crate::store::object(json!({
                    "text": "",
                    "senderId": "bob",
                    "timestamp": FieldValue::server_timestamp(),
                    "read": false,
                })),
            )
            .await
            .unwrap();
        let list = feed.next().await.unwrap().unwrap();
        assert_eq!(list[0].unread_count, 1);

        store
            .update(&schema::chat_doc(&id), crate::store::object(json!({ "createdAt": "x" })))
            .await
            .unwrap();
        let list = feed.next().await.unwrap().unwrap();
        assert_eq!(list[0].last_message.as_deref(), Some(MEDIA_PLACEHOLDER));
        assert_eq!(list[0].last_message_sender, Some(UserId::from("bob")));
        assert_eq!(list[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_missing_profile_uses_placeholder() {
        let store = Arc::new(MemoryStore::new());
        let conversation = Conversation::between(&"alice".into(), &"ghost".into(), Utc::now());
        store
            .create(&schema::chat_doc(&conversation.id), to_fields(&conversation).unwrap())
            .await
            .unwrap();

        let mut feed = directory(&store).subscribe(&"alice".into()).await.unwrap();
        let list = feed.next().await.unwrap().unwrap();
        assert_eq!(list[0].counterpart.display_name, "User");
        assert_eq!(list[0].counterpart.id, UserId::from("ghost"));
        assert!(list[0].counterpart.photo_url.contains("name=User"));
    }

    #[tokio::test]
    async fn test_dropping_feed_releases_listeners() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "alice", "alice@example.com", "Alice").await;
        seed_user(&store, "bob", "bob@example.com", "Bob").await;
        let directory = directory(&store);
        directory
            .create_or_reuse(&"alice".into(), "bob@example.com")
            .await
            .unwrap();

        let mut feed = directory.subscribe(&"alice".into()).await.unwrap();
        feed.next().await.unwrap().unwrap();
        assert_eq!(store.listener_count(), 2);

        drop(feed);
        assert_eq!(store.listener_count(), 0);
    }
}
