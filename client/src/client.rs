//! `ChatClient`: the surface the rendering layer drives.
//!
//! Ties the session, the conversation directory and the open conversation
//! view together. Read-only view models come from the accessors; every
//! change is announced through [`ChatClient::next_event`].

use chatwave_messaging::{
    filter_by_name, ConversationId, ConversationSummary, Message, MessageId, Profile,
    ReactionChange,
};
use futures::future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::directory::{Directory, DirectoryFeed, DirectoryUpdate};
use crate::error::{ChatError, ChatResult};
use crate::session::SessionProvider;
use crate::store::DocumentStore;
use crate::view::{ConversationView, ViewEvent, ViewPhase, ViewUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConversationsChanged,
    MessagesChanged,
    CounterpartTyping(bool),
    ViewClosed {
        conversation_id: ConversationId,
        reason: String,
    },
    SignedOut,
    /// The conversation list subscription ended; the list is frozen.
    DirectoryClosed,
}

enum Step {
    Session(bool),
    Directory(Option<DirectoryUpdate>),
    View(Option<ViewUpdate>),
}

pub struct ChatClient {
    session: Arc<SessionProvider>,
    session_events: watch::Receiver<Option<Profile>>,
    directory: Directory,
    directory_feed: Option<DirectoryFeed>,
    conversations: Vec<ConversationSummary>,
    search: String,
    view: ConversationView,
}

impl ChatClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        config: &ClientConfig,
    ) -> Self {
        let session = Arc::new(SessionProvider::new(auth, store.clone(), config));
        Self {
            session_events: session.watch(),
            session,
            directory: Directory::new(store.clone(), config.avatar_base_url.clone()),
            directory_feed: None,
            conversations: Vec::new(),
            search: String::new(),
            view: ConversationView::new(store, config),
        }
    }

    pub fn session(&self) -> Arc<SessionProvider> {
        Arc::clone(&self.session)
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.session.current_profile()
    }

    fn require_profile(&self) -> ChatResult<Profile> {
        self.session.current_profile().ok_or(ChatError::SignedOut)
    }

    pub async fn sign_up(
        &mut self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> ChatResult<Profile> {
        let profile = self.session.sign_up(email, password, display_name).await?;
        self.start_directory(&profile).await?;
        Ok(profile)
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> ChatResult<Profile> {
        let profile = self.session.sign_in(email, password).await?;
        self.start_directory(&profile).await?;
        Ok(profile)
    }

    async fn start_directory(&mut self, profile: &Profile) -> ChatResult<()> {
        self.teardown();
        self.session_events.borrow_and_update();

        let mut feed = self.directory.subscribe(&profile.id).await?;
        match feed.next().await {
            Some(Ok(list)) => self.conversations = list,
            Some(Err(err)) => warn!(uid = %profile.id, error = %err, "initial conversation list failed"),
            None => warn!(uid = %profile.id, "conversation list ended immediately"),
        }
        self.directory_feed = Some(feed);
        Ok(())
    }

    /// Drop every live subscription of the signed-in user.
    fn teardown(&mut self) {
        self.view.close();
        if self.directory_feed.take().is_some() {
            debug!("conversation list closed");
        }
        self.conversations.clear();
        self.search.clear();
    }

    /// Tear down all subscriptions, then end the session.
    pub async fn sign_out(&mut self) -> ChatResult<()> {
        self.teardown();
        self.session.sign_out().await?;
        self.session_events.borrow_and_update();
        Ok(())
    }

    /// Conversation list, filtered by the current search term.
    pub fn conversations(&self) -> Vec<&ConversationSummary> {
        filter_by_name(&self.conversations, &self.search)
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// Start (or reuse) the conversation with the account behind `email`
    /// and open it.
    pub async fn create_conversation(&mut self, email: &str) -> ChatResult<ConversationId> {
        let profile = self.require_profile()?;
        let id = self.directory.create_or_reuse(&profile.id, email).await?;
        self.view.open(&profile, &id).await?;
        Ok(id)
    }

    pub async fn select_conversation(&mut self, id: &ConversationId) -> ChatResult<()> {
        let profile = self.require_profile()?;
        self.view.open(&profile, id).await
    }

    pub fn deselect(&mut self) -> Option<ConversationId> {
        self.view.close()
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn messages(&self) -> &[Message] {
        self.view.messages()
    }

    pub fn counterpart_typing(&self) -> bool {
        self.view.counterpart_typing()
    }

    pub async fn set_draft(&mut self, text: impl Into<String>) {
        self.view.set_draft(text).await;
    }

    pub async fn start_typing(&mut self) {
        self.view.start_typing().await;
    }

    pub async fn send_message(&mut self) -> ChatResult<Option<MessageId>> {
        self.view.send_message().await
    }

    pub async fn react(&self, message_id: &MessageId, emoji: &str) -> ChatResult<ReactionChange> {
        self.view.react(message_id, emoji).await
    }

    /// Wait for the next change across the session, the conversation list
    /// and the open conversation. `None` when nothing is live.
    ///
    /// Sources only race to receive; the winning change is applied after
    /// the race, so no store write is ever abandoned halfway.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            let view_active = self.view.phase() == ViewPhase::Active;
            if self.directory_feed.is_none() && !view_active {
                return None;
            }

            let step = {
                let feed = &mut self.directory_feed;
                let directory = async move {
                    match feed.as_mut() {
                        Some(feed) => feed.recv().await,
                        None => future::pending().await,
                    }
                };
                tokio::select! {
                    changed = self.session_events.changed() => Step::Session(changed.is_ok()),
                    update = directory => Step::Directory(update),
                    update = self.view.recv(), if view_active => Step::View(update),
                }
            };

            match step {
                Step::Session(false) => return None,
                Step::Session(true) => {
                    if self.session_events.borrow_and_update().is_none() {
                        info!("session ended, closing live views");
                        self.teardown();
                        return Some(ClientEvent::SignedOut);
                    }
                }
                Step::Directory(Some(update)) => {
                    let Some(feed) = self.directory_feed.as_mut() else {
                        continue;
                    };
                    match feed.apply(update).await {
                        Some(Ok(list)) => {
                            self.conversations = list;
                            return Some(ClientEvent::ConversationsChanged);
                        }
                        Some(Err(err)) => warn!(error = %err, "conversation list refresh failed"),
                        None => {}
                    }
                }
                Step::Directory(None) => {
                    warn!("conversation list subscription ended");
                    self.directory_feed = None;
                    return Some(ClientEvent::DirectoryClosed);
                }
                Step::View(Some(update)) => match self.view.apply(update).await {
                    Some(ViewEvent::MessagesChanged) => return Some(ClientEvent::MessagesChanged),
                    Some(ViewEvent::TypingChanged(flag)) => {
                        return Some(ClientEvent::CounterpartTyping(flag))
                    }
                    Some(ViewEvent::Closed {
                        conversation_id,
                        reason,
                    }) => {
                        return Some(ClientEvent::ViewClosed {
                            conversation_id,
                            reason,
                        })
                    }
                    None => {}
                },
                Step::View(None) => {}
            }
        }
    }
}
