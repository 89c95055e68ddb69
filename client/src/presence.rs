//! Presence/Typing Tracker.
//!
//! Each conversation keeps one `typing/status` document mapping participant
//! id to a boolean. Writers only ever touch their own key.

use chatwave_messaging::{ConversationId, TypingStatus, UserId};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::schema;
use crate::store::{DocumentStore, Fields, StoreError, Subscription, Target};

#[derive(Clone)]
pub struct TypingTracker {
    store: Arc<dyn DocumentStore>,
}

impl TypingTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Upsert `user`'s flag, creating the status document when absent.
    pub async fn set_typing(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        is_typing: bool,
    ) -> ChatResult<()> {
        // update keys are dotted paths, so such an id would nest
        if user.as_str().contains('.') {
            return Err(ChatError::InvalidOperation(format!(
                "participant id {user} cannot key a typing flag"
            )));
        }
        let path = schema::typing_doc(conversation);
        let mut patch = Fields::new();
        patch.insert(user.as_str().to_string(), Value::Bool(is_typing));

        if self.store.get(&path).await?.is_none() {
            match self.store.create(&path, patch.clone()).await {
                Ok(()) => return Ok(()),
                // another participant created it first
                Err(StoreError::AlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.store.update(&path, patch).await?;
        Ok(())
    }

    /// Live typing flag of `counterpart` in `conversation`.
    pub async fn observe(
        &self,
        conversation: &ConversationId,
        counterpart: &UserId,
    ) -> ChatResult<TypingFeed> {
        let subscription = self
            .store
            .subscribe(Target::Document(schema::typing_doc(conversation)))
            .await?;
        Ok(TypingFeed {
            subscription,
            counterpart: counterpart.clone(),
        })
    }

    pub fn debouncer(
        &self,
        conversation: ConversationId,
        user: UserId,
        quiet_period: Duration,
    ) -> TypingDebouncer {
        TypingDebouncer {
            tracker: self.clone(),
            conversation,
            user,
            quiet_period,
            state: Arc::new(Mutex::new(DebounceState::default())),
            timer: None,
        }
    }
}

/// Stream of a counterpart's typing flag.
pub struct TypingFeed {
    subscription: Subscription,
    counterpart: UserId,
}

impl TypingFeed {
    /// Next flag value; `None` when the subscription ends.
    pub async fn next(&mut self) -> Option<bool> {
        let snapshot = self.subscription.next().await?;
        let flag = snapshot
            .first()
            .and_then(|doc| match doc.decode::<TypingStatus>() {
                Ok(status) => Some(status.is_typing(&self.counterpart)),
                Err(err) => {
                    warn!(path = %doc.path, error = %err, "ignoring malformed typing status");
                    None
                }
            })
            .unwrap_or(false);
        Some(flag)
    }
}

#[derive(Default)]
struct DebounceState {
    typing: bool,
    generation: u64,
}

/// Turns keystrokes into typing writes: `true` once per burst, `false`
/// after the quiet period passes with no further keystroke.
///
/// Dropping the debouncer leaves a pending timer running, so the flag
/// still clears once the quiet period is over.
pub struct TypingDebouncer {
    tracker: TypingTracker,
    conversation: ConversationId,
    user: UserId,
    quiet_period: Duration,
    state: Arc<Mutex<DebounceState>>,
    timer: Option<JoinHandle<()>>,
}

impl TypingDebouncer {
    pub fn is_typing(&self) -> bool {
        self.state.lock().map(|state| state.typing).unwrap_or(false)
    }

    pub async fn keystroke(&mut self) -> ChatResult<()> {
        let (start, generation) = {
            let mut state = self.lock_state();
            state.generation += 1;
            let start = !state.typing;
            state.typing = true;
            (start, state.generation)
        };

        if start {
            debug!(conversation_id = %self.conversation, "typing started");
            if let Err(err) = self
                .tracker
                .set_typing(&self.conversation, &self.user, true)
                .await
            {
                self.lock_state().typing = false;
                return Err(err);
            }
        }

        self.restart_timer(generation);
        Ok(())
    }

    /// Clear the flag now, e.g. after a message was sent.
    pub async fn stop(&mut self) -> ChatResult<()> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        {
            let mut state = self.lock_state();
            state.generation += 1;
            state.typing = false;
        }
        self.tracker
            .set_typing(&self.conversation, &self.user, false)
            .await
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DebounceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn restart_timer(&mut self, generation: u64) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let tracker = self.tracker.clone();
        let conversation = self.conversation.clone();
        let user = self.user.clone();
        let state = Arc::clone(&self.state);
        let quiet_period = self.quiet_period;

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            {
                let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                if state.generation != generation || !state.typing {
                    return;
                }
                state.typing = false;
            }
            debug!(conversation_id = %conversation, "typing expired");
            if let Err(err) = tracker.set_typing(&conversation, &user, false).await {
                warn!(conversation_id = %conversation, error = %err, "failed to clear typing flag");
            }
        }));
    }
}
