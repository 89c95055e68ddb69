//! Conversation state synchronization for 1:1 chat over a live document
//! store.

pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod messages;
pub mod presence;
pub mod schema;
pub mod session;
pub mod store;
pub mod view;

pub use auth::{AuthAccount, AuthError, AuthProvider, MemoryAuth};
pub use client::{ChatClient, ClientEvent};
pub use config::ClientConfig;
pub use directory::{Directory, DirectoryFeed, DirectoryUpdate};
pub use error::{ChatError, ChatResult};
pub use messages::{MessageFeed, MessageStore};
pub use presence::{TypingDebouncer, TypingFeed, TypingTracker};
pub use session::SessionProvider;
pub use store::{DocumentStore, MemoryStore, SledStore, StoreError};
pub use view::{ConversationView, ViewEvent, ViewPhase, ViewUpdate};

use std::sync::Arc;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Open the backend selected by `config`: the embedded database when a
/// store path is set, otherwise a process-local memory store.
pub fn open_store(config: &ClientConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match &config.store_path {
        Some(path) => {
            info!(path = %path.display(), "opening document store");
            Arc::new(SledStore::open(path)?)
        }
        None => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
