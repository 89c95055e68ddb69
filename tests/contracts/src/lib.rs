//! Fixtures for behavior tests that run several clients against one
//! shared backend.

use anyhow::{bail, Context, Result};
use chatwave_client::{ChatClient, ClientConfig, ClientEvent, MemoryAuth, MemoryStore};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Longest a single pump step may wait for an event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// One in-memory store and account table shared by every client it builds.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub auth: Arc<MemoryAuth>,
    pub config: ClientConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        if std::env::var_os("RUST_LOG").is_some() {
            TRACING.call_once(chatwave_client::init_tracing);
        }
        Self {
            store: Arc::new(MemoryStore::new()),
            auth: Arc::new(MemoryAuth::new(config.min_password_length)),
            config,
        }
    }

    pub fn client(&self) -> ChatClient {
        ChatClient::new(self.store.clone(), self.auth.clone(), &self.config)
    }

    /// A client signed up as `<name>@example.com`.
    pub async fn signed_up(&self, name: &str) -> Result<ChatClient> {
        let mut client = self.client();
        client
            .sign_up(&email(name), "correct-horse", name)
            .await
            .with_context(|| format!("sign up {name}"))?;
        Ok(client)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn email(name: &str) -> String {
    format!("{}@example.com", name.to_lowercase())
}

/// Next event of `client`, failing when it goes idle or stays silent.
pub async fn next_event(client: &mut ChatClient) -> Result<ClientEvent> {
    match tokio::time::timeout(EVENT_TIMEOUT, client.next_event()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => bail!("client has no live subscriptions"),
        Err(_) => bail!("no event within {EVENT_TIMEOUT:?}"),
    }
}

/// Pump `client` until `done` holds for its state.
pub async fn pump_until<F>(client: &mut ChatClient, mut done: F) -> Result<()>
where
    F: FnMut(&ChatClient) -> bool,
{
    while !done(client) {
        next_event(client).await?;
    }
    Ok(())
}
