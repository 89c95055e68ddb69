//! Session Provider: the signed-in identity and its profile record.

use chatwave_messaging::{
    default_avatar_url, display_name_from_email, iso_timestamp, Profile,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::auth::{AuthAccount, AuthProvider};
use crate::config::ClientConfig;
use crate::error::{ChatError, ChatResult};
use crate::schema;
use crate::store::{to_fields, DocumentStore, StoreError};

/// Resolves the current identity and announces sign-in/sign-out to
/// dependents through a watch channel.
pub struct SessionProvider {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DocumentStore>,
    avatar_base_url: String,
    current: watch::Sender<Option<Profile>>,
}

impl SessionProvider {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        config: &ClientConfig,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            auth,
            store,
            avatar_base_url: config.avatar_base_url.clone(),
            current,
        }
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.current.borrow().clone()
    }

    /// Receiver that observes every sign-in and sign-out.
    pub fn watch(&self) -> watch::Receiver<Option<Profile>> {
        self.current.subscribe()
    }

    /// Register a new account and write its profile document.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> ChatResult<Profile> {
        let account = self.auth.register(email, password, display_name).await?;
        let profile = self.new_profile(&account);
        self.store
            .set(&schema::user_doc(&profile.id), to_fields(&profile)?)
            .await?;

        info!(uid = %profile.id, "account registered");
        self.current.send_replace(Some(profile.clone()));
        Ok(profile)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ChatResult<Profile> {
        let account = self.auth.authenticate(email, password).await?;
        let profile = self.ensure_profile(&account).await?;

        info!(uid = %profile.id, "signed in");
        self.current.send_replace(Some(profile.clone()));
        Ok(profile)
    }

    /// Announce the transition to signed-out, then end the auth session.
    pub async fn sign_out(&self) -> ChatResult<()> {
        let previous = self.current.send_replace(None);
        if let Some(profile) = previous {
            info!(uid = %profile.id, "signed out");
        }
        self.auth.deauthenticate().await?;
        Ok(())
    }

    fn new_profile(&self, account: &AuthAccount) -> Profile {
        let display_name = account
            .display_name
            .clone()
            .unwrap_or_else(|| display_name_from_email(&account.email));
        Profile {
            id: account.uid.clone(),
            email: account.email.clone(),
            photo_url: default_avatar_url(&self.avatar_base_url, &display_name),
            display_name,
            created_at: Some(iso_timestamp(Utc::now())),
        }
    }

    async fn ensure_profile(&self, account: &AuthAccount) -> ChatResult<Profile> {
        let path = schema::user_doc(&account.uid);

        let stored = match self.store.get(&path).await? {
            Some(doc) => schema::decode_profile(&doc)?,
            None => {
                debug!(uid = %account.uid, "creating missing profile");
                let profile = self.new_profile(account);
                match self.store.create(&path, to_fields(&profile)?).await {
                    Ok(()) => return Ok(profile),
                    Err(StoreError::AlreadyExists(_)) => {
                        let doc = self.store.get(&path).await?.ok_or_else(|| {
                            ChatError::NotFound(format!("profile {} vanished", account.uid))
                        })?;
                        schema::decode_profile(&doc)?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        Ok(self.fill_defaults(stored, account))
    }

    fn fill_defaults(&self, mut profile: Profile, account: &AuthAccount) -> Profile {
        if profile.email.is_empty() {
            profile.email = account.email.clone();
        }
        if profile.display_name.trim().is_empty() {
            profile.display_name = display_name_from_email(&account.email);
        }
        if profile.photo_url.is_empty() {
            profile.photo_url = default_avatar_url(&self.avatar_base_url, &profile.display_name);
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, MemoryAuth};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn provider() -> (SessionProvider, Arc<MemoryAuth>, Arc<MemoryStore>) {
        let auth = Arc::new(MemoryAuth::default());
        let store = Arc::new(MemoryStore::new());
        let session = SessionProvider::new(auth.clone(), store.clone(), &ClientConfig::default());
        (session, auth, store)
    }

    #[tokio::test]
    async fn test_sign_up_writes_profile() {
        let (session, _auth, store) = provider();
        let mut watcher = session.watch();

        let profile = session
            .sign_up("ada@example.com", "hunter22", "Ada Lovelace")
            .await
            .unwrap();

        assert_eq!(
            profile.photo_url,
            "https://ui-avatars.com/api/?name=Ada%20Lovelace&background=random"
        );
        let doc = store.get(&schema::user_doc(&profile.id)).await.unwrap().unwrap();
        assert_eq!(doc.get("displayName"), Some(&json!("Ada Lovelace")));
        assert_eq!(doc.get("email"), Some(&json!("ada@example.com")));

        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow().as_ref().map(|p| p.id.clone()), Some(profile.id));
    }

    #[tokio::test]
    async fn test_sign_in_creates_missing_profile() {
        let (session, auth, store) = provider();
        let account = auth
            .register("grace@example.com", "hunter22", "")
            .await
            .unwrap();

        let profile = session.sign_in("grace@example.com", "hunter22").await.unwrap();
        assert_eq!(profile.id, account.uid);
        assert_eq!(profile.display_name, "grace");
        assert!(store.get(&schema::user_doc(&account.uid)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_out_clears_profile() {
        let (session, _auth, _store) = provider();
        session
            .sign_up("ada@example.com", "hunter22", "Ada")
            .await
            .unwrap();
        assert!(session.current_profile().is_some());

        session.sign_out().await.unwrap();
        assert!(session.current_profile().is_none());
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_auth_error() {
        let (session, _auth, _store) = provider();
        let err = session.sign_in("nobody@example.com", "hunter22").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(AuthError::InvalidCredentials)));
        assert!(err.is_user_facing());
        assert!(session.current_profile().is_none());
    }
}
