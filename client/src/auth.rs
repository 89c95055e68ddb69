//! Authentication contract and an in-memory account backend.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chatwave_messaging::UserId;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Failures reported by the auth collaborator. Display text is shown to
/// the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account with this email already exists")]
    EmailInUse,
    #[error("Password should be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("authentication backend error: {0}")]
    Backend(String),
}

/// Identity returned by a successful sign-up or sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAccount {
    pub uid: UserId,
    pub email: String,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthAccount, AuthError>;

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthAccount, AuthError>;

    async fn deauthenticate(&self) -> Result<(), AuthError>;
}

struct StoredAccount {
    uid: UserId,
    email: String,
    display_name: String,
    salt: String,
    digest: String,
}

/// Account table shared by every clone, so several clients in one process
/// authenticate against the same accounts.
#[derive(Clone)]
pub struct MemoryAuth {
    accounts: Arc<Mutex<HashMap<String, StoredAccount>>>,
    min_password_length: usize,
}

impl MemoryAuth {
    pub fn new(min_password_length: usize) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            min_password_length,
        }
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        general_purpose::STANDARD_NO_PAD.encode(hasher.finalize())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredAccount>>, AuthError> {
        self.accounts
            .lock()
            .map_err(|_| AuthError::Backend("account table lock poisoned".into()))
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new(6)
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthAccount, AuthError> {
        let key = normalize_email(email)?;
        if password.chars().count() < self.min_password_length {
            return Err(AuthError::WeakPassword {
                min: self.min_password_length,
            });
        }

        let mut accounts = self.lock()?;
        if accounts.contains_key(&key) {
            return Err(AuthError::EmailInUse);
        }

        let salt = Uuid::new_v4().to_string();
        let account = StoredAccount {
            uid: UserId::new(Uuid::new_v4().simple().to_string()),
            email: email.trim().to_string(),
            display_name: display_name.trim().to_string(),
            digest: Self::digest(&salt, password),
            salt,
        };
        let issued = AuthAccount {
            uid: account.uid.clone(),
            email: account.email.clone(),
            display_name: Some(account.display_name.clone()).filter(|n| !n.is_empty()),
        };
        accounts.insert(key, account);
        Ok(issued)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthAccount, AuthError> {
        let key = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let accounts = self.lock()?;
        let account = accounts.get(&key).ok_or(AuthError::InvalidCredentials)?;

        if Self::digest(&account.salt, password) != account.digest {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(AuthAccount {
            uid: account.uid.clone(),
            email: account.email.clone(),
            display_name: Some(account.display_name.clone()).filter(|n| !n.is_empty()),
        })
    }

    async fn deauthenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let auth = MemoryAuth::default();
        let issued = auth
            .register("Ada@Example.com", "hunter22", "Ada")
            .await
            .unwrap();

        let signed_in = auth.authenticate("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(signed_in.uid, issued.uid);
        assert_eq!(signed_in.display_name.as_deref(), Some("Ada"));

        let err = auth.authenticate("ada@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let auth = MemoryAuth::new(6);
        auth.register("ada@example.com", "hunter22", "Ada").await.unwrap();

        assert_eq!(
            auth.register("ADA@example.com", "hunter22", "Ada").await.unwrap_err(),
            AuthError::EmailInUse
        );
        assert_eq!(
            auth.register("bob@example.com", "123", "Bob").await.unwrap_err(),
            AuthError::WeakPassword { min: 6 }
        );
        assert_eq!(
            auth.register("not-an-email", "hunter22", "Bob").await.unwrap_err(),
            AuthError::InvalidEmail
        );
    }

    #[tokio::test]
    async fn test_clones_share_accounts() {
        let auth = MemoryAuth::default();
        let other = auth.clone();
        auth.register("ada@example.com", "hunter22", "Ada").await.unwrap();
        assert!(other.authenticate("ada@example.com", "hunter22").await.is_ok());
    }
}
