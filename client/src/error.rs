use crate::auth::AuthError;
use crate::store::StoreError;

/// Errors surfaced by the synchronization components.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("not signed in")]
    SignedOut,
    #[error("subscription ended: {0}")]
    Subscription(String),
    #[error("malformed document {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Errors shown to the user as inline form text.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ChatError::Auth(_) | ChatError::NotFound(_) | ChatError::InvalidOperation(_)
        )
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
