use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the chat client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Quiet period after the last keystroke before the typing flag clears.
    pub typing_quiet_period: Duration,
    /// Base URL of the generated avatar service.
    pub avatar_base_url: String,
    /// Shortest password the in-memory auth backend accepts.
    pub min_password_length: usize,
    /// On-disk location of the embedded store; in-memory when unset.
    pub store_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let typing_quiet_period = match env::var("CHATWAVE_TYPING_QUIET_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse()
                    .with_context(|| format!("invalid CHATWAVE_TYPING_QUIET_MS {raw:?}"))?,
            ),
            Err(_) => defaults.typing_quiet_period,
        };
        let min_password_length = match env::var("CHATWAVE_MIN_PASSWORD_LEN") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid CHATWAVE_MIN_PASSWORD_LEN {raw:?}"))?,
            Err(_) => defaults.min_password_length,
        };
        let avatar_base_url =
            env::var("CHATWAVE_AVATAR_URL").unwrap_or(defaults.avatar_base_url);
        let store_path = env::var("CHATWAVE_STORE_PATH").ok().map(PathBuf::from);

        Ok(Self {
            typing_quiet_period,
            avatar_base_url,
            min_password_length,
            store_path,
        })
    }

    pub fn with_typing_quiet_period(mut self, period: Duration) -> Self {
        self.typing_quiet_period = period;
        self
    }

    pub fn with_avatar_base_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_base_url = url.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_quiet_period: Duration::from_secs(3),
            avatar_base_url: "https://ui-avatars.com/api/".to_string(),
            min_password_length: 6,
            store_path: None,
        }
    }
}
