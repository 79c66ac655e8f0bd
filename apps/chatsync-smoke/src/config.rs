//! Environment-backed configuration for `chatsync-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use chatsync_core::RuntimeConfig;
use chatsync_http::HttpGatewayConfig;
use chatsync_platform::{SecretStore, TokenStore};
use tracing::{debug, warn};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FETCH_RETRIES: u32 = 2;
const DEFAULT_TYPING_IDLE_MS: u64 = 2_000;

#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the user/profile service.
    pub user_service: String,
    /// Base URL of the chat/message service.
    pub chat_service: String,
    /// Bearer credential from `CHATSYNC_TOKEN`; see [`SyncConfig::session_token`].
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub fetch_retries: u32,
    pub typing_idle: Duration,
    /// Conversation to open after the initial load.
    pub open_chat: Option<String>,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("user_service", &self.user_service)
            .field("chat_service", &self.chat_service)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("fetch_retries", &self.fetch_retries)
            .field("typing_idle", &self.typing_idle)
            .field("open_chat", &self.open_chat)
            .finish()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let user_service = required_env("CHATSYNC_USER_SERVICE", &mut lookup)?;
        let chat_service = required_env("CHATSYNC_CHAT_SERVICE", &mut lookup)?;
        let token = optional_trimmed_env("CHATSYNC_TOKEN", &mut lookup);
        let open_chat = optional_trimmed_env("CHATSYNC_SMOKE_CHAT", &mut lookup);

        let request_timeout_ms = parse_positive_u64(
            "CHATSYNC_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let fetch_retries = match optional_trimmed_env("CHATSYNC_FETCH_RETRIES", &mut lookup) {
            Some(value) => value
                .parse::<u32>()
                .map_err(|err| ConfigError::InvalidValue {
                    key: "CHATSYNC_FETCH_RETRIES",
                    value,
                    reason: err.to_string(),
                })?,
            None => DEFAULT_FETCH_RETRIES,
        };
        let typing_idle_ms =
            parse_positive_u64("CHATSYNC_TYPING_IDLE_MS", DEFAULT_TYPING_IDLE_MS, &mut lookup)?;

        Ok(Self {
            user_service,
            chat_service,
            token,
            request_timeout: Duration::from_millis(request_timeout_ms),
            fetch_retries,
            typing_idle: Duration::from_millis(typing_idle_ms),
            open_chat,
        })
    }

    pub fn gateway_config(&self) -> HttpGatewayConfig {
        HttpGatewayConfig::new(self.user_service.clone(), self.chat_service.clone())
            .with_request_timeout(self.request_timeout)
            .with_fetch_retries(self.fetch_retries)
    }

    /// Token for this run.
    ///
    /// An explicit `CHATSYNC_TOKEN` wins and is remembered in `tokens` for
    /// later runs. Otherwise the stored token is used; `None` runs the
    /// no-session path.
    pub fn session_token<S: SecretStore>(&self, tokens: &TokenStore<S>) -> Option<String> {
        if let Some(token) = self.token.clone() {
            if let Err(err) = tokens.save(&token) {
                warn!(account = %tokens.account(), error = %err, "could not store session token");
            }
            return Some(token);
        }

        match tokens.load() {
            Ok(Some(token)) if !token.trim().is_empty() => {
                debug!(account = %tokens.account(), "using stored session token");
                Some(token)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(account = %tokens.account(), error = %err, "stored session token unreadable");
                None
            }
        }
    }

    /// Upper bound for one fetch including every retry, plus a second of slack.
    pub fn load_wait(&self) -> Duration {
        self.request_timeout
            .saturating_mul(self.fetch_retries.saturating_add(1))
            .saturating_add(Duration::from_secs(1))
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            typing_idle: self.typing_idle,
            ..RuntimeConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    Missing { key: &'static str },
    /// A variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_positive_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be greater than 0".to_owned(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chatsync_platform::InMemorySecretStore;

    use super::*;

    const SERVICES: [(&str, &str); 2] = [
        ("CHATSYNC_USER_SERVICE", "http://localhost:5000"),
        ("CHATSYNC_CHAT_SERVICE", "http://localhost:5002"),
    ];

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map = SERVICES
            .iter()
            .chain(pairs)
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.request_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.fetch_retries, 2);
        assert_eq!(cfg.typing_idle, Duration::from_secs(2));
        assert_eq!(cfg.runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn reads_token_and_tuning() {
        let cfg = config_from_pairs(&[
            ("CHATSYNC_TOKEN", " abc "),
            ("CHATSYNC_REQUEST_TIMEOUT_MS", "2500"),
            ("CHATSYNC_FETCH_RETRIES", "0"),
            ("CHATSYNC_TYPING_IDLE_MS", "750"),
            ("CHATSYNC_SMOKE_CHAT", "c1"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.token.as_deref(), Some("abc"));
        assert_eq!(cfg.open_chat.as_deref(), Some("c1"));
        let gateway = cfg.gateway_config();
        assert_eq!(gateway.request_timeout, Duration::from_millis(2_500));
        assert_eq!(gateway.fetch_retries, 0);
        assert_eq!(cfg.runtime_config().typing_idle, Duration::from_millis(750));
    }

    #[test]
    fn requires_service_urls() {
        let err = SyncConfig::from_lookup(|_| None).expect_err("missing URLs must fail");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "CHATSYNC_USER_SERVICE"
            }
        );
    }

    #[test]
    fn rejects_zero_and_garbage_durations() {
        let err = config_from_pairs(&[("CHATSYNC_TYPING_IDLE_MS", "0")])
            .expect_err("zero idle must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHATSYNC_TYPING_IDLE_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("CHATSYNC_REQUEST_TIMEOUT_MS", "soon")])
            .expect_err("garbage timeout must fail");
        assert!(err.to_string().contains("CHATSYNC_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn debug_output_redacts_token() {
        let cfg = config_from_pairs(&[("CHATSYNC_TOKEN", "hunter2")]).expect("config should parse");
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn explicit_token_is_used_and_remembered() {
        let cfg = config_from_pairs(&[("CHATSYNC_TOKEN", "fresh")]).expect("config should parse");
        let tokens = TokenStore::new(InMemorySecretStore::default(), &cfg.user_service);
        tokens.save("stale").expect("save should work");

        assert_eq!(cfg.session_token(&tokens).as_deref(), Some("fresh"));
        assert_eq!(tokens.load(), Ok(Some("fresh".to_owned())));
    }

    #[test]
    fn stored_token_fills_in_when_env_is_unset() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        let tokens = TokenStore::new(InMemorySecretStore::default(), &cfg.user_service);
        assert_eq!(cfg.session_token(&tokens), None);

        tokens.save("remembered").expect("save should work");
        assert_eq!(cfg.session_token(&tokens).as_deref(), Some("remembered"));

        tokens.clear().expect("clear should work");
        assert_eq!(cfg.session_token(&tokens), None);
    }

    #[test]
    fn load_wait_covers_retries_without_overflow() {
        let cfg = config_from_pairs(&[("CHATSYNC_REQUEST_TIMEOUT_MS", "1000")])
            .expect("config should parse");
        assert_eq!(cfg.load_wait(), Duration::from_secs(4));

        let cfg = config_from_pairs(&[
            ("CHATSYNC_REQUEST_TIMEOUT_MS", "18446744073709551615"),
            ("CHATSYNC_FETCH_RETRIES", "4294967295"),
        ])
        .expect("config should parse");
        assert_eq!(cfg.load_wait(), Duration::MAX);
    }
}
