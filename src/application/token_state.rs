use crate::domain::models::{TokenState, TokenStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub const TOKEN_EXPIRY_KEY: &str = "subtracker-token-expires";
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Process-wide bearer token state. The expiry is written through to the
/// key-value slot on every mutation; the token itself stays in memory.
pub struct TokenStateStore {
    storage: Arc<dyn KeyValueStore>,
    state: Mutex<TokenState>,
    rejected_session_token: Mutex<Option<String>>,
    now_provider: NowProvider,
    default_lifetime: Duration,
}

impl TokenStateStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            state: Mutex::new(TokenState::default()),
            rejected_session_token: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
            default_lifetime: Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_default_lifetime(mut self, seconds: i64) -> Self {
        self.default_lifetime = Duration::seconds(seconds.max(0));
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Current state; an unset in-memory expiry falls back to the persisted one.
    pub fn get(&self) -> TokenState {
        let mut snapshot = self.lock().clone();
        if snapshot.expires_at.is_none() {
            snapshot.expires_at = self.load_persisted_expiry();
        }
        snapshot
    }

    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    pub fn set(&self, token: impl Into<String>, expires_in_seconds: i64) -> Result<(), InfraError> {
        let expires_at = self.now() + Duration::seconds(expires_in_seconds.max(0));
        {
            let mut state = self.lock();
            state.token = Some(token.into());
            state.expires_at = Some(expires_at);
            state.refresh_attempts = 0;
        }
        debug!(expires_at = %expires_at, "stored refreshed token");
        self.persist_expiry(expires_at)
    }

    pub fn clear(&self) -> Result<(), InfraError> {
        *self.lock() = TokenState::default();
        debug!("cleared token state");
        self.storage.remove(TOKEN_EXPIRY_KEY)
    }

    /// Clears all state after the provider refused the held token. That token
    /// is not adopted from the session again until `forget_rejection`.
    pub fn reject(&self) -> Result<(), InfraError> {
        if let Some(token) = self.token() {
            *self
                .rejected_session_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(token);
        }
        self.clear()
    }

    pub fn forget_rejection(&self) {
        *self
            .rejected_session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// True iff an expiry is known and `now < expires_at - skew`.
    pub fn is_fresh(&self, skew_seconds: i64) -> bool {
        match self.get().expires_at {
            Some(expires_at) => self.now() < expires_at - Duration::seconds(skew_seconds),
            None => false,
        }
    }

    /// Marks the current token as expired without dropping it.
    pub fn invalidate(&self) -> Result<(), InfraError> {
        let now = self.now();
        self.lock().expires_at = Some(now);
        self.persist_expiry(now)
    }

    pub fn refresh_attempts(&self) -> u8 {
        self.lock().refresh_attempts
    }

    /// Increments the attempt counter, never past `ceiling`, and returns the new value.
    pub fn record_attempt(&self, ceiling: u8) -> u8 {
        let mut state = self.lock();
        state.refresh_attempts = state.refresh_attempts.saturating_add(1).min(ceiling);
        state.refresh_attempts
    }

    pub fn reset_attempts(&self) {
        self.lock().refresh_attempts = 0;
    }

    /// Takes over the session's bearer token when none is held yet. An unknown
    /// expiry is replaced by the default lifetime. A rejected token is skipped.
    pub fn adopt_session_token(&self, token: &str) -> Result<(), InfraError> {
        if token.trim().is_empty() || self.lock().token.is_some() {
            return Ok(());
        }
        let rejected = self
            .rejected_session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(token);
        if rejected {
            debug!("session token was rejected earlier; not adopting it");
            return Ok(());
        }

        let known_expiry = self.get().expires_at;
        let expires_at = known_expiry.unwrap_or_else(|| self.now() + self.default_lifetime);
        {
            let mut state = self.lock();
            state.token = Some(token.to_string());
            state.expires_at = Some(expires_at);
        }
        if known_expiry.is_none() {
            debug!("session token adopted with default lifetime");
            self.persist_expiry(expires_at)?;
        }
        Ok(())
    }

    pub fn status(&self) -> TokenStatus {
        let state = self.get();
        let has_token = state.token.is_some();
        let now = self.now();
        let remaining = state
            .expires_at
            .map(|expires_at| (expires_at - now).num_seconds())
            .filter(|seconds| *seconds > 0);

        TokenStatus {
            has_token,
            is_expired: !has_token || remaining.is_none(),
            expires_in: if has_token { remaining } else { None },
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_expiry(&self, expires_at: DateTime<Utc>) -> Result<(), InfraError> {
        self.storage
            .set(TOKEN_EXPIRY_KEY, &expires_at.timestamp_millis().to_string())
    }

    fn load_persisted_expiry(&self) -> Option<DateTime<Utc>> {
        let raw = match self.storage.get(TOKEN_EXPIRY_KEY) {
            Ok(value) => value?,
            Err(error) => {
                warn!(%error, "failed to read persisted token expiry");
                return None;
            }
        };

        let millis = match raw.trim().parse::<i64>() {
            Ok(millis) if millis > 0 => millis,
            _ => {
                warn!(value = %raw, "ignoring malformed persisted token expiry");
                return None;
            }
        };
        Utc.timestamp_millis_opt(millis).single()
    }
}
