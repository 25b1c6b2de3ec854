use crate::application::token_state::TokenStateStore;
use crate::domain::models::{AuthProviderKind, RefreshStrategy, TokenStatus};
use crate::infrastructure::auth_provider::InteractiveAuthProvider;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session::SessionProvider;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

pub const BACKGROUND_SKEW_SECONDS: i64 = 300;
pub const INTERACTIVE_SKEW_SECONDS: i64 = 60;

/// Bearer tokens for calendar requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// A fresh token when one can be obtained, else the last known (possibly
    /// stale) token, else `None`.
    async fn ensure_fresh_token(&self) -> Option<String>;
    /// Resets the attempt ceiling and forces a refresh; true when it produced a fresh token.
    async fn force_refresh(&self) -> bool;
    fn invalidate(&self) -> Result<(), InfraError>;
    /// Drops all token state after the provider refused the token. The refused
    /// session token is not picked up again.
    fn clear(&self) -> Result<(), InfraError>;
    fn status(&self) -> TokenStatus;
}

/// Each attempt uses the next strategy, so an episode makes at most
/// `min(strategies.len(), attempt_ceiling)` attempts. With the defaults the
/// 4 s backoff step is never reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub strategies: Vec<RefreshStrategy>,
    pub attempt_ceiling: u8,
    pub backoff_base: Duration,
    pub attempt_timeout: Duration,
    pub freshness_skew_seconds: i64,
    /// Skew for checks made on behalf of an explicit user action.
    pub interactive_skew_seconds: i64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            strategies: RefreshStrategy::ESCALATION.to_vec(),
            attempt_ceiling: 3,
            backoff_base: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(15),
            freshness_skew_seconds: BACKGROUND_SKEW_SECONDS,
            interactive_skew_seconds: INTERACTIVE_SKEW_SECONDS,
        }
    }
}

impl RefreshPolicy {
    /// Delay before the attempt that follows `previous_attempts` failures.
    pub fn backoff_for(&self, previous_attempts: u8) -> Duration {
        if previous_attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = u32::from(previous_attempts - 1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

pub struct TokenRefreshCoordinator<P, S>
where
    P: InteractiveAuthProvider,
    S: SessionProvider,
{
    token_state: Arc<TokenStateStore>,
    auth_provider: Arc<P>,
    session: Arc<S>,
    policy: RefreshPolicy,
    in_flight: AsyncMutex<()>,
}

impl<P, S> TokenRefreshCoordinator<P, S>
where
    P: InteractiveAuthProvider,
    S: SessionProvider,
{
    pub fn new(token_state: Arc<TokenStateStore>, auth_provider: Arc<P>, session: Arc<S>) -> Self {
        Self {
            token_state,
            auth_provider,
            session,
            policy: RefreshPolicy::default(),
            in_flight: AsyncMutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn token_state(&self) -> &Arc<TokenStateStore> {
        &self.token_state
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Forgets everything held for the signed-in account: token state, the
    /// rejected session token and the provider's refresh token.
    pub async fn sign_out(&self) -> Result<(), InfraError> {
        let _guard = self.in_flight.lock().await;
        self.auth_provider.sign_out();
        self.token_state.forget_rejection();
        self.token_state.clear()
    }

    /// One attempt with `strategy`, bounded by the attempt timeout. Failures
    /// resolve to `None`.
    pub async fn refresh(&self, strategy: RefreshStrategy) -> Option<String> {
        let attempt = tokio::time::timeout(
            self.policy.attempt_timeout,
            self.auth_provider.request_token(strategy),
        )
        .await;

        let grant = match attempt {
            Ok(Ok(grant)) => grant,
            Ok(Err(error)) => {
                warn!(strategy = strategy.as_str(), %error, "token refresh attempt failed");
                return None;
            }
            Err(_) => {
                warn!(
                    strategy = strategy.as_str(),
                    timeout_ms = self.policy.attempt_timeout.as_millis() as u64,
                    "token refresh attempt timed out"
                );
                return None;
            }
        };

        if let Err(error) = self
            .token_state
            .set(grant.access_token.clone(), grant.expires_in)
        {
            warn!(%error, "refreshed token expiry was not persisted");
        }
        info!(strategy = strategy.as_str(), expires_in = grant.expires_in, "token refreshed");
        Some(grant.access_token)
    }

    pub async fn ensure_fresh_token(&self) -> Option<String> {
        let _guard = self.in_flight.lock().await;
        self.ensure_fresh_locked(false).await
    }

    pub async fn force_refresh(&self) -> bool {
        let _guard = self.in_flight.lock().await;
        self.token_state.reset_attempts();
        if self.token_state.token().is_some() {
            if let Err(error) = self.token_state.invalidate() {
                warn!(%error, "failed to persist invalidated token expiry");
            }
        }
        let calendar_user = self.adopt_session_token();
        self.ensure_fresh_locked(calendar_user).await.is_some()
            && self.token_state.is_fresh(self.policy.interactive_skew_seconds)
    }

    /// Adopts the session's bearer token when the store holds none. Returns
    /// true when the signed-in user can grant calendar access.
    fn adopt_session_token(&self) -> bool {
        let user = match self.session.current_user() {
            Ok(user) => user,
            Err(error) => {
                warn!(%error, "session lookup failed");
                return false;
            }
        };
        let Some(user) = user else {
            return false;
        };

        if let Some(token) = user.provider_token.as_deref() {
            if let Err(error) = self.token_state.adopt_session_token(token) {
                warn!(%error, "failed to persist adopted token expiry");
            }
        }
        user.provider == AuthProviderKind::Google
    }

    async fn ensure_fresh_locked(&self, refresh_without_token: bool) -> Option<String> {
        self.adopt_session_token();
        let current = self.token_state.token();
        if current.is_none() && !refresh_without_token {
            debug!("no bearer token available");
            return None;
        }
        if current.is_some() && self.token_state.is_fresh(self.policy.freshness_skew_seconds) {
            return current;
        }

        let ceiling = self.policy.attempt_ceiling;
        for strategy in &self.policy.strategies {
            let previous = self.token_state.refresh_attempts();
            if previous >= ceiling {
                info!(attempts = previous, "refresh attempt ceiling reached");
                break;
            }

            let delay = self.policy.backoff_for(previous);
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "backing off before next refresh attempt");
                tokio::time::sleep(delay).await;
            }

            self.token_state.record_attempt(ceiling);
            if let Some(token) = self.refresh(*strategy).await {
                return Some(token);
            }
        }

        warn!("token refresh exhausted; returning last known token");
        self.token_state.token()
    }
}

#[async_trait]
impl<P, S> AccessTokenSource for TokenRefreshCoordinator<P, S>
where
    P: InteractiveAuthProvider,
    S: SessionProvider,
{
    async fn ensure_fresh_token(&self) -> Option<String> {
        TokenRefreshCoordinator::ensure_fresh_token(self).await
    }

    async fn force_refresh(&self) -> bool {
        TokenRefreshCoordinator::force_refresh(self).await
    }

    fn invalidate(&self) -> Result<(), InfraError> {
        self.token_state.invalidate()
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.token_state.reject()
    }

    fn status(&self) -> TokenStatus {
        self.token_state.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionUser;
    use crate::infrastructure::auth_provider::AuthGrant;
    use crate::infrastructure::key_value_store::InMemoryKeyValueStore;
    use crate::infrastructure::session::StaticSessionProvider;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct ScriptedAuthProvider {
        responses: Mutex<VecDeque<Option<AuthGrant>>>,
        calls: Mutex<Vec<RefreshStrategy>>,
        delay: Option<Duration>,
        sign_outs: AtomicUsize,
    }

    impl ScriptedAuthProvider {
        fn with_responses(responses: Vec<Option<AuthGrant>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<RefreshStrategy> {
            self.calls.lock().expect("calls mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl InteractiveAuthProvider for ScriptedAuthProvider {
        async fn request_token(&self, strategy: RefreshStrategy) -> Result<AuthGrant, InfraError> {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(strategy);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .expect("responses mutex poisoned")
                .pop_front()
                .flatten()
                .ok_or_else(|| InfraError::OAuth("popup_closed".to_string()))
        }

        fn sign_out(&self) {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn grant(token: &str) -> AuthGrant {
        AuthGrant {
            access_token: token.to_string(),
            expires_in: 3599,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn google_user(token: Option<&str>) -> SessionUser {
        SessionUser {
            id: "user-1".to_string(),
            provider: AuthProviderKind::Google,
            provider_token: token.map(ToOwned::to_owned),
        }
    }

    fn coordinator(
        provider: ScriptedAuthProvider,
        user: Option<SessionUser>,
    ) -> (
        Arc<TokenRefreshCoordinator<ScriptedAuthProvider, StaticSessionProvider>>,
        Arc<ScriptedAuthProvider>,
    ) {
        let token_state = Arc::new(
            TokenStateStore::new(Arc::new(InMemoryKeyValueStore::default()))
                .with_now_provider(Arc::new(fixed_now)),
        );
        let provider = Arc::new(provider);
        let session = Arc::new(StaticSessionProvider::new(user));
        let coordinator = Arc::new(TokenRefreshCoordinator::new(
            token_state,
            Arc::clone(&provider),
            session,
        ));
        (coordinator, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_token_is_returned_without_provider_calls() {
        let (coordinator, provider) = coordinator(ScriptedAuthProvider::default(), None);
        coordinator
            .token_state()
            .set("fresh", 3600)
            .expect("seed token");

        assert_eq!(coordinator.ensure_fresh_token().await.as_deref(), Some("fresh"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_escalates_from_silent_to_consent() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::with_responses(vec![None, Some(grant("consented"))]),
            None,
        );
        coordinator
            .token_state()
            .set("expired", 0)
            .expect("seed token");
        coordinator.token_state().invalidate().expect("expire token");

        let token = coordinator.ensure_fresh_token().await;

        assert_eq!(token.as_deref(), Some("consented"));
        assert_eq!(
            provider.calls(),
            vec![RefreshStrategy::Silent, RefreshStrategy::Consent]
        );
        assert_eq!(coordinator.token_state().refresh_attempts(), 0);
        assert!(coordinator.token_state().is_fresh(BACKGROUND_SKEW_SECONDS));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_escalation_and_returns_stale_token() {
        let (coordinator, provider) = coordinator(ScriptedAuthProvider::default(), None);
        coordinator.token_state().set("stale", 10).expect("seed token");

        assert_eq!(coordinator.ensure_fresh_token().await.as_deref(), Some("stale"));
        assert_eq!(provider.calls().len(), 3);
        assert_eq!(coordinator.token_state().refresh_attempts(), 3);

        assert_eq!(coordinator.ensure_fresh_token().await.as_deref(), Some("stale"));
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_exponentially() {
        let (coordinator, _provider) = coordinator(ScriptedAuthProvider::default(), None);
        coordinator.token_state().set("stale", 10).expect("seed token");

        let started = tokio::time::Instant::now();
        coordinator.ensure_fresh_token().await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_times_out_and_escalates() {
        let provider = ScriptedAuthProvider {
            delay: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        let (coordinator, provider) = coordinator(provider, None);
        coordinator.token_state().set("stale", 10).expect("seed token");

        let token = coordinator.ensure_fresh_token().await;

        assert_eq!(token.as_deref(), Some("stale"));
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_resolves_to_none_without_attempts() {
        let (coordinator, provider) = coordinator(ScriptedAuthProvider::default(), None);

        assert_eq!(coordinator.ensure_fresh_token().await, None);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_token_is_adopted_with_default_lifetime() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::default(),
            Some(google_user(Some("session-token"))),
        );

        assert_eq!(
            coordinator.ensure_fresh_token().await.as_deref(),
            Some("session-token")
        );
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh_episode() {
        let provider = ScriptedAuthProvider {
            responses: Mutex::new(vec![Some(grant("shared"))].into()),
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let (coordinator, provider) = coordinator(provider, None);
        coordinator.token_state().set("stale", 10).expect("seed token");

        let (first, second) = tokio::join!(
            coordinator.ensure_fresh_token(),
            coordinator.ensure_fresh_token()
        );

        assert_eq!(first.as_deref(), Some("shared"));
        assert_eq!(second.as_deref(), Some("shared"));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_resets_ceiling() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::with_responses(vec![None, None, None, Some(grant("renewed"))]),
            Some(google_user(None)),
        );
        coordinator.token_state().set("stale", 10).expect("seed token");
        coordinator.ensure_fresh_token().await;
        assert_eq!(provider.calls().len(), 3);

        assert!(coordinator.force_refresh().await);
        assert_eq!(provider.calls().len(), 4);
        assert_eq!(coordinator.token_state().token().as_deref(), Some("renewed"));
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_without_token_prompts_google_user() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::with_responses(vec![Some(grant("granted"))]),
            Some(google_user(None)),
        );

        assert!(coordinator.force_refresh().await);
        assert_eq!(provider.calls(), vec![RefreshStrategy::Silent]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_session_token_is_not_readopted_by_force_refresh() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::default(),
            Some(google_user(Some("bad"))),
        );
        assert_eq!(coordinator.ensure_fresh_token().await.as_deref(), Some("bad"));

        AccessTokenSource::clear(coordinator.as_ref()).expect("clear refused token");
        let refreshed = coordinator.force_refresh().await;

        assert!(!refreshed);
        assert_eq!(provider.calls().len(), 3);
        let status = coordinator.status();
        assert!(!status.has_token);
        assert!(status.is_expired);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_resets_provider_and_token_state() {
        let (coordinator, provider) = coordinator(
            ScriptedAuthProvider::with_responses(vec![Some(grant("granted"))]),
            Some(google_user(None)),
        );
        assert!(coordinator.force_refresh().await);

        coordinator.sign_out().await.expect("sign out");

        assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.token_state().token(), None);
        assert!(!coordinator.status().has_token);
    }

    #[test]
    fn backoff_doubles_per_previous_attempt() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    }
}
