use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_client::CalendarSyncClient;
use crate::application::insights::InsightService;
use crate::application::subscription_calendar::SubscriptionCalendarOrchestrator;
use crate::application::token_health::{MonitorPolicy, TokenHealthMonitor, TokenHealthReport};
use crate::application::token_refresh::{RefreshPolicy, TokenRefreshCoordinator};
use crate::application::token_state::TokenStateStore;
use crate::domain::analytics::{
    category_breakdown, spending_summary, upcoming_payments, CategoryShare, SpendingSummary,
    UpcomingPayments,
};
use crate::domain::models::{
    Insight, RefreshStrategy, SessionUser, Subscription, SubscriptionChanges, SubscriptionDraft,
};
use crate::infrastructure::auth_provider::{
    ConsentGateway, OAuthCodeFlowProvider, OAuthConfig, CALENDAR_SCOPE,
};
use crate::infrastructure::calendar_transport::ReqwestCalendarTransport;
use crate::infrastructure::config::{AppConfig, AuthConfig, MonitorConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::ReminderSettings;
use crate::infrastructure::insight_client::ReqwestInsightClient;
use crate::infrastructure::key_value_store::SqliteKeyValueStore;
use crate::infrastructure::oauth_client::ReqwestOAuthClient;
use crate::infrastructure::session::{SessionProvider, StaticSessionProvider};
use crate::infrastructure::subscription_repository::SqliteSubscriptionRepository;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";

type AuthProvider = OAuthCodeFlowProvider<ReqwestOAuthClient, dyn ConsentGateway>;
type Tokens = TokenRefreshCoordinator<AuthProvider, StaticSessionProvider>;
type Calendar = CalendarSyncClient<Tokens, ReqwestCalendarTransport>;
type Orchestrator =
    SubscriptionCalendarOrchestrator<SqliteSubscriptionRepository, Calendar, StaticSessionProvider>;
type Monitor = TokenHealthMonitor<Tokens, Calendar, StaticSessionProvider>;
type Insights = InsightService<ReqwestInsightClient, StaticSessionProvider>;

/// The wired application for one workspace directory.
pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    time_zone: Tz,
    session: Arc<StaticSessionProvider>,
    tokens: Arc<Tokens>,
    orchestrator: Orchestrator,
    monitor: Arc<Monitor>,
    insights: Insights,
}

impl AppState {
    pub fn new(
        workspace_root: PathBuf,
        oauth_config: OAuthConfig,
        consent_gateway: Arc<dyn ConsentGateway>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = bootstrap.config;
        let time_zone = config.time_zone()?;
        let http_timeout = Duration::from_secs(config.http.request_timeout_seconds);

        let session = Arc::new(StaticSessionProvider::default());
        let token_state = Arc::new(
            TokenStateStore::new(Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path)))
                .with_default_lifetime(config.auth.default_lifetime_seconds),
        );
        let auth_provider: Arc<AuthProvider> = Arc::new(OAuthCodeFlowProvider::new(
            oauth_config,
            Arc::new(ReqwestOAuthClient::new(http_timeout)?),
            consent_gateway,
        ));
        let tokens = Arc::new(
            TokenRefreshCoordinator::new(token_state, auth_provider, Arc::clone(&session))
                .with_policy(refresh_policy(&config.auth)),
        );
        let calendar = Arc::new(
            CalendarSyncClient::new(
                Arc::clone(&tokens),
                Arc::new(ReqwestCalendarTransport::new(http_timeout)?),
            )
            .with_calendar_id(config.calendar_id.clone())
            .with_reminder_settings(reminder_settings(&config, time_zone))
            .with_network_retry_delay(Duration::from_millis(config.auth.network_retry_delay_ms)),
        );
        let orchestrator = SubscriptionCalendarOrchestrator::new(
            Arc::new(SqliteSubscriptionRepository::new(&bootstrap.database_path)),
            Arc::clone(&calendar),
            Arc::clone(&session),
        )
        .with_time_zone(time_zone);
        let monitor = Arc::new(
            TokenHealthMonitor::new(Arc::clone(&tokens), calendar, Arc::clone(&session))
                .with_policy(monitor_policy(&config.monitor)),
        );
        let insight_client = match config.insights.endpoint() {
            Some(endpoint) => Some(Arc::new(ReqwestInsightClient::new(endpoint, http_timeout)?)),
            None => None,
        };
        let insights = InsightService::new(insight_client, Arc::clone(&session));

        info!(
            workspace = %bootstrap.workspace_root.display(),
            calendar_id = %config.calendar_id,
            timezone = %time_zone,
            "application state initialized"
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            time_zone,
            session,
            tokens,
            orchestrator,
            monitor,
            insights,
        })
    }

    pub fn from_env(
        workspace_root: PathBuf,
        consent_gateway: Arc<dyn ConsentGateway>,
    ) -> Result<Self, InfraError> {
        Self::new(workspace_root, load_oauth_config_from_env()?, consent_gateway)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Starts the periodic token check; abort the handle on shutdown.
    pub fn start_token_monitor(&self) -> JoinHandle<()> {
        self.monitor.spawn_interval()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }
}

pub async fn sign_in_impl(state: &AppState, user: SessionUser) -> Result<TokenHealthReport, InfraError> {
    let user_id = user.id.clone();
    state.session.sign_in(user)?;
    state.monitor.on_mount().await;
    info!(%user_id, "signed in");
    Ok(state.monitor.report())
}

pub async fn sign_out_impl(state: &AppState) -> Result<(), InfraError> {
    state.session.sign_out()?;
    state.tokens.sign_out().await?;
    info!("signed out");
    Ok(())
}

pub async fn list_subscriptions_impl(state: &AppState) -> Result<Vec<Subscription>, InfraError> {
    state.orchestrator.list().await
}

pub async fn get_subscription_impl(state: &AppState, id: String) -> Result<Subscription, InfraError> {
    state.orchestrator.get(required_id(&id)?).await
}

pub async fn create_subscription_impl(
    state: &AppState,
    draft: SubscriptionDraft,
) -> Result<Subscription, InfraError> {
    state.orchestrator.create(draft).await
}

pub async fn update_subscription_impl(
    state: &AppState,
    id: String,
    changes: SubscriptionChanges,
) -> Result<Subscription, InfraError> {
    state.orchestrator.update(required_id(&id)?, changes).await
}

pub async fn delete_subscription_impl(state: &AppState, id: String) -> Result<bool, InfraError> {
    state.orchestrator.delete(required_id(&id)?).await?;
    Ok(true)
}

pub fn get_token_status_impl(state: &AppState) -> TokenHealthReport {
    state.monitor.report()
}

pub async fn force_token_refresh_impl(state: &AppState) -> Result<TokenHealthReport, InfraError> {
    if state.session.current_user()?.is_none() {
        return Err(InfraError::Unauthenticated);
    }
    let refreshed = state.tokens.force_refresh().await;
    info!(refreshed, "manual token refresh finished");
    Ok(state.monitor.report())
}

pub async fn get_spending_summary_impl(state: &AppState) -> Result<SpendingSummary, InfraError> {
    let subscriptions = state.orchestrator.list().await?;
    Ok(spending_summary(&subscriptions, state.orchestrator.today()))
}

pub async fn get_upcoming_payments_impl(state: &AppState) -> Result<UpcomingPayments, InfraError> {
    let subscriptions = state.orchestrator.list().await?;
    Ok(upcoming_payments(&subscriptions, state.orchestrator.today()))
}

pub async fn get_category_breakdown_impl(state: &AppState) -> Result<Vec<CategoryShare>, InfraError> {
    let subscriptions = state.orchestrator.list().await?;
    Ok(category_breakdown(&subscriptions))
}

pub async fn generate_insights_impl(state: &AppState) -> Result<Vec<Insight>, InfraError> {
    let subscriptions = state.orchestrator.list().await?;
    Ok(state.insights.generate(&subscriptions).await)
}

fn required_id(id: &str) -> Result<&str, InfraError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(InfraError::Validation("subscription id must not be empty".to_string()));
    }
    Ok(id)
}

fn refresh_policy(auth: &AuthConfig) -> RefreshPolicy {
    RefreshPolicy {
        strategies: RefreshStrategy::ESCALATION.to_vec(),
        attempt_ceiling: auth.refresh_ceiling,
        backoff_base: Duration::from_millis(auth.backoff_base_ms),
        attempt_timeout: Duration::from_secs(auth.attempt_timeout_seconds),
        freshness_skew_seconds: auth.background_skew_seconds,
        interactive_skew_seconds: auth.interactive_skew_seconds,
    }
}

fn reminder_settings(config: &AppConfig, time_zone: Tz) -> ReminderSettings {
    ReminderSettings {
        time_zone,
        lead_days: config.reminder.lead_days,
        hour: config.reminder.hour,
        duration_minutes: config.reminder.duration_minutes,
        popup_minutes: config.reminder.popup_minutes,
        email_minutes: config.reminder.email_minutes,
    }
}

fn monitor_policy(monitor: &MonitorConfig) -> MonitorPolicy {
    MonitorPolicy {
        interval: Duration::from_secs(monitor.interval_seconds.max(1)),
        interval_threshold_seconds: monitor.interval_threshold_seconds,
        visibility_threshold_seconds: monitor.visibility_threshold_seconds,
    }
}

pub fn load_oauth_config_from_env() -> Result<OAuthConfig, InfraError> {
    load_oauth_config_from_lookup(|key| std::env::var(key).ok())
}

fn load_oauth_config_from_lookup<F>(lookup: F) -> Result<OAuthConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["SUBTRACKER_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["SUBTRACKER_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;
    let redirect_uri = optional_lookup_value(
        &lookup,
        &["SUBTRACKER_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"],
    )
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, &["SUBTRACKER_GOOGLE_SCOPES", "GOOGLE_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| vec![CALENDAR_SCOPE.to_string()]);

    Ok(OAuthConfig::new(client_id, client_secret, redirect_uri, scopes))
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::token_health::HealthLevel;
    use crate::domain::models::{AuthProviderKind, BillingPeriod, InsightKind};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct DismissingGateway;

    #[async_trait]
    impl ConsentGateway for DismissingGateway {
        async fn request_authorization_code(
            &self,
            _authorization_url: &str,
            _strategy: RefreshStrategy,
        ) -> Result<Option<String>, InfraError> {
            Ok(None)
        }
    }

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "subtracker-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::new(
                self.path.clone(),
                OAuthConfig::new(
                    "client-id",
                    "client-secret",
                    DEFAULT_REDIRECT_URI,
                    vec![CALENDAR_SCOPE.to_string()],
                ),
                Arc::new(DismissingGateway),
            )
            .expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn email_user() -> SessionUser {
        SessionUser {
            id: "user-1".to_string(),
            provider: AuthProviderKind::Email,
            provider_token: None,
        }
    }

    fn draft(name: &str, amount: f64, days_ahead: i64) -> SubscriptionDraft {
        SubscriptionDraft {
            name: name.to_string(),
            amount,
            currency: "RUB".to_string(),
            billing_period: BillingPeriod::Monthly,
            next_payment_date: Utc::now().date_naive() + ChronoDuration::days(days_ahead),
            category: Some("Entertainment".to_string()),
            url: None,
        }
    }

    #[test]
    fn oauth_config_validation_reports_missing_client_id() {
        let result = load_oauth_config_from_lookup(|key| match key {
            "SUBTRACKER_GOOGLE_CLIENT_SECRET" => Some("secret".to_string()),
            _ => None,
        });
        match result {
            Err(InfraError::InvalidConfig(message)) => {
                assert!(message.contains("google client id"));
            }
            _ => panic!("expected invalid config error"),
        }
    }

    #[test]
    fn oauth_config_falls_back_to_generic_keys_and_default_scope() {
        let config = load_oauth_config_from_lookup(|key| match key {
            "GOOGLE_CLIENT_ID" => Some(" id ".to_string()),
            "GOOGLE_CLIENT_SECRET" => Some("secret".to_string()),
            "SUBTRACKER_GOOGLE_SCOPES" => Some("   ".to_string()),
            _ => None,
        })
        .expect("oauth config");

        assert_eq!(config.client_id, "id");
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.scopes, vec![CALENDAR_SCOPE.to_string()]);
    }

    #[test]
    fn scope_list_splits_on_commas_and_whitespace() {
        assert_eq!(
            parse_scope_list("openid, email\nprofile"),
            vec!["openid", "email", "profile"]
        );
    }

    #[test]
    fn app_state_bootstraps_workspace() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert!(state.database_path().ends_with("state/subtracker.sqlite"));
        assert!(state.database_path().exists());
        assert!(state.config_dir().join("app.json").exists());
        assert!(state.logs_dir().exists());
        assert_eq!(state.config().calendar_id, "primary");
    }

    #[tokio::test]
    async fn create_requires_signed_in_user() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let error = create_subscription_impl(&state, draft("Netflix", 999.0, 10))
            .await
            .expect_err("signed out");

        assert!(matches!(error, InfraError::Unauthenticated));
        assert!(!state.command_error("create_subscription", &error).is_empty());
    }

    #[tokio::test]
    async fn create_list_update_delete_roundtrip() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        sign_in_impl(&state, email_user()).await.expect("sign in");

        let created = create_subscription_impl(&state, draft("Netflix", 999.0, 10))
            .await
            .expect("create");
        create_subscription_impl(&state, draft("Spotify", 299.0, 3))
            .await
            .expect("create second");

        let listed = list_subscriptions_impl(&state).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Spotify");
        assert_eq!(created.external_event_ref, None);

        let updated = update_subscription_impl(
            &state,
            created.id.clone(),
            SubscriptionChanges {
                amount: Some(1199.0),
                ..Default::default()
            },
        )
        .await
        .expect("update");
        assert_eq!(updated.amount, 1199.0);

        assert!(delete_subscription_impl(&state, created.id.clone())
            .await
            .expect("delete"));
        assert!(matches!(
            get_subscription_impl(&state, created.id).await,
            Err(InfraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_id_is_rejected() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        sign_in_impl(&state, email_user()).await.expect("sign in");

        assert!(matches!(
            delete_subscription_impl(&state, "  ".to_string()).await,
            Err(InfraError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn analytics_and_offline_insights_use_stored_subscriptions() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        sign_in_impl(&state, email_user()).await.expect("sign in");
        create_subscription_impl(&state, draft("Netflix", 999.0, 10))
            .await
            .expect("create");
        create_subscription_impl(&state, draft("Spotify", 301.0, 40))
            .await
            .expect("create second");

        let summary = get_spending_summary_impl(&state).await.expect("summary");
        assert_eq!(summary.subscription_count, 2);
        assert_eq!(summary.total_monthly, 1300.0);

        let upcoming = get_upcoming_payments_impl(&state).await.expect("upcoming");
        assert_eq!(upcoming.within_30_days.len(), 1);
        assert_eq!(upcoming.within_90_days.len(), 1);

        let insights = generate_insights_impl(&state).await.expect("insights");
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].kind, InsightKind::Analysis);
        assert_eq!(insights[0].potential_savings, Some(195.0));
    }

    #[tokio::test]
    async fn token_status_is_missing_until_a_token_exists() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert_eq!(get_token_status_impl(&state).level, HealthLevel::Missing);
        assert!(matches!(
            force_token_refresh_impl(&state).await,
            Err(InfraError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_token_state() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        sign_in_impl(&state, email_user()).await.expect("sign in");

        sign_out_impl(&state).await.expect("sign out");

        assert!(matches!(
            list_subscriptions_impl(&state).await,
            Err(InfraError::Unauthenticated)
        ));
        assert!(!get_token_status_impl(&state).status.has_token);
    }
}
