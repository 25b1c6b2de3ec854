pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::calendar_client::{CalendarSyncClient, ReminderCalendar};
pub use application::commands::{
    create_subscription_impl, delete_subscription_impl, force_token_refresh_impl,
    generate_insights_impl, get_category_breakdown_impl, get_spending_summary_impl,
    get_subscription_impl, get_token_status_impl, get_upcoming_payments_impl,
    list_subscriptions_impl, load_oauth_config_from_env, sign_in_impl, sign_out_impl,
    update_subscription_impl, AppState,
};
pub use application::insights::{offline_insights, InsightService};
pub use application::subscription_calendar::SubscriptionCalendarOrchestrator;
pub use application::token_health::{
    HealthLevel, MonitorPolicy, TokenHealthMonitor, TokenHealthReport,
};
pub use application::token_refresh::{AccessTokenSource, RefreshPolicy, TokenRefreshCoordinator};
pub use application::token_state::TokenStateStore;
pub use domain::billing_cycle::{next_due_date, roll_forward_if_past};
pub use domain::models::{
    AuthProviderKind, BillingPeriod, Insight, RefreshStrategy, SessionUser, Subscription,
    SubscriptionChanges, SubscriptionDraft, TokenStatus,
};
pub use infrastructure::error::InfraError;
pub use infrastructure::logging::{init_tracing, LogFormat, LoggingConfig};
