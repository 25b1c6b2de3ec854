use crate::application::calendar_client::ReminderCalendar;
use crate::application::token_refresh::AccessTokenSource;
use crate::domain::models::TokenStatus;
use crate::infrastructure::session::SessionProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub interval: Duration,
    pub interval_threshold_seconds: i64,
    pub visibility_threshold_seconds: i64,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            interval_threshold_seconds: 600,
            visibility_threshold_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Missing,
    Expired,
    Unknown,
    ExpiringSoon,
    Healthy,
}

/// Display-only view of the token state.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenHealthReport {
    pub status: TokenStatus,
    pub level: HealthLevel,
    pub label: String,
}

impl TokenHealthReport {
    pub fn from_status(status: TokenStatus) -> Self {
        let (level, label) = if !status.has_token {
            (HealthLevel::Missing, "Not connected".to_string())
        } else if status.is_expired {
            (HealthLevel::Expired, "Token expired".to_string())
        } else {
            match status.expires_in {
                None => (HealthLevel::Unknown, "Status unknown".to_string()),
                Some(seconds) if seconds < 60 => (
                    HealthLevel::ExpiringSoon,
                    format!("Expires in {seconds} sec"),
                ),
                Some(seconds) if seconds < 600 => (
                    HealthLevel::ExpiringSoon,
                    format!("Expires in {} min", seconds / 60),
                ),
                Some(seconds) => (
                    HealthLevel::Healthy,
                    format!("Valid for {} min", seconds / 60),
                ),
            }
        };
        Self {
            status,
            level,
            label,
        }
    }

    /// Whether the status banner should be shown: expired, unknown, or
    /// under five minutes left.
    pub fn needs_attention(&self) -> bool {
        self.status.has_token
            && (self.status.is_expired
                || self.status.expires_in.is_none_or(|seconds| seconds < 300))
    }
}

/// Keeps the calendar token current from timer, visibility and network
/// events. Each hook returns whether it triggered a refresh that succeeded.
pub struct TokenHealthMonitor<A, C, S>
where
    A: AccessTokenSource,
    C: ReminderCalendar,
    S: SessionProvider,
{
    tokens: Arc<A>,
    calendar: Arc<C>,
    session: Arc<S>,
    policy: MonitorPolicy,
}

impl<A, C, S> TokenHealthMonitor<A, C, S>
where
    A: AccessTokenSource + 'static,
    C: ReminderCalendar + 'static,
    S: SessionProvider + 'static,
{
    pub fn new(tokens: Arc<A>, calendar: Arc<C>, session: Arc<S>) -> Self {
        Self {
            tokens,
            calendar,
            session,
            policy: MonitorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MonitorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn status(&self) -> TokenStatus {
        self.tokens.status()
    }

    pub fn report(&self) -> TokenHealthReport {
        TokenHealthReport::from_status(self.status())
    }

    pub async fn on_mount(&self) -> bool {
        if !self.session_active() {
            return false;
        }
        let status = self.status();
        if status.is_expired {
            return self.refresh("mount_expired").await;
        }
        if status.has_token && !self.calendar.is_accessible().await {
            return self.refresh("mount_inaccessible").await;
        }
        false
    }

    pub async fn on_interval_tick(&self) -> bool {
        if !self.session_active() {
            return false;
        }
        let status = self.status();
        let expiring = status
            .expires_in
            .is_some_and(|seconds| seconds < self.policy.interval_threshold_seconds);
        if status.has_token && expiring {
            return self.refresh("interval").await;
        }
        false
    }

    pub async fn on_visibility_regained(&self) -> bool {
        if !self.session_active() {
            return false;
        }
        if !self.calendar.is_accessible().await {
            return self.refresh("visibility_inaccessible").await;
        }
        let expiring = self
            .status()
            .expires_in
            .is_some_and(|seconds| seconds < self.policy.visibility_threshold_seconds);
        if expiring {
            return self.refresh("visibility_expiring").await;
        }
        false
    }

    pub async fn on_network_online(&self) -> bool {
        if !self.session_active() {
            return false;
        }
        if !self.calendar.is_accessible().await {
            return self.refresh("network_online").await;
        }
        false
    }

    /// Runs `on_interval_tick` every policy interval until the handle is
    /// aborted. The first check happens one interval after the call.
    pub fn spawn_interval(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = monitor.policy.interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.on_interval_tick().await;
            }
        })
    }

    fn session_active(&self) -> bool {
        match self.session.current_user() {
            Ok(Some(user)) => user.provider.supports_calendar() && user.provider_token.is_some(),
            Ok(None) => false,
            Err(error) => {
                warn!(%error, "session unavailable for token health check");
                false
            }
        }
    }

    async fn refresh(&self, trigger: &'static str) -> bool {
        debug!(trigger, "token health check requested refresh");
        let refreshed = self.tokens.force_refresh().await;
        if refreshed {
            info!(trigger, "token refreshed by health monitor");
        } else {
            warn!(trigger, "health monitor could not refresh token");
        }
        refreshed
    }
}
