use crate::application::calendar_client::ReminderCalendar;
use crate::application::token_state::NowProvider;
use crate::domain::billing_cycle::roll_forward_if_past;
use crate::domain::models::{SessionUser, Subscription, SubscriptionChanges, SubscriptionDraft};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session::SessionProvider;
use crate::infrastructure::subscription_repository::SubscriptionRepository;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Subscription CRUD with calendar reminders kept in step. The repository
/// outcome decides success; reminder calls are best effort, except that a
/// reminder created for a write that then fails is deleted again.
pub struct SubscriptionCalendarOrchestrator<R, C, S>
where
    R: SubscriptionRepository,
    C: ReminderCalendar,
    S: SessionProvider,
{
    repository: Arc<R>,
    calendar: Arc<C>,
    session: Arc<S>,
    now_provider: NowProvider,
    time_zone: Tz,
}

impl<R, C, S> SubscriptionCalendarOrchestrator<R, C, S>
where
    R: SubscriptionRepository,
    C: ReminderCalendar,
    S: SessionProvider,
{
    pub fn new(repository: Arc<R>, calendar: Arc<C>, session: Arc<S>) -> Self {
        Self {
            repository,
            calendar,
            session,
            now_provider: Arc::new(Utc::now),
            time_zone: Tz::UTC,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.now_provider)()
            .with_timezone(&self.time_zone)
            .date_naive()
    }

    pub async fn create(&self, draft: SubscriptionDraft) -> Result<Subscription, InfraError> {
        let user = self.require_user()?;
        let mut subscription = draft.into_subscription(next_id("sub"), user.id.clone());
        subscription.validate().map_err(InfraError::Validation)?;

        let created_event = if self.calendar_enabled(&user).await {
            self.calendar
                .create_reminder(&subscription.reminder_details())
                .await
        } else {
            None
        };
        subscription.external_event_ref = created_event.clone();

        if let Err(error) = self.repository.insert(&subscription) {
            self.compensate(created_event.as_deref()).await;
            return Err(error);
        }

        info!(
            subscription_id = %subscription.id,
            event_id = subscription.external_event_ref.as_deref().unwrap_or(""),
            "subscription created"
        );
        Ok(subscription)
    }

    pub async fn update(
        &self,
        id: &str,
        changes: SubscriptionChanges,
    ) -> Result<Subscription, InfraError> {
        let user = self.require_user()?;
        let current = self.owned_subscription(&user, id)?;
        let mut updated = changes.apply_to(&current);
        updated.validate().map_err(InfraError::Validation)?;

        let mut created_event = None;
        if changes.touches_reminder(&current) && self.calendar_enabled(&user).await {
            let details = updated.reminder_details();
            let kept_existing = match current.external_event_ref.as_deref() {
                Some(event_id) => self.calendar.update_reminder(event_id, &details).await,
                None => false,
            };
            if !kept_existing {
                if current.external_event_ref.is_some() {
                    debug!(subscription_id = %id, "reminder update failed; recreating");
                }
                created_event = self.calendar.create_reminder(&details).await;
                updated.external_event_ref = created_event.clone();
            }
        }

        if let Err(error) = self.repository.update(&updated) {
            self.compensate(created_event.as_deref()).await;
            return Err(error);
        }

        info!(subscription_id = %id, "subscription updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), InfraError> {
        let user = self.require_user()?;
        let current = self.owned_subscription(&user, id)?;

        if let Some(event_id) = current.external_event_ref.as_deref() {
            if self.calendar_enabled(&user).await && !self.calendar.delete_reminder(event_id).await {
                warn!(subscription_id = %id, %event_id, "reminder not deleted; removing subscription anyway");
            }
        }

        self.repository.delete(id)?;
        info!(subscription_id = %id, "subscription deleted");
        Ok(())
    }

    /// The signed-in user's subscriptions with past payment dates rolled
    /// forward. Corrections are written back and the attached reminder is
    /// moved to the new date, both on a best-effort basis.
    pub async fn list(&self) -> Result<Vec<Subscription>, InfraError> {
        let user = self.require_user()?;
        let today = self.today();

        let stored = self.repository.list_by_owner(&user.id)?;
        let mut subscriptions = Vec::with_capacity(stored.len());
        for subscription in stored {
            subscriptions.push(self.roll_forward(&user, subscription, today).await);
        }
        subscriptions.sort_by(|left, right| {
            left.next_payment_date
                .cmp(&right.next_payment_date)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(subscriptions)
    }

    pub async fn get(&self, id: &str) -> Result<Subscription, InfraError> {
        let user = self.require_user()?;
        let current = self.owned_subscription(&user, id)?;
        Ok(self.roll_forward(&user, current, self.today()).await)
    }

    async fn roll_forward(
        &self,
        user: &SessionUser,
        subscription: Subscription,
        today: NaiveDate,
    ) -> Subscription {
        let rolled = match roll_forward_if_past(&subscription, today) {
            Cow::Borrowed(_) => None,
            Cow::Owned(rolled) => Some(rolled),
        };
        let Some(rolled) = rolled else {
            return subscription;
        };

        debug!(
            subscription_id = %rolled.id,
            from = %subscription.next_payment_date,
            to = %rolled.next_payment_date,
            "rolled payment date forward"
        );
        if let Err(error) = self.repository.update(&rolled) {
            warn!(subscription_id = %rolled.id, %error, "failed to write back rolled payment date");
            return rolled;
        }

        if let Some(event_id) = rolled.external_event_ref.as_deref() {
            if user.provider.supports_calendar()
                && !self
                    .calendar
                    .update_reminder(event_id, &rolled.reminder_details())
                    .await
            {
                warn!(subscription_id = %rolled.id, %event_id, "reminder still on previous payment date");
            }
        }
        rolled
    }

    fn require_user(&self) -> Result<SessionUser, InfraError> {
        self.session
            .current_user()?
            .ok_or(InfraError::Unauthenticated)
    }

    fn owned_subscription(&self, user: &SessionUser, id: &str) -> Result<Subscription, InfraError> {
        self.repository
            .get(id)?
            .filter(|subscription| subscription.owner_id == user.id)
            .ok_or_else(|| InfraError::NotFound(format!("subscription {id}")))
    }

    async fn calendar_enabled(&self, user: &SessionUser) -> bool {
        user.provider.supports_calendar() && self.calendar.is_accessible().await
    }

    async fn compensate(&self, created_event: Option<&str>) {
        let Some(event_id) = created_event else {
            return;
        };
        if self.calendar.delete_reminder(event_id).await {
            info!(%event_id, "removed reminder for failed subscription write");
        } else {
            warn!(%event_id, "reminder for failed subscription write could not be removed");
        }
    }
}
