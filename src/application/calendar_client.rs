use crate::application::token_refresh::AccessTokenSource;
use crate::domain::models::ReminderDetails;
use crate::infrastructure::calendar_transport::{
    CalendarResource, CalendarTransport, HttpMethod, PRIMARY_CALENDAR_ID,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    build_reminder_event, encode_reminder_event, event_id, merge_reminder_event, ReminderSettings,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_NETWORK_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Best-effort reminder operations. Failures are logged and reported as
/// `None`/`false`, never as errors.
#[async_trait]
pub trait ReminderCalendar: Send + Sync {
    async fn create_reminder(&self, details: &ReminderDetails) -> Option<String>;
    async fn update_reminder(&self, event_id: &str, details: &ReminderDetails) -> bool;
    async fn delete_reminder(&self, event_id: &str) -> bool;
    async fn is_accessible(&self) -> bool;
}

pub struct CalendarSyncClient<A, T>
where
    A: AccessTokenSource,
    T: CalendarTransport,
{
    tokens: Arc<A>,
    transport: Arc<T>,
    calendar_id: String,
    reminder_settings: ReminderSettings,
    network_retry_delay: Duration,
}

impl<A, T> CalendarSyncClient<A, T>
where
    A: AccessTokenSource,
    T: CalendarTransport,
{
    pub fn new(tokens: Arc<A>, transport: Arc<T>) -> Self {
        Self {
            tokens,
            transport,
            calendar_id: PRIMARY_CALENDAR_ID.to_string(),
            reminder_settings: ReminderSettings::default(),
            network_retry_delay: DEFAULT_NETWORK_RETRY_DELAY,
        }
    }

    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    pub fn with_reminder_settings(mut self, reminder_settings: ReminderSettings) -> Self {
        self.reminder_settings = reminder_settings;
        self
    }

    pub fn with_network_retry_delay(mut self, delay: Duration) -> Self {
        self.network_retry_delay = delay;
        self
    }

    /// Sends one request, retrying once after a 401 (with the token
    /// invalidated) or after a transport failure. DELETE and empty bodies
    /// resolve to `None`.
    pub async fn request(
        &self,
        method: HttpMethod,
        resource: &CalendarResource,
        body: Option<&Value>,
    ) -> Result<Option<Value>, InfraError> {
        let mut retry = true;
        loop {
            let token = self
                .tokens
                .ensure_fresh_token()
                .await
                .ok_or(InfraError::AuthUnavailable)?;

            let response = match self.transport.send(&token, method, resource, body).await {
                Ok(response) => response,
                Err(InfraError::Network(message)) if retry => {
                    warn!(
                        method = method.as_str(),
                        path = %resource.path(),
                        %message,
                        "calendar request failed in transit; retrying once"
                    );
                    tokio::time::sleep(self.network_retry_delay).await;
                    retry = false;
                    continue;
                }
                Err(error) => return Err(error),
            };

            if response.status == 401 && retry {
                info!(
                    method = method.as_str(),
                    path = %resource.path(),
                    "calendar rejected token; refreshing and retrying once"
                );
                if let Err(error) = self.tokens.invalidate() {
                    warn!(%error, "failed to persist invalidated token expiry");
                }
                retry = false;
                continue;
            }

            if !response.is_success() {
                return Err(InfraError::CalendarApi {
                    status: response.status,
                    body: response.body,
                });
            }

            if method == HttpMethod::Delete || response.body.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&response.body)?));
        }
    }

    async fn try_create(&self, details: &ReminderDetails) -> Result<Option<String>, InfraError> {
        let event = build_reminder_event(details, &self.reminder_settings)?;
        let payload = encode_reminder_event(&event)?;
        let created = self
            .request(
                HttpMethod::Post,
                &CalendarResource::events(&self.calendar_id),
                Some(&payload),
            )
            .await?;
        Ok(created.as_ref().and_then(event_id))
    }

    async fn try_update(&self, event_id: &str, details: &ReminderDetails) -> Result<(), InfraError> {
        let resource = CalendarResource::event(&self.calendar_id, event_id);
        let existing = self
            .request(HttpMethod::Get, &resource, None)
            .await?
            .ok_or_else(|| InfraError::NotFound(format!("calendar event {event_id}")))?;

        let event = build_reminder_event(details, &self.reminder_settings)?;
        let merged = merge_reminder_event(existing, &event)?;
        self.request(HttpMethod::Put, &resource, Some(&merged)).await?;
        Ok(())
    }
}

#[async_trait]
impl<A, T> ReminderCalendar for CalendarSyncClient<A, T>
where
    A: AccessTokenSource,
    T: CalendarTransport,
{
    async fn create_reminder(&self, details: &ReminderDetails) -> Option<String> {
        match self.try_create(details).await {
            Ok(Some(event_id)) => {
                debug!(%event_id, "created payment reminder");
                Some(event_id)
            }
            Ok(None) => {
                warn!("calendar accepted reminder without returning an event id");
                None
            }
            Err(error) => {
                warn!(%error, subscription = %details.name, "failed to create payment reminder");
                None
            }
        }
    }

    async fn update_reminder(&self, event_id: &str, details: &ReminderDetails) -> bool {
        match self.try_update(event_id, details).await {
            Ok(()) => {
                debug!(%event_id, "updated payment reminder");
                true
            }
            Err(error) => {
                warn!(%error, %event_id, "failed to update payment reminder");
                false
            }
        }
    }

    async fn delete_reminder(&self, event_id: &str) -> bool {
        let resource = CalendarResource::event(&self.calendar_id, event_id);
        match self.request(HttpMethod::Delete, &resource, None).await {
            Ok(_) => {
                debug!(%event_id, "deleted payment reminder");
                true
            }
            Err(error) => {
                warn!(%error, %event_id, "failed to delete payment reminder");
                false
            }
        }
    }

    async fn is_accessible(&self) -> bool {
        let resource = CalendarResource::calendar(&self.calendar_id);
        match self.request(HttpMethod::Get, &resource, None).await {
            Ok(_) => true,
            Err(error) if error.is_auth_rejection() => {
                warn!(%error, "calendar access rejected; clearing token state");
                if let Err(clear_error) = self.tokens.clear() {
                    warn!(error = %clear_error, "failed to clear persisted token state");
                }
                false
            }
            Err(error) => {
                debug!(%error, "calendar not accessible");
                false
            }
        }
    }
}
