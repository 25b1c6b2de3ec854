use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
pub const PRIMARY_CALENDAR_ID: &str = "primary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// The calendar resources the reminder flow touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarResource {
    Calendar { calendar_id: String },
    Events { calendar_id: String },
    Event { calendar_id: String, event_id: String },
}

impl CalendarResource {
    pub fn calendar(calendar_id: impl Into<String>) -> Self {
        Self::Calendar {
            calendar_id: calendar_id.into(),
        }
    }

    pub fn events(calendar_id: impl Into<String>) -> Self {
        Self::Events {
            calendar_id: calendar_id.into(),
        }
    }

    pub fn event(calendar_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self::Event {
            calendar_id: calendar_id.into(),
            event_id: event_id.into(),
        }
    }

    /// Path relative to the API base, e.g. `calendars/primary/events`.
    pub fn path(&self) -> String {
        match self {
            Self::Calendar { calendar_id } => format!("calendars/{calendar_id}"),
            Self::Events { calendar_id } => format!("calendars/{calendar_id}/events"),
            Self::Event {
                calendar_id,
                event_id,
            } => format!("calendars/{calendar_id}/events/{event_id}"),
        }
    }

    pub fn endpoint(&self, base: &Url) -> Result<Url, InfraError> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            match self {
                Self::Calendar { calendar_id } => {
                    segments.push("calendars");
                    segments.push(calendar_id);
                }
                Self::Events { calendar_id } => {
                    segments.push("calendars");
                    segments.push(calendar_id);
                    segments.push("events");
                }
                Self::Event {
                    calendar_id,
                    event_id,
                } => {
                    segments.push("calendars");
                    segments.push(calendar_id);
                    segments.push("events");
                    segments.push(event_id);
                }
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarResponse {
    pub status: u16,
    pub body: String,
}

impl CalendarResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One bearer-authenticated HTTP exchange. Transport failures surface as
/// `InfraError::Network`; every HTTP status comes back as a response.
#[async_trait]
pub trait CalendarTransport: Send + Sync {
    async fn send(
        &self,
        access_token: &str,
        method: HttpMethod,
        resource: &CalendarResource,
        body: Option<&Value>,
    ) -> Result<CalendarResponse, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestCalendarTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestCalendarTransport {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        Self::with_base_url(CALENDAR_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid calendar api base url: {error}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Network(format!("failed to build http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarTransport for ReqwestCalendarTransport {
    async fn send(
        &self,
        access_token: &str,
        method: HttpMethod,
        resource: &CalendarResource,
        body: Option<&Value>,
    ) -> Result<CalendarResponse, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        let url = resource.endpoint(&self.base_url)?;

        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        }
        .bearer_auth(access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|error| {
            InfraError::Network(format!(
                "{} {} failed: {error}",
                method.as_str(),
                resource.path()
            ))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!(
                "failed reading {} {} response: {error}",
                method.as_str(),
                resource.path()
            ))
        })?;

        Ok(CalendarResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_endpoint_escapes_identifiers() {
        let base = Url::parse(CALENDAR_API_BASE).expect("base url");
        let url = CalendarResource::event("team@group.calendar.google.com", "abc/def")
            .endpoint(&base)
            .expect("event endpoint");
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events/abc%2Fdef"
        );
    }

    #[test]
    fn calendar_endpoint_targets_primary() {
        let base = Url::parse(CALENDAR_API_BASE).expect("base url");
        let url = CalendarResource::calendar(PRIMARY_CALENDAR_ID)
            .endpoint(&base)
            .expect("calendar endpoint");
        assert_eq!(url.as_str(), "https://www.googleapis.com/calendar/v3/calendars/primary");
    }

    #[test]
    fn success_range_excludes_redirects() {
        assert!(CalendarResponse { status: 204, body: String::new() }.is_success());
        assert!(!CalendarResponse { status: 304, body: String::new() }.is_success());
    }
}
