use crate::domain::analytics::format_amount;
use crate::domain::models::ReminderDetails;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde_json::Value;

const SUMMARY_PREFIX: &str = "SubTracker reminder: payment for";

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    pub time_zone: Tz,
    pub lead_days: i64,
    pub hour: u32,
    pub duration_minutes: i64,
    pub popup_minutes: u32,
    pub email_minutes: u32,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            lead_days: 3,
            hour: 10,
            duration_minutes: 30,
            popup_minutes: 10,
            email_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventReminders {
    #[serde(rename = "useDefault")]
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReminderEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub summary: String,
    pub description: String,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    pub reminders: EventReminders,
}

/// Event placed `lead_days` before the payment at `hour`:00 local time.
pub fn build_reminder_event(
    details: &ReminderDetails,
    settings: &ReminderSettings,
) -> Result<ReminderEvent, InfraError> {
    let start = reminder_start(details, settings)?;
    let end = start + Duration::minutes(settings.duration_minutes.max(1));
    let zone_name = settings.time_zone.name().to_string();

    Ok(ReminderEvent {
        id: None,
        summary: format!("{SUMMARY_PREFIX} {}", details.name),
        description: format!(
            "In {} days ({}) {} will be charged for the '{}' subscription",
            settings.lead_days,
            details.payment_date.format("%d.%m.%Y"),
            format_amount(details.amount, &details.currency),
            details.name
        ),
        start: CalendarEventDateTime {
            date_time: start.to_rfc3339(),
            time_zone: Some(zone_name.clone()),
        },
        end: CalendarEventDateTime {
            date_time: end.to_rfc3339(),
            time_zone: Some(zone_name),
        },
        reminders: EventReminders {
            use_default: false,
            overrides: vec![
                ReminderOverride {
                    method: "popup".to_string(),
                    minutes: settings.popup_minutes,
                },
                ReminderOverride {
                    method: "email".to_string(),
                    minutes: settings.email_minutes,
                },
            ],
        },
    })
}

pub fn encode_reminder_event(event: &ReminderEvent) -> Result<Value, InfraError> {
    Ok(serde_json::to_value(event)?)
}

/// Overwrites summary, description, start and end on a fetched event and
/// keeps every other field as the calendar returned it.
pub fn merge_reminder_event(existing: Value, event: &ReminderEvent) -> Result<Value, InfraError> {
    let Value::Object(mut merged) = existing else {
        return Err(InfraError::CalendarApi {
            status: 200,
            body: "calendar event payload is not a JSON object".to_string(),
        });
    };

    let encoded = encode_reminder_event(event)?;
    let Value::Object(mut fields) = encoded else {
        return Ok(Value::Object(merged));
    };
    for key in ["summary", "description", "start", "end"] {
        if let Some(value) = fields.remove(key) {
            merged.insert(key.to_string(), value);
        }
    }
    Ok(Value::Object(merged))
}

pub fn event_id(payload: &Value) -> Option<String> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
}

fn reminder_start(
    details: &ReminderDetails,
    settings: &ReminderSettings,
) -> Result<DateTime<Tz>, InfraError> {
    let reminder_date = details.payment_date - Duration::days(settings.lead_days);
    let time = NaiveTime::from_hms_opt(settings.hour, 0, 0).ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid reminder hour: {}", settings.hour))
    })?;
    let local = reminder_date.and_time(time);

    // A local time inside a DST gap resolves to the first instant after it.
    settings
        .time_zone
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            settings
                .time_zone
                .from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
        })
        .ok_or_else(|| {
            InfraError::Validation(format!(
                "reminder time {local} does not exist in {}",
                settings.time_zone.name()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn details() -> ReminderDetails {
        ReminderDetails {
            name: "Netflix".to_string(),
            amount: 999.0,
            currency: "₽".to_string(),
            payment_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"),
        }
    }

    fn moscow() -> ReminderSettings {
        ReminderSettings {
            time_zone: chrono_tz::Europe::Moscow,
            ..Default::default()
        }
    }

    #[test]
    fn reminder_starts_three_days_early_at_ten_local() {
        let event = build_reminder_event(&details(), &moscow()).expect("build event");

        assert_eq!(event.start.date_time, "2024-01-29T10:00:00+03:00");
        assert_eq!(event.end.date_time, "2024-01-29T10:30:00+03:00");
        assert_eq!(event.start.time_zone.as_deref(), Some("Europe/Moscow"));
        assert_eq!(event.summary, "SubTracker reminder: payment for Netflix");
        assert!(event.description.contains("01.02.2024"));
        assert!(event.description.contains("999 RUB"));
    }

    #[test]
    fn reminders_override_defaults_with_popup_and_email() {
        let encoded = encode_reminder_event(
            &build_reminder_event(&details(), &ReminderSettings::default()).expect("build event"),
        )
        .expect("encode");

        assert_eq!(
            encoded["reminders"],
            json!({
                "useDefault": false,
                "overrides": [
                    { "method": "popup", "minutes": 10 },
                    { "method": "email", "minutes": 60 }
                ]
            })
        );
        assert!(encoded.get("id").is_none());
    }

    #[test]
    fn merge_preserves_unknown_fields() {
        let existing = json!({
            "id": "evt-1",
            "etag": "\"123\"",
            "colorId": "5",
            "summary": "old",
            "reminders": { "useDefault": true },
        });
        let event = build_reminder_event(&details(), &ReminderSettings::default()).expect("build event");

        let merged = merge_reminder_event(existing, &event).expect("merge");

        assert_eq!(merged["id"], "evt-1");
        assert_eq!(merged["colorId"], "5");
        assert_eq!(merged["reminders"], json!({ "useDefault": true }));
        assert_eq!(merged["summary"], "SubTracker reminder: payment for Netflix");
        assert_eq!(merged["start"]["dateTime"], "2024-01-29T10:00:00+00:00");
    }

    #[test]
    fn merge_rejects_non_object_payload() {
        let event = build_reminder_event(&details(), &ReminderSettings::default()).expect("build event");
        assert!(merge_reminder_event(json!([1, 2]), &event).is_err());
    }

    #[test]
    fn event_id_ignores_blank_values() {
        assert_eq!(event_id(&json!({ "id": "abc" })), Some("abc".to_string()));
        assert_eq!(event_id(&json!({ "id": "  " })), None);
        assert_eq!(event_id(&json!({})), None);
    }
}
