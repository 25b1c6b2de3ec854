use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unsupported billing period: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub billing_period: BillingPeriod,
    pub next_payment_date: NaiveDate,
    pub category: Option<String>,
    pub url: Option<String>,
    pub external_event_ref: Option<String>,
}

impl Subscription {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "subscription.id")?;
        validate_non_empty(&self.owner_id, "subscription.owner_id")?;
        validate_non_empty(&self.name, "subscription.name")?;
        validate_non_empty(&self.currency, "subscription.currency")?;
        validate_amount(self.amount, "subscription.amount")?;
        if let Some(url) = self.url.as_deref() {
            validate_http_url(url, "subscription.url")?;
        }
        Ok(())
    }

    pub fn category_or_default(&self) -> &str {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn reminder_details(&self) -> ReminderDetails {
        ReminderDetails {
            name: self.name.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            payment_date: self.next_payment_date,
        }
    }
}

/// Input for a new subscription; the id, owner and event reference are
/// assigned when it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDraft {
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub billing_period: BillingPeriod,
    pub next_payment_date: NaiveDate,
    pub category: Option<String>,
    pub url: Option<String>,
}

impl SubscriptionDraft {
    pub fn into_subscription(self, id: String, owner_id: String) -> Subscription {
        Subscription {
            id,
            owner_id,
            name: self.name.trim().to_string(),
            amount: self.amount,
            currency: self.currency.trim().to_string(),
            billing_period: self.billing_period,
            next_payment_date: self.next_payment_date,
            category: normalize_optional(self.category),
            url: normalize_optional(self.url),
            external_event_ref: None,
        }
    }
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionChanges {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub billing_period: Option<BillingPeriod>,
    pub next_payment_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub url: Option<String>,
}

impl SubscriptionChanges {
    /// True when a field that appears in the calendar reminder would change.
    pub fn touches_reminder(&self, current: &Subscription) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| name.trim() != current.name)
            || self.amount.is_some_and(|amount| amount != current.amount)
            || self
                .currency
                .as_deref()
                .is_some_and(|currency| currency.trim() != current.currency)
            || self
                .next_payment_date
                .is_some_and(|date| date != current.next_payment_date)
    }

    pub fn apply_to(&self, current: &Subscription) -> Subscription {
        let mut updated = current.clone();
        if let Some(name) = self.name.as_deref() {
            updated.name = name.trim().to_string();
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(currency) = self.currency.as_deref() {
            updated.currency = currency.trim().to_string();
        }
        if let Some(billing_period) = self.billing_period {
            updated.billing_period = billing_period;
        }
        if let Some(date) = self.next_payment_date {
            updated.next_payment_date = date;
        }
        if self.category.is_some() {
            updated.category = normalize_optional(self.category.clone());
        }
        if self.url.is_some() {
            updated.url = normalize_optional(self.url.clone());
        }
        updated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderDetails {
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub payment_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthProviderKind {
    Google,
    Email,
    Other,
}

impl AuthProviderKind {
    pub fn supports_calendar(self) -> bool {
        matches!(self, Self::Google)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub provider: AuthProviderKind,
    pub provider_token: Option<String>,
}

/// Escalating modes for requesting a fresh bearer token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategy {
    Silent,
    Consent,
    SelectAccount,
}

impl RefreshStrategy {
    pub const ESCALATION: [RefreshStrategy; 3] = [Self::Silent, Self::Consent, Self::SelectAccount];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Silent => "silent",
            Self::Consent => "consent",
            Self::SelectAccount => "select_account",
        }
    }

    /// Value of the OAuth `prompt` parameter for this strategy.
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Silent => "none",
            Self::Consent => "consent",
            Self::SelectAccount => "select_account",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_attempts: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub has_token: bool,
    pub is_expired: bool,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Optimization,
    Duplicate,
    Warning,
    Trend,
    Forecast,
    Category,
    Analysis,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub priority: InsightPriority,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub potential_savings: Option<f64>,
    #[serde(default)]
    pub affected_subscriptions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

fn validate_amount(value: f64, field: &str) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{field} must be a non-negative number"));
    }
    Ok(())
}

fn validate_http_url(value: &str, field: &str) -> Result<(), String> {
    let parsed = Url::parse(value).map_err(|error| format!("{field} is not a valid URL: {error}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{field} must use http or https, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            owner_id: "user-1".to_string(),
            name: "Netflix".to_string(),
            amount: 999.0,
            currency: "₽".to_string(),
            billing_period: BillingPeriod::Monthly,
            next_payment_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"),
            category: None,
            url: None,
            external_event_ref: None,
        }
    }

    #[test]
    fn validate_rejects_negative_amount_and_bad_scheme() {
        let mut subscription = sample();
        subscription.amount = -1.0;
        assert!(subscription.validate().is_err());

        let mut subscription = sample();
        subscription.url = Some("javascript:alert(1)".to_string());
        assert!(subscription.validate().is_err());

        let mut subscription = sample();
        subscription.url = Some("https://netflix.com".to_string());
        assert!(subscription.validate().is_ok());
    }

    #[test]
    fn category_change_does_not_touch_reminder() {
        let current = sample();
        let changes = SubscriptionChanges {
            category: Some("Entertainment".to_string()),
            ..Default::default()
        };
        assert!(!changes.touches_reminder(&current));
        assert_eq!(
            changes.apply_to(&current).category.as_deref(),
            Some("Entertainment")
        );
    }

    #[test]
    fn unchanged_values_do_not_touch_reminder() {
        let current = sample();
        let same = SubscriptionChanges {
            name: Some("Netflix".to_string()),
            amount: Some(999.0),
            ..Default::default()
        };
        assert!(!same.touches_reminder(&current));

        let moved = SubscriptionChanges {
            next_payment_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        assert!(moved.touches_reminder(&current));
    }

    #[test]
    fn billing_period_parses_case_insensitively() {
        assert_eq!(BillingPeriod::parse("Yearly"), Ok(BillingPeriod::Yearly));
        assert!(BillingPeriod::parse("weekly").is_err());
    }
}
