use crate::domain::models::{BillingPeriod, Insight, Subscription};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Remote generator of spending insights.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(
        &self,
        subscriptions: &[Subscription],
        user_id: &str,
        access_token: &str,
    ) -> Result<Vec<Insight>, InfraError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsightRequest<'a> {
    subscriptions: Vec<InsightSubscription<'a>>,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct InsightSubscription<'a> {
    id: &'a str,
    name: &'a str,
    amount: f64,
    currency: &'a str,
    billing_period: BillingPeriod,
    next_payment_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl<'a> From<&'a Subscription> for InsightSubscription<'a> {
    fn from(subscription: &'a Subscription) -> Self {
        Self {
            id: &subscription.id,
            name: &subscription.name,
            amount: subscription.amount,
            currency: &subscription.currency,
            billing_period: subscription.billing_period,
            next_payment_date: subscription.next_payment_date.format("%Y-%m-%d").to_string(),
            category: subscription.category.as_deref(),
            url: subscription.url.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    #[serde(default)]
    insights: Vec<Insight>,
}

#[derive(Debug, Clone)]
pub struct ReqwestInsightClient {
    client: Client,
    endpoint: String,
}

impl ReqwestInsightClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "insights endpoint must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Network(format!("failed to build http client: {error}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl InsightGenerator for ReqwestInsightClient {
    async fn generate(
        &self,
        subscriptions: &[Subscription],
        user_id: &str,
        access_token: &str,
    ) -> Result<Vec<Insight>, InfraError> {
        let payload = InsightRequest {
            subscriptions: subscriptions.iter().map(InsightSubscription::from).collect(),
            user_id,
        };
        debug!(count = subscriptions.len(), "requesting insights");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("insights request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading insights response: {error}")))?;
        if !status.is_success() {
            return Err(InfraError::Network(format!(
                "insights endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        parse_insight_response(&body)
    }
}

fn parse_insight_response(body: &str) -> Result<Vec<Insight>, InfraError> {
    let parsed: InsightResponse = serde_json::from_str(body)?;
    Ok(parsed.insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{InsightKind, InsightPriority};
    use chrono::NaiveDate;

    #[test]
    fn request_payload_uses_generator_field_names() {
        let subscription = Subscription {
            id: "sub-1".to_string(),
            owner_id: "user-1".to_string(),
            name: "Spotify".to_string(),
            amount: 199.0,
            currency: "RUB".to_string(),
            billing_period: BillingPeriod::Yearly,
            next_payment_date: NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid date"),
            category: None,
            url: None,
            external_event_ref: Some("evt-1".to_string()),
        };
        let payload = InsightRequest {
            subscriptions: vec![InsightSubscription::from(&subscription)],
            user_id: "user-1",
        };

        let value = serde_json::to_value(&payload).expect("serialize");

        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["subscriptions"][0]["billing_period"], "yearly");
        assert_eq!(value["subscriptions"][0]["next_payment_date"], "2024-03-05");
        assert!(value["subscriptions"][0].get("category").is_none());
        assert!(value["subscriptions"][0].get("external_event_ref").is_none());
    }

    #[test]
    fn response_parsing_accepts_optional_fields() {
        let body = r#"{
            "insights": [{
                "id": "i-1",
                "type": "duplicate",
                "priority": "medium",
                "title": "Two music services",
                "description": "Consider keeping one.",
                "createdAt": "2024-01-15T09:00:00Z"
            }],
            "generatedAt": "2024-01-15T09:00:00Z"
        }"#;

        let insights = parse_insight_response(body).expect("parse");

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].kind, InsightKind::Duplicate);
        assert_eq!(insights[0].priority, InsightPriority::Medium);
        assert!(insights[0].action_items.is_empty());
        assert_eq!(insights[0].potential_savings, None);
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(
            ReqwestInsightClient::new("  ", Duration::from_secs(5)),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
