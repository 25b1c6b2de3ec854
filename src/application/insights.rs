use crate::application::token_state::NowProvider;
use crate::domain::analytics::monthly_equivalent;
use crate::domain::models::{
    BillingPeriod, Insight, InsightKind, InsightPriority, Subscription,
};
use crate::infrastructure::insight_client::InsightGenerator;
use crate::infrastructure::session::SessionProvider;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const YEARLY_PLAN_DISCOUNT: f64 = 0.15;

/// Insights from the remote generator when one is configured and a session
/// exists, otherwise the deterministic offline analysis.
pub struct InsightService<G, S>
where
    G: InsightGenerator,
    S: SessionProvider,
{
    generator: Option<Arc<G>>,
    session: Arc<S>,
    now_provider: NowProvider,
}

impl<G, S> InsightService<G, S>
where
    G: InsightGenerator,
    S: SessionProvider,
{
    pub fn new(generator: Option<Arc<G>>, session: Arc<S>) -> Self {
        Self {
            generator,
            session,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn generate(&self, subscriptions: &[Subscription]) -> Vec<Insight> {
        let now = (self.now_provider)();
        let Some(generator) = self.generator.as_ref() else {
            debug!("no insights endpoint configured; using offline analysis");
            return offline_insights(subscriptions, now);
        };

        let user = match self.session.current_user() {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("no active session; using offline analysis");
                return offline_insights(subscriptions, now);
            }
            Err(error) => {
                warn!(%error, "session unavailable; using offline analysis");
                return offline_insights(subscriptions, now);
            }
        };
        let Some(access_token) = user.provider_token.as_deref() else {
            warn!(user_id = %user.id, "session has no bearer token; using offline analysis");
            return offline_insights(subscriptions, now);
        };

        match generator.generate(subscriptions, &user.id, access_token).await {
            Ok(insights) => insights,
            Err(error) => {
                warn!(%error, "insight generation failed; using offline analysis");
                offline_insights(subscriptions, now)
            }
        }
    }
}

/// Monthly saving from moving every monthly-billed subscription to a
/// discounted yearly plan, rounded to a whole amount.
pub fn yearly_plan_savings(subscriptions: &[Subscription]) -> f64 {
    let savings: f64 = subscriptions
        .iter()
        .filter(|subscription| subscription.billing_period == BillingPeriod::Monthly)
        .map(|subscription| subscription.amount * 12.0 * YEARLY_PLAN_DISCOUNT / 12.0)
        .sum();
    savings.round()
}

pub fn offline_insights(subscriptions: &[Subscription], now: DateTime<Utc>) -> Vec<Insight> {
    let total_monthly: f64 = subscriptions.iter().map(monthly_equivalent).sum();
    let monthly_count = subscriptions
        .iter()
        .filter(|subscription| subscription.billing_period == BillingPeriod::Monthly)
        .count();
    let categories: BTreeSet<&str> = subscriptions
        .iter()
        .filter_map(|subscription| subscription.category.as_deref())
        .filter(|category| !category.trim().is_empty())
        .collect();
    let savings = yearly_plan_savings(subscriptions);

    let mut description = format!(
        "Your subscriptions cost about {} per month.",
        total_monthly.round()
    );
    description.push(' ');
    description.push_str(if total_monthly < 2000.0 {
        "That is a modest amount."
    } else if total_monthly < 5000.0 {
        "That is typical for an active user."
    } else {
        "That is a high amount; make sure every service is in use."
    });
    if monthly_count > 0 {
        description.push_str(&format!(
            "\n\n{monthly_count} subscriptions are billed monthly. Switching them to yearly plans could save about {savings} per month."
        ));
    }
    if categories.len() > 3 {
        description.push_str(&format!(
            "\n\nYour subscriptions span {} categories.",
            categories.len()
        ));
    }
    if subscriptions.len() > 5 {
        description.push_str(&format!(
            "\n\n{} active subscriptions; review periodically which ones you still use.",
            subscriptions.len()
        ));
    }

    vec![Insight {
        id: format!("offline-analysis-{}", now.timestamp_millis()),
        kind: InsightKind::Analysis,
        priority: InsightPriority::High,
        title: "Personal subscription analysis".to_string(),
        description,
        action_items: vec![
            "Consider switching to yearly plans".to_string(),
            "Audit services you no longer use".to_string(),
            "Review newly recommended subscriptions".to_string(),
        ],
        potential_savings: Some(savings),
        affected_subscriptions: Vec::new(),
        created_at: now,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AuthProviderKind, SessionUser};
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::session::StaticSessionProvider;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGenerator {
        result: Result<Vec<Insight>, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InsightGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _subscriptions: &[Subscription],
            user_id: &str,
            access_token: &str,
        ) -> Result<Vec<Insight>, InfraError> {
            assert_eq!(user_id, "user-1");
            assert_eq!(access_token, "session-token");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(InfraError::Network)
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn sub(name: &str, amount: f64, period: BillingPeriod, category: Option<&str>) -> Subscription {
        Subscription {
            id: format!("sub-{name}"),
            owner_id: "user-1".to_string(),
            name: name.to_string(),
            amount,
            currency: "RUB".to_string(),
            billing_period: period,
            next_payment_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"),
            category: category.map(ToOwned::to_owned),
            url: None,
            external_event_ref: None,
        }
    }

    fn sample() -> Vec<Subscription> {
        vec![
            sub("Netflix", 999.0, BillingPeriod::Monthly, Some("Entertainment")),
            sub("Spotify", 299.0, BillingPeriod::Monthly, Some("Music")),
            sub("iCloud", 1200.0, BillingPeriod::Yearly, None),
        ]
    }

    fn session() -> Arc<StaticSessionProvider> {
        Arc::new(StaticSessionProvider::new(Some(SessionUser {
            id: "user-1".to_string(),
            provider: AuthProviderKind::Google,
            provider_token: Some("session-token".to_string()),
        })))
    }

    fn remote_insight() -> Insight {
        Insight {
            id: "remote-1".to_string(),
            kind: InsightKind::Trend,
            priority: InsightPriority::Low,
            title: "Remote".to_string(),
            description: "From the generator".to_string(),
            action_items: Vec::new(),
            potential_savings: None,
            affected_subscriptions: Vec::new(),
            created_at: fixed_now(),
        }
    }

    #[test]
    fn savings_cover_only_monthly_plans() {
        // (999 + 299) * 0.15 = 194.7
        assert_eq!(yearly_plan_savings(&sample()), 195.0);
        assert_eq!(yearly_plan_savings(&[]), 0.0);
    }

    #[test]
    fn offline_analysis_is_single_high_priority_insight() {
        let insights = offline_insights(&sample(), fixed_now());

        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.kind, InsightKind::Analysis);
        assert_eq!(insight.priority, InsightPriority::High);
        assert_eq!(insight.potential_savings, Some(195.0));
        assert_eq!(insight.action_items.len(), 3);
        assert!(insight.description.contains("1398 per month"));
        assert!(insight.description.contains("2 subscriptions are billed monthly"));
    }

    #[tokio::test]
    async fn missing_generator_falls_back_offline() {
        let service: InsightService<ScriptedGenerator, _> =
            InsightService::new(None, session()).with_now_provider(Arc::new(fixed_now));

        let insights = service.generate(&sample()).await;

        assert_eq!(insights[0].kind, InsightKind::Analysis);
    }

    #[tokio::test]
    async fn remote_insights_are_returned_as_is() {
        let generator = Arc::new(ScriptedGenerator {
            result: Ok(vec![remote_insight()]),
            calls: AtomicUsize::new(0),
        });
        let service = InsightService::new(Some(Arc::clone(&generator)), session());

        let insights = service.generate(&sample()).await;

        assert_eq!(insights, vec![remote_insight()]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generator_failure_falls_back_offline() {
        let generator = Arc::new(ScriptedGenerator {
            result: Err("endpoint returned 502".to_string()),
            calls: AtomicUsize::new(0),
        });
        let service = InsightService::new(Some(Arc::clone(&generator)), session())
            .with_now_provider(Arc::new(fixed_now));

        let insights = service.generate(&sample()).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(insights[0].id, format!("offline-analysis-{}", fixed_now().timestamp_millis()));
    }

    #[tokio::test]
    async fn signed_out_user_skips_generator() {
        let generator = Arc::new(ScriptedGenerator {
            result: Ok(vec![remote_insight()]),
            calls: AtomicUsize::new(0),
        });
        let service = InsightService::new(
            Some(Arc::clone(&generator)),
            Arc::new(StaticSessionProvider::default()),
        );

        let insights = service.generate(&sample()).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(insights[0].kind, InsightKind::Analysis);
    }
}
