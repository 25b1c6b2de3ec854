use crate::domain::models::{BillingPeriod, Subscription};
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

const NEAR_TERM_DAYS: i64 = 30;
const MID_TERM_DAYS: i64 = 90;

const SYMBOL_CODES: &[(&str, &str)] = &[
    ("₽", "RUB"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₩", "KRW"),
    ("₹", "INR"),
    ("₺", "TRY"),
    ("₴", "UAH"),
    ("₫", "VND"),
    ("₦", "NGN"),
    ("₪", "ILS"),
    ("₱", "PHP"),
    ("R$", "BRL"),
    ("C$", "CAD"),
    ("CA$", "CAD"),
    ("A$", "AUD"),
    ("AU$", "AUD"),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionRef {
    pub id: String,
    pub name: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpendingSummary {
    pub total_monthly: f64,
    pub total_yearly: f64,
    pub most_expensive: Option<SubscriptionRef>,
    pub cheapest: Option<SubscriptionRef>,
    pub next_month_total: f64,
    pub popular_category: Option<String>,
    pub popular_category_count: usize,
    pub subscription_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UpcomingPayments {
    pub within_30_days: Vec<Subscription>,
    pub within_90_days: Vec<Subscription>,
    pub later: Vec<Subscription>,
}

impl UpcomingPayments {
    /// Sum of everything due within the next 90 days.
    pub fn upcoming_total(&self) -> f64 {
        self.within_30_days
            .iter()
            .chain(&self.within_90_days)
            .map(|subscription| subscription.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryShare {
    pub category: String,
    pub monthly_amount: f64,
    pub percentage: f64,
}

pub fn monthly_equivalent(subscription: &Subscription) -> f64 {
    match subscription.billing_period {
        BillingPeriod::Monthly => subscription.amount,
        BillingPeriod::Yearly => subscription.amount / 12.0,
    }
}

/// Monthly-equivalent spend of subscriptions charging within `today`'s calendar month.
pub fn monthly_total(subscriptions: &[Subscription], today: NaiveDate) -> f64 {
    subscriptions
        .iter()
        .filter(|subscription| same_month(subscription.next_payment_date, today))
        .map(monthly_equivalent)
        .sum()
}

pub fn spending_summary(subscriptions: &[Subscription], today: NaiveDate) -> SpendingSummary {
    let total_monthly: f64 = subscriptions.iter().map(monthly_equivalent).sum();

    let most_expensive = subscriptions
        .iter()
        .max_by(|left, right| left.amount.total_cmp(&right.amount))
        .map(to_ref);
    let cheapest = subscriptions
        .iter()
        .min_by(|left, right| left.amount.total_cmp(&right.amount))
        .map(to_ref);

    let next_month = today.checked_add_months(Months::new(1)).unwrap_or(today);
    let next_month_total = subscriptions
        .iter()
        .filter(|subscription| same_month(subscription.next_payment_date, next_month))
        .map(|subscription| subscription.amount)
        .sum();

    let mut counts: Vec<(String, usize)> = Vec::new();
    for subscription in subscriptions {
        let category = subscription.category_or_default();
        match counts.iter_mut().find(|(name, _)| name == category) {
            Some((_, count)) => *count += 1,
            None => counts.push((category.to_string(), 1)),
        }
    }
    // Ties go to the category seen first.
    let popular = counts
        .into_iter()
        .fold(None::<(String, usize)>, |best, candidate| match best {
            Some(best) if best.1 >= candidate.1 => Some(best),
            _ => Some(candidate),
        });

    SpendingSummary {
        total_monthly,
        total_yearly: total_monthly * 12.0,
        most_expensive,
        cheapest,
        next_month_total,
        popular_category_count: popular.as_ref().map_or(0, |(_, count)| *count),
        popular_category: popular.map(|(name, _)| name),
        subscription_count: subscriptions.len(),
    }
}

/// Groups by days until payment. Past-due records land in the 30-day group.
pub fn upcoming_payments(subscriptions: &[Subscription], today: NaiveDate) -> UpcomingPayments {
    let mut grouped = UpcomingPayments::default();
    for subscription in subscriptions {
        let days = (subscription.next_payment_date - today).num_days();
        let bucket = if days <= NEAR_TERM_DAYS {
            &mut grouped.within_30_days
        } else if days <= MID_TERM_DAYS {
            &mut grouped.within_90_days
        } else {
            &mut grouped.later
        };
        bucket.push(subscription.clone());
    }

    for group in [
        &mut grouped.within_30_days,
        &mut grouped.within_90_days,
        &mut grouped.later,
    ] {
        group.sort_by_key(|subscription| subscription.next_payment_date);
    }
    grouped
}

pub fn category_breakdown(subscriptions: &[Subscription]) -> Vec<CategoryShare> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for subscription in subscriptions {
        *totals
            .entry(subscription.category_or_default().to_string())
            .or_default() += monthly_equivalent(subscription);
    }

    let grand_total: f64 = totals.values().sum();
    let mut shares: Vec<CategoryShare> = totals
        .into_iter()
        .map(|(category, monthly_amount)| CategoryShare {
            percentage: if grand_total > 0.0 {
                monthly_amount / grand_total * 100.0
            } else {
                0.0
            },
            category,
            monthly_amount,
        })
        .collect();
    shares.sort_by(|left, right| right.monthly_amount.total_cmp(&left.monthly_amount));
    shares
}

/// Resolves a currency symbol or code to an ISO 4217 code.
pub fn resolve_currency_code(currency: &str) -> Option<String> {
    let input = currency.trim();
    if input.len() == 3 && input.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Some(input.to_ascii_uppercase());
    }
    SYMBOL_CODES
        .iter()
        .find(|(symbol, _)| *symbol == input)
        .map(|(_, code)| (*code).to_string())
}

/// Renders `"<amount> <CODE>"` with up to two decimals. Unknown currencies are
/// appended verbatim.
pub fn format_amount(amount: f64, currency: &str) -> String {
    let number = format_number(amount);
    match resolve_currency_code(currency) {
        Some(code) => format!("{number} {code}"),
        None => format!("{number} {}", currency.trim()).trim().to_string(),
    }
}

fn format_number(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn same_month(date: NaiveDate, reference: NaiveDate) -> bool {
    date.year() == reference.year() && date.month() == reference.month()
}

fn to_ref(subscription: &Subscription) -> SubscriptionRef {
    SubscriptionRef {
        id: subscription.id.clone(),
        name: subscription.name.clone(),
        amount: subscription.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn sub(
        id: &str,
        amount: f64,
        billing_period: BillingPeriod,
        next_payment_date: NaiveDate,
        category: Option<&str>,
    ) -> Subscription {
        Subscription {
            id: id.to_string(),
            owner_id: "user-1".to_string(),
            name: id.to_string(),
            amount,
            currency: "₽".to_string(),
            billing_period,
            next_payment_date,
            category: category.map(ToOwned::to_owned),
            url: None,
            external_event_ref: None,
        }
    }

    fn sample() -> Vec<Subscription> {
        vec![
            sub("netflix", 999.0, BillingPeriod::Monthly, date(2024, 5, 20), Some("Entertainment")),
            sub("jetbrains", 1200.0, BillingPeriod::Yearly, date(2024, 5, 2), Some("Work")),
            sub("spotify", 299.0, BillingPeriod::Monthly, date(2024, 6, 3), Some("Entertainment")),
            sub("icloud", 149.0, BillingPeriod::Monthly, date(2024, 9, 1), None),
        ]
    }

    #[test]
    fn monthly_total_counts_only_current_month_in_monthly_terms() {
        let total = monthly_total(&sample(), date(2024, 5, 10));
        assert!((total - (999.0 + 100.0)).abs() < 1e-9);
    }

    #[test]
    fn summary_reports_extremes_and_popular_category() {
        let summary = spending_summary(&sample(), date(2024, 5, 10));

        assert!((summary.total_monthly - (999.0 + 100.0 + 299.0 + 149.0)).abs() < 1e-9);
        assert!((summary.total_yearly - summary.total_monthly * 12.0).abs() < 1e-9);
        assert_eq!(summary.most_expensive.map(|item| item.id), Some("jetbrains".to_string()));
        assert_eq!(summary.cheapest.map(|item| item.id), Some("icloud".to_string()));
        assert!((summary.next_month_total - 299.0).abs() < 1e-9);
        assert_eq!(summary.popular_category.as_deref(), Some("Entertainment"));
        assert_eq!(summary.popular_category_count, 2);
        assert_eq!(summary.subscription_count, 4);
    }

    #[test]
    fn summary_of_empty_list_has_no_extremes() {
        let summary = spending_summary(&[], date(2024, 5, 10));
        assert_eq!(summary.most_expensive, None);
        assert_eq!(summary.popular_category, None);
        assert_eq!(summary.total_monthly, 0.0);
    }

    #[test]
    fn upcoming_payments_are_bucketed_and_sorted() {
        let grouped = upcoming_payments(&sample(), date(2024, 5, 1));

        let near: Vec<&str> = grouped.within_30_days.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(near, vec!["jetbrains", "netflix"]);
        let mid: Vec<&str> = grouped.within_90_days.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(mid, vec!["spotify"]);
        assert_eq!(grouped.later.len(), 1);
        assert!((grouped.upcoming_total() - (999.0 + 1200.0 + 299.0)).abs() < 1e-9);
    }

    #[test]
    fn category_breakdown_is_descending_with_default_category() {
        let shares = category_breakdown(&sample());
        assert_eq!(shares[0].category, "Entertainment");
        assert!(shares.iter().any(|share| share.category == "Other"));
        let total: f64 = shares.iter().map(|share| share.percentage).sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn format_amount_resolves_symbols_and_codes() {
        assert_eq!(format_amount(999.0, "₽"), "999 RUB");
        assert_eq!(format_amount(12.5, "usd"), "12.5 USD");
        assert_eq!(format_amount(9.999, "R$"), "10 BRL");
        assert_eq!(format_amount(3.14159, "credits"), "3.14 credits");
    }
}
