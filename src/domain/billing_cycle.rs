use crate::domain::models::{BillingPeriod, Subscription};
use chrono::{Datelike, Months, NaiveDate};
use std::borrow::Cow;

/// Advances `current` by one billing period. Month ends clamp to the last
/// valid day of the target month; Feb 29 clamps to Feb 28 in common years.
pub fn next_due_date(current: NaiveDate, period: BillingPeriod) -> NaiveDate {
    advance_by_periods(current, period, 1)
}

/// Returns the subscription unchanged when its payment date is today or later,
/// otherwise a copy whose date is `original + k periods` for the smallest `k`
/// reaching today.
pub fn roll_forward_if_past(subscription: &Subscription, today: NaiveDate) -> Cow<'_, Subscription> {
    let original = subscription.next_payment_date;
    if original >= today {
        return Cow::Borrowed(subscription);
    }

    let mut updated = subscription.clone();
    updated.next_payment_date = catch_up(original, subscription.billing_period, today);
    Cow::Owned(updated)
}

pub fn is_past_due(subscription: &Subscription, today: NaiveDate) -> bool {
    subscription.next_payment_date < today
}

/// Rolls every subscription forward and returns the ones that changed, in input order.
pub fn stale_subscriptions(subscriptions: &[Subscription], today: NaiveDate) -> Vec<Subscription> {
    subscriptions
        .iter()
        .filter_map(|subscription| match roll_forward_if_past(subscription, today) {
            Cow::Owned(updated) => Some(updated),
            Cow::Borrowed(_) => None,
        })
        .collect()
}

fn catch_up(original: NaiveDate, period: BillingPeriod, today: NaiveDate) -> NaiveDate {
    let elapsed_months = months_between(original, today);
    let mut periods = (elapsed_months / period.months()).max(1);
    // The estimate can undershoot by one when the day of month is past today's.
    loop {
        let candidate = advance_by_periods(original, period, periods);
        if candidate >= today {
            return candidate;
        }
        periods += 1;
    }
}

fn advance_by_periods(date: NaiveDate, period: BillingPeriod, periods: u32) -> NaiveDate {
    let months = period.months().saturating_mul(periods);
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let from_index = from.year() as i64 * 12 + from.month0() as i64;
    let to_index = to.year() as i64 * 12 + to.month0() as i64;
    u32::try_from((to_index - from_index).max(0)).unwrap_or(u32::MAX)
}
