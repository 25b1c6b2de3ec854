use crate::domain::models::{BillingPeriod, Subscription};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_COLUMNS: &str = "id, owner_id, name, amount, currency, billing_period,
    next_payment_date, category, url, google_calendar_event_id";

pub trait SubscriptionRepository: Send + Sync {
    fn insert(&self, subscription: &Subscription) -> Result<(), InfraError>;
    fn get(&self, id: &str) -> Result<Option<Subscription>, InfraError>;
    fn update(&self, subscription: &Subscription) -> Result<(), InfraError>;
    fn delete(&self, id: &str) -> Result<(), InfraError>;
    /// Ordered by next payment date, earliest first.
    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Subscription>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSubscriptionRepository {
    db_path: PathBuf,
}

impl SqliteSubscriptionRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

type RawSubscriptionRow = (
    String,
    String,
    String,
    f64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawSubscriptionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn into_subscription(raw: RawSubscriptionRow) -> Result<Subscription, InfraError> {
    let (id, owner_id, name, amount, currency, period_raw, date_raw, category, url, event_ref) = raw;
    let billing_period = BillingPeriod::parse(&period_raw).map_err(|error| {
        InfraError::Storage(format!("invalid subscriptions.billing_period for {id}: {error}"))
    })?;
    let next_payment_date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT).map_err(|error| {
        InfraError::Storage(format!(
            "invalid subscriptions.next_payment_date '{date_raw}' for {id}: {error}"
        ))
    })?;

    Ok(Subscription {
        id,
        owner_id,
        name,
        amount,
        currency,
        billing_period,
        next_payment_date,
        category,
        url,
        external_event_ref: event_ref,
    })
}

impl SubscriptionRepository for SqliteSubscriptionRepository {
    fn insert(&self, subscription: &Subscription) -> Result<(), InfraError> {
        subscription.validate().map_err(InfraError::Validation)?;
        let connection = self.connect()?;
        let now = Utc::now().to_rfc3339();
        connection.execute(
            "INSERT INTO subscriptions (
               id, owner_id, name, amount, currency, billing_period, next_payment_date,
               category, url, google_calendar_event_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                subscription.id,
                subscription.owner_id,
                subscription.name,
                subscription.amount,
                subscription.currency,
                subscription.billing_period.as_str(),
                subscription.next_payment_date.format(DATE_FORMAT).to_string(),
                subscription.category,
                subscription.url,
                subscription.external_event_ref,
                now,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Subscription>, InfraError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM subscriptions WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;
        raw.map(into_subscription).transpose()
    }

    fn update(&self, subscription: &Subscription) -> Result<(), InfraError> {
        subscription.validate().map_err(InfraError::Validation)?;
        let connection = self.connect()?;
        let changed = connection.execute(
            "UPDATE subscriptions SET
               name = ?2,
               amount = ?3,
               currency = ?4,
               billing_period = ?5,
               next_payment_date = ?6,
               category = ?7,
               url = ?8,
               google_calendar_event_id = ?9,
               updated_at = ?10
             WHERE id = ?1",
            params![
                subscription.id,
                subscription.name,
                subscription.amount,
                subscription.currency,
                subscription.billing_period.as_str(),
                subscription.next_payment_date.format(DATE_FORMAT).to_string(),
                subscription.category,
                subscription.url,
                subscription.external_event_ref,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("subscription {}", subscription.id)));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let changed = connection.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Subscription>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions
             WHERE owner_id = ?1
             ORDER BY next_payment_date ASC, id ASC"
        ))?;
        let rows = statement.query_map(params![owner_id], read_row)?;

        let mut subscriptions = Vec::new();
        for raw in rows {
            subscriptions.push(into_subscription(raw?)?);
        }
        Ok(subscriptions)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    records: Mutex<HashMap<String, Subscription>>,
}

impl InMemorySubscriptionRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Subscription>>, InfraError> {
        self.records
            .lock()
            .map_err(|error| InfraError::Storage(format!("subscription lock poisoned: {error}")))
    }
}

impl SubscriptionRepository for InMemorySubscriptionRepository {
    fn insert(&self, subscription: &Subscription) -> Result<(), InfraError> {
        subscription.validate().map_err(InfraError::Validation)?;
        let mut records = self.lock()?;
        if records.contains_key(&subscription.id) {
            return Err(InfraError::Storage(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        records.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Subscription>, InfraError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn update(&self, subscription: &Subscription) -> Result<(), InfraError> {
        subscription.validate().map_err(InfraError::Validation)?;
        let mut records = self.lock()?;
        match records.get_mut(&subscription.id) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(())
            }
            None => Err(InfraError::NotFound(format!("subscription {}", subscription.id))),
        }
    }

    fn delete(&self, id: &str) -> Result<(), InfraError> {
        match self.lock()?.remove(id) {
            Some(_) => Ok(()),
            None => Err(InfraError::NotFound(format!("subscription {id}"))),
        }
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Subscription>, InfraError> {
        let mut subscriptions: Vec<Subscription> = self
            .lock()?
            .values()
            .filter(|subscription| subscription.owner_id == owner_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|left, right| {
            left.next_payment_date
                .cmp(&right.next_payment_date)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(subscriptions)
    }
}
