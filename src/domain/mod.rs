pub mod analytics;
pub mod billing_cycle;
pub mod models;
