pub mod bootstrap;
pub mod calendar_client;
pub mod commands;
pub mod insights;
pub mod subscription_calendar;
pub mod token_health;
pub mod token_refresh;
pub mod token_state;
