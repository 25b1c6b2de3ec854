use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("User is not authenticated")]
    Unauthenticated,
    #[error("Calendar access is not available; reconnect Google Calendar")]
    AuthUnavailable,
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Google Calendar API error: http {status}; body={body}")]
    CalendarApi { status: u16, body: String },
}

impl InfraError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::CalendarApi { status: 401 | 403, .. })
    }
}
