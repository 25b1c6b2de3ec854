use crate::domain::models::SessionUser;
use crate::infrastructure::error::InfraError;
use std::sync::RwLock;

/// Identity of the signed-in user and the bearer token the sign-in flow issued.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Result<Option<SessionUser>, InfraError>;
}

/// Session held in process memory; the UI layer signs in and out through it.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    user: RwLock<Option<SessionUser>>,
}

impl StaticSessionProvider {
    pub fn new(user: Option<SessionUser>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn sign_in(&self, user: SessionUser) -> Result<(), InfraError> {
        let mut guard = self
            .user
            .write()
            .map_err(|error| InfraError::Storage(format!("session lock poisoned: {error}")))?;
        *guard = Some(user);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), InfraError> {
        let mut guard = self
            .user
            .write()
            .map_err(|error| InfraError::Storage(format!("session lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

impl SessionProvider for StaticSessionProvider {
    fn current_user(&self) -> Result<Option<SessionUser>, InfraError> {
        let guard = self
            .user
            .read()
            .map_err(|error| InfraError::Storage(format!("session lock poisoned: {error}")))?;
        Ok(guard.clone())
    }
}
