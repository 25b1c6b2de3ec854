use crate::domain::models::RefreshStrategy;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    OAuthCodeExchangeRequest, OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use url::Url;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Provider-hosted token issuance, driven with an escalating prompt mode.
#[async_trait]
pub trait InteractiveAuthProvider: Send + Sync {
    async fn request_token(&self, strategy: RefreshStrategy) -> Result<AuthGrant, InfraError>;

    /// Drops whatever the provider holds for the signed-in account.
    fn sign_out(&self) {}
}

/// Shows the provider's consent page for `authorization_url` and returns the
/// authorization code, or `None` when the user dismissed it.
#[async_trait]
pub trait ConsentGateway: Send + Sync {
    async fn request_authorization_code(
        &self,
        authorization_url: &str,
        strategy: RefreshStrategy,
    ) -> Result<Option<String>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

/// Authorization-code flow against Google. The refresh token never leaves memory.
pub struct OAuthCodeFlowProvider<C, G>
where
    C: OAuthHttpClient,
    G: ConsentGateway + ?Sized,
{
    config: OAuthConfig,
    oauth_client: Arc<C>,
    consent_gateway: Arc<G>,
    refresh_token: Mutex<Option<String>>,
    state_sequence: AtomicU64,
}

impl<C, G> OAuthCodeFlowProvider<C, G>
where
    C: OAuthHttpClient,
    G: ConsentGateway + ?Sized,
{
    pub fn new(config: OAuthConfig, oauth_client: Arc<C>, consent_gateway: Arc<G>) -> Self {
        Self {
            config,
            oauth_client,
            consent_gateway,
            refresh_token: Mutex::new(None),
            state_sequence: AtomicU64::new(1),
        }
    }

    pub fn build_authorization_url(
        &self,
        state: &str,
        strategy: RefreshStrategy,
    ) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        let scope = self.config.scopes.join(" ");

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", strategy.prompt())
            .append_pair("state", state);

        Ok(url.to_string())
    }

    pub fn forget_refresh_token(&self) {
        *self
            .refresh_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn held_refresh_token(&self) -> Option<String> {
        self.refresh_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, response: OAuthTokenResponse) -> AuthGrant {
        if let Some(refresh_token) = response.refresh_token {
            *self
                .refresh_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(refresh_token);
        }
        AuthGrant {
            access_token: response.access_token,
            expires_in: response.expires_in,
        }
    }

    fn next_state(&self) -> String {
        let sequence = self.state_sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "subtracker-{}-{}",
            chrono::Utc::now().timestamp_micros(),
            sequence
        )
    }

    async fn refresh_silently(&self, refresh_token: String) -> Result<AuthGrant, InfraError> {
        let result = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
            })
            .await;

        match result {
            Ok(response) => Ok(self.remember(response)),
            Err(error) => {
                if matches!(error, InfraError::OAuth(_)) {
                    self.forget_refresh_token();
                }
                Err(error)
            }
        }
    }

    async fn authorize_with_prompt(&self, strategy: RefreshStrategy) -> Result<AuthGrant, InfraError> {
        let authorization_url = self.build_authorization_url(&self.next_state(), strategy)?;
        let code = self
            .consent_gateway
            .request_authorization_code(&authorization_url, strategy)
            .await?
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| {
                InfraError::OAuth(format!("authorization not granted (prompt={})", strategy.prompt()))
            })?;

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: code,
            })
            .await?;
        Ok(self.remember(response))
    }
}

#[async_trait]
impl<C, G> InteractiveAuthProvider for OAuthCodeFlowProvider<C, G>
where
    C: OAuthHttpClient,
    G: ConsentGateway + ?Sized,
{
    async fn request_token(&self, strategy: RefreshStrategy) -> Result<AuthGrant, InfraError> {
        if strategy == RefreshStrategy::Silent {
            if let Some(refresh_token) = self.held_refresh_token() {
                debug!("refreshing access token with held refresh token");
                return self.refresh_silently(refresh_token).await;
            }
        }
        self.authorize_with_prompt(strategy).await
    }

    fn sign_out(&self) {
        debug!("forgetting held refresh token");
        self.forget_refresh_token();
    }
}
