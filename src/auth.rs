// Caller identity - ID token cookie to console account

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::api::rest::AppState;
use crate::error::AppError;

/// Cookie carrying the raw ID token issued at login.
pub const TOKEN_COOKIE: &str = "OIDC_Token";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("missing OIDC_Token cookie")]
    MissingToken,

    #[error("token verification failed")]
    InvalidToken,

    #[error("token carries no usable account name")]
    MissingAccount,
}

/// Verifies a raw ID token and returns its claims.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, raw_token: &str) -> Result<IdTokenClaims, AuthError>;
}

/// Verifier backed by a fixed token table from the configuration.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, IdTokenClaims>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, IdTokenClaims)>) -> Self {
        StaticTokenVerifier {
            tokens: tokens.into_iter().collect(),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, raw_token: &str) -> Result<IdTokenClaims, AuthError> {
        self.tokens
            .get(raw_token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// The authenticated caller of a console endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleUser {
    pub account: String,
    pub display_name: String,
}

impl ConsoleUser {
    pub fn from_claims(
        claims: &IdTokenClaims,
        strip_email_domain: bool,
    ) -> Result<Self, AuthError> {
        let account = match claims.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) if strip_email_domain => email.split('@').next().unwrap_or(email),
            Some(email) => email,
            None => claims
                .preferred_username
                .as_deref()
                .ok_or(AuthError::MissingAccount)?,
        };
        let account = account.trim().to_lowercase();
        if account.is_empty() {
            return Err(AuthError::MissingAccount);
        }

        let display_name = claims
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| account.clone());

        Ok(ConsoleUser {
            account,
            display_name,
        })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ConsoleUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(TOKEN_COOKIE).ok_or(AuthError::MissingToken)?;
        let claims = state.verifier.verify(token.value())?;
        let user = ConsoleUser::from_claims(&claims, state.console.strip_email_domain)?;
        tracing::debug!("Console request from {}", user.account);
        Ok(user)
    }
}
