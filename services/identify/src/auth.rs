//! Bearer credential verification.
//!
//! Handlers take an [`OwnerId`] argument; extracting it verifies the
//! `Authorization: Bearer <token>` header against the configured
//! [`TokenVerifier`] and rejects the request with 401 otherwise.

use crate::config::AuthConfig;
use crate::error::ServiceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Verifies a bearer credential and yields the owner it belongs to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Ok(None)` when the token is rejected
    async fn verify(&self, token: &str) -> Result<Option<String>>;
}

/// Authenticated owner identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract token from an Authorization header value
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    Arc<dyn TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = extract_bearer_token(header_value)
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

        let verifier = Arc::<dyn TokenVerifier>::from_ref(state);

        match verifier.verify(token).await? {
            Some(owner) => Ok(OwnerId(owner)),
            None => Err(ServiceError::Unauthorized("Invalid token".to_string())),
        }
    }
}

/// Verifies ID tokens through the identity toolkit `accounts:lookup` endpoint
pub struct IdentityToolkitVerifier {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    disabled: bool,
}

impl IdentityToolkitVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create token verifier HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TokenVerifier for IdentityToolkitVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(format!("{}/v1/accounts:lookup", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&LookupRequest { id_token: token })
            .send()
            .await
            .context("Failed to reach token verifier")?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            debug!(status = status.as_u16(), "Token rejected");
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("Token verifier returned {}", status);
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .context("Failed to parse token verifier response")?;

        Ok(lookup
            .users
            .into_iter()
            .find(|user| !user.disabled)
            .map(|user| user.local_id))
    }
}
