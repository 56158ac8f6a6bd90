use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::PipelineError;

const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default, rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier")]
    name_identifier: Option<String>,
}

/// Verifies HS256 access tokens issued by the identity service.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// User id carried by `token` (`sub`, falling back to the name identifier claim).
    pub fn user_id(&self, token: &str) -> Result<String, PipelineError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            PipelineError::Unauthorized("Invalid or expired access token.".to_string())
        })?;

        data.claims
            .sub
            .or(data.claims.name_identifier)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Unauthorized(format!(
                    "User id was not found in the access token (expected sub or {NAME_IDENTIFIER_CLAIM})."
                ))
            })
    }
}

/// Authenticated caller, taken from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = PipelineError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| PipelineError::Unauthorized("Missing bearer token.".to_string()))?;

        let user_id = state.jwt.user_id(token)?;
        Ok(AuthUser { user_id })
    }
}
