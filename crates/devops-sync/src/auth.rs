//! Bearer token lifecycle per endpoint.
//!
//! The [`TokenManager`] keeps at most one token per endpoint. A cached token
//! is decoded locally and reused while its `exp` claim lies in the future;
//! the principal is rebuilt from the claims without a network call. An
//! expired, undecodable or rejected token is discarded and replaced by a
//! credential login against `POST /api/v1/auth/token`.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::endpoint::Connection;
use crate::error::{SyncError, SyncResult};

/// Login path, relative to the endpoint base URL.
pub const LOGIN_PATH: &str = "/api/v1/auth/token";

/// Role that marks a principal as privileged unless configured otherwise.
pub const DEFAULT_SUPERUSER_ROLE: &str = "SUPER_USER";

/// Claims carried by an endpoint-issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject email.
    #[serde(default)]
    pub email: String,
    /// Unique user id.
    #[serde(default)]
    pub uid: String,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Claim names.
    #[serde(default)]
    pub claims: Vec<String>,
    /// Expiration time (Unix seconds).
    pub exp: i64,
}

/// The authenticated identity behind a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Subject email.
    pub email: String,
    /// Unique user id.
    pub id: String,
    /// Role names.
    pub roles: Vec<String>,
    /// Claim names.
    pub claims: Vec<String>,
    /// True iff `roles` contains the superuser role.
    pub is_super_user: bool,
}

/// A usable bearer token together with what it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Raw bearer token.
    pub token: String,
    /// Identity decoded from the token.
    pub principal: Principal,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A token is usable only while its expiry is strictly after `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// The `Authorization` header value for this session.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Decode token claims without verifying the signature; the endpoint is the
/// only party that can verify it, the client only needs the payload.
///
/// # Errors
///
/// Returns [`SyncError::Token`] if the token is malformed.
pub fn decode_claims(token: &str) -> SyncResult<TokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| SyncError::Token(e.to_string()))
}

/// Obtains and caches bearer tokens for endpoints.
#[derive(Debug, Clone)]
pub struct TokenManager {
    http: reqwest::Client,
    superuser_role: String,
}

impl TokenManager {
    /// Create a token manager sharing the given HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, superuser_role: impl Into<String>) -> Self {
        Self {
            http,
            superuser_role: superuser_role.into(),
        }
    }

    /// The role name that makes a principal privileged.
    #[must_use]
    pub fn superuser_role(&self) -> &str {
        &self.superuser_role
    }

    /// Build a session from a raw token by decoding its claims.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Token`] if the token cannot be decoded.
    pub fn session_from_token(&self, token: &str) -> SyncResult<Session> {
        let claims = decode_claims(token)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| SyncError::Token(format!("exp {} out of range", claims.exp)))?;
        let is_super_user = claims.roles.iter().any(|r| r == &self.superuser_role);

        Ok(Session {
            token: token.to_string(),
            principal: Principal {
                email: claims.email,
                id: claims.uid,
                roles: claims.roles,
                claims: claims.claims,
                is_super_user,
            },
            expires_at,
        })
    }

    /// Return a valid session for the endpoint, logging in only when the
    /// cached token is missing or expired.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthenticationFailed`] if the login is rejected
    /// or cannot be performed; the cached token is cleared in that case.
    #[instrument(skip(self, connection), fields(endpoint = %connection.id()))]
    pub async fn authorize(&self, connection: &Connection) -> SyncResult<Session> {
        let mut slot = connection.token_slot().lock().await;

        if let Some(token) = slot.as_deref() {
            match self.session_from_token(token) {
                Ok(session) if session.is_valid_at(Utc::now()) => {
                    connection.set_principal(Some(session.principal.clone()));
                    return Ok(session);
                }
                Ok(session) => debug!(expired_at = %session.expires_at, "cached token expired"),
                Err(e) => debug!(error = %e, "cached token unreadable"),
            }
            *slot = None;
            connection.set_principal(None);
        }

        match self.login(connection).await {
            Ok(session) => {
                *slot = Some(session.token.clone());
                connection.set_principal(Some(session.principal.clone()));
                Ok(session)
            }
            Err(e) => {
                *slot = None;
                connection.set_principal(None);
                Err(e)
            }
        }
    }

    /// Drop the cached token, forcing a login on next use.
    pub async fn invalidate(&self, connection: &Connection) {
        *connection.token_slot().lock().await = None;
        connection.set_principal(None);
    }

    async fn login(&self, connection: &Connection) -> SyncResult<Session> {
        let failed = || SyncError::AuthenticationFailed {
            endpoint: connection.id().clone(),
        };

        let url = connection.address().join(LOGIN_PATH)?;
        let credentials = connection.credentials();
        let body = LoginRequest {
            email: &credentials.username,
            password: &credentials.password,
        };

        debug!(url = %url, "logging in");
        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            warn!(error = %e, "login request failed");
            failed()
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "login rejected");
            return Err(failed());
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "login response unreadable");
            failed()
        })?;

        let session = self.session_from_token(&login.token).map_err(|e| {
            warn!(error = %e, "login returned an undecodable token");
            failed()
        })?;

        info!(user = %session.principal.email, expires_at = %session.expires_at, "logged in");
        Ok(session)
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{EncodingKey, Header};

    use super::TokenClaims;

    /// Sign a token carrying the given claims with a throwaway key.
    pub(crate) fn issue(email: &str, roles: &[&str], exp: i64) -> String {
        let claims = TokenClaims {
            email: email.to_string(),
            uid: format!("uid-{email}"),
            roles: roles.iter().map(ToString::to_string).collect(),
            claims: vec!["LIST_VM".to_string()],
            exp,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-signing-key-not-used-by-client"),
        )
        .expect("token encodes")
    }
}
