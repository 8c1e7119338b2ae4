//! Caller identity and the poll authorization predicate.
//!
//! Credentials are issued elsewhere; this service only verifies a bearer token
//! and trusts the user id inside it.

use crate::error::PollError;
use crate::models::{Poll, UserId};
use actix_web::dev::Payload;
use actix_web::{web::Data, FromRequest, HttpRequest};
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// Verified caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Owner or admin. The only authorization rule for poll mutations.
pub fn can_manage(identity: &Identity, poll: &Poll) -> bool {
    identity.is_admin() || identity.user_id == poll.owner_id
}

/// Optional-caller variant used by read paths.
pub fn can_view_hidden(identity: Option<&Identity>, poll: &Poll) -> bool {
    identity.map_or(false, |i| can_manage(i, poll))
}

/// External identity provider seam: bearer credential in, identity out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Identity, PollError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

/// HS256 JWT verification.
pub struct JwtIdentityProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl JwtIdentityProvider {
    pub fn new(secret: &[u8], ttl_minutes: u32) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: chrono::Duration::minutes(i64::from(ttl_minutes)),
        }
    }

    /// Issues a token for the given identity. Used by tooling and tests.
    pub fn issue(&self, identity: &Identity) -> Result<String, PollError> {
        let claims = Claims {
            sub: identity.user_id.to_string(),
            role: identity.role,
            exp: (chrono::Utc::now() + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            log::warn!("Failed to sign token: {}", e);
            PollError::Unauthenticated
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, bearer: &str) -> Result<Identity, PollError> {
        let data = decode::<Claims>(bearer, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                log::debug!("Rejected bearer token: {}", e);
                PollError::Unauthenticated
            })?;

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| PollError::Unauthenticated)?;

        Ok(Identity {
            user_id,
            role: data.claims.role,
        })
    }
}

/// Extracts the bearer token from the `Authorization` header.
fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(actix_web::http::header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Requires a valid credential. Wrap in `Option<Identity>` for anonymous access.
impl FromRequest for Identity {
    type Error = PollError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let provider = req
            .app_data::<Data<Arc<dyn IdentityProvider>>>()
            .map(|data| data.get_ref().clone());
        let token = bearer_token(req);

        Box::pin(async move {
            let provider = provider.ok_or_else(|| {
                log::warn!("No identity provider registered; rejecting request.");
                PollError::Unauthenticated
            })?;
            let token = token.ok_or(PollError::Unauthenticated)?;
            provider.verify(&token).await
        })
    }
}
