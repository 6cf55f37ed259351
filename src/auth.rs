//! Bearer-token extractors.
//!
//! Tokens are issued by the identity service and resolved through the store;
//! this crate never mints them outside of [`MemoryStore::issue_token`](crate::store::MemoryStore::issue_token).

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::AcademyError;
use crate::models::Identity;
use crate::service::Academy;
use crate::store::Store;

async fn bearer<S: Store>(parts: &mut Parts, academy: &Academy<S>) -> Result<Option<Identity>, AcademyError> {
    if !parts.headers.contains_key(http::header::AUTHORIZATION) {
        return Ok(None);
    }
    let TypedHeader(Authorization(token)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, academy)
            .await
            .map_err(|_| AcademyError::Unauthorized)?;
    academy.authenticate(token.token()).await.map(Some)
}

#[async_trait]
impl<S: Store> FromRequestParts<Academy<S>> for Identity {
    type Rejection = AcademyError;

    async fn from_request_parts(parts: &mut Parts, academy: &Academy<S>) -> Result<Self, Self::Rejection> {
        bearer(parts, academy).await?.ok_or(AcademyError::Unauthorized)
    }
}

/// Caller that may be anonymous. A header that is present but invalid is
/// still rejected.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<Identity>);

#[async_trait]
impl<S: Store> FromRequestParts<Academy<S>> for Viewer {
    type Rejection = AcademyError;

    async fn from_request_parts(parts: &mut Parts, academy: &Academy<S>) -> Result<Self, Self::Rejection> {
        Ok(Viewer(bearer(parts, academy).await?))
    }
}

/// Admin or teacher.
#[derive(Debug, Clone, Copy)]
pub struct Staff(pub Identity);

#[async_trait]
impl<S: Store> FromRequestParts<Academy<S>> for Staff {
    type Rejection = AcademyError;

    async fn from_request_parts(parts: &mut Parts, academy: &Academy<S>) -> Result<Self, Self::Rejection> {
        let who = Identity::from_request_parts(parts, academy).await?;
        if !who.role.can_review() {
            tracing::warn!(user=%who.user_id, "staff endpoint refused");
            return Err(AcademyError::Forbidden("only admins or teachers may do this"));
        }
        Ok(Staff(who))
    }
}
