//! Client identification for the job-submission surface.
//!
//! Token issuance is out of scope (§1 Non-goals): the orchestrator does not
//! run a login flow. A caller identifies itself with an `X-Client-Id`
//! header; a missing or malformed header gets a fresh id minted for it, so
//! the API stays usable without a separate identity service in front of it.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use relay_ids::ClientId;
use std::convert::Infallible;

pub struct ClientIdentity(pub ClientId);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-client-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| ClientId::parse(s).ok())
            .unwrap_or_else(ClientId::new);
        Ok(ClientIdentity(id))
    }
}
