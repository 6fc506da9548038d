//! Authentication: context-id resolution
//!
//! The inference surface authenticates with `Authorization: Bearer mk_…`.
//! The middleware resolves the token to its (owner, context) pair,
//! enforces the per-context rate limit, and injects an [`AuthContext`]
//! into request extensions. The management surface identifies the billed
//! principal with an `X-Owner-ID` header.

use crate::error::ApiError;
use crate::registry::OwnerState;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use mneme_core::{ContextId, MemoryContext, OwnerId};
use std::sync::Arc;

// ============================================================================
// AUTH CONTEXT
// ============================================================================

/// Resolved caller identity, injected into request extensions.
#[derive(Clone)]
pub struct AuthContext {
    pub context: MemoryContext,
    pub owner: Arc<OwnerState>,
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Axum middleware for Bearer context-id authentication.
///
/// 1. Extracts `Authorization: Bearer <context-id>`
/// 2. Parses and resolves the context id (401 on unknown or inactive)
/// 3. Applies the per-context rate limit (429 on exceeded)
/// 4. Injects AuthContext into request extensions
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))?;

    let context_id: ContextId = token
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_token("Malformed context id"))?;

    let (context, owner) = state
        .registry
        .resolve_context(&context_id)
        .await
        .ok_or_else(|| ApiError::unauthorized("Unknown or inactive context id"))?;

    state.limiter.check(&context.id)?;
    state.registry.touch_context(&context.id).await;

    request.extensions_mut().insert(AuthContext { context, owner });
    Ok(next.run(request).await)
}

// ============================================================================
// EXTRACTORS
// ============================================================================

/// Extractor pulling the AuthContext injected by the middleware.
pub struct AuthExtractor(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                ApiError::internal_error(
                    "Auth context missing; ensure auth middleware runs first",
                )
            })
    }
}

/// Extractor for the management surface: resolves `X-Owner-ID` to the
/// owner's live state.
pub struct OwnerAuth(pub Arc<OwnerState>);

#[async_trait]
impl FromRequestParts<AppState> for OwnerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let owner_id: OwnerId = parts
            .headers
            .get("x-owner-id")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing X-Owner-ID header"))?
            .parse()
            .map_err(|_| ApiError::invalid_format("X-Owner-ID", "UUID"))?;

        let owner = state.registry.require_owner(owner_id).await?;
        Ok(OwnerAuth(owner))
    }
}
