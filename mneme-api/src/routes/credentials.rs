//! Provider credential REST API Routes
//!
//! Owner-scoped BYOK credential management, one credential per provider
//! family. Values are opaque ciphertext (encryption at rest is an
//! external collaborator) and are never echoed back.

use crate::auth::OwnerAuth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mneme_core::{ProviderCredential, ProviderFamily};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPES
// ============================================================================

/// Request to set a provider credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SetCredentialRequest {
    /// Opaque provider credential
    pub credential: String,
}

/// Response containing credential metadata (never the value).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListCredentialsResponse {
    pub credentials: Vec<ProviderCredential>,
    pub total: i32,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /v1/credentials - list credential metadata for the owner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/credentials",
    tag = "Credentials",
    responses(
        (status = 200, description = "Credential metadata", body = ListCredentialsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn list_credentials(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
) -> ApiResult<impl IntoResponse> {
    let credentials = state.registry.credentials_for(owner.id).await;
    let total = credentials.len() as i32;
    Ok(Json(ListCredentialsResponse { credentials, total }))
}

/// PUT /v1/credentials/{family} - set the credential for a family
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/v1/credentials/{family}",
    tag = "Credentials",
    params(("family" = String, Path, description = "Provider family")),
    request_body = SetCredentialRequest,
    responses(
        (status = 204, description = "Credential stored"),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn set_credential(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Path(family): Path<String>,
    Json(req): Json<SetCredentialRequest>,
) -> ApiResult<impl IntoResponse> {
    let family = parse_family(&family)?;
    if req.credential.trim().is_empty() {
        return Err(ApiError::missing_field("credential"));
    }

    state
        .registry
        .set_credential(owner.id, family, req.credential.trim())
        .await?;

    tracing::info!(owner_id = %owner.id, family = %family, "Provider credential stored");

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/credentials/{family} - remove the credential for a family
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/credentials/{family}",
    tag = "Credentials",
    params(("family" = String, Path, description = "Provider family")),
    responses(
        (status = 204, description = "Credential removed"),
        (status = 404, description = "No credential for this family", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    )
))]
pub async fn delete_credential(
    State(state): State<AppState>,
    OwnerAuth(owner): OwnerAuth,
    Path(family): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let family = parse_family(&family)?;
    if !state.registry.delete_credential(owner.id, family).await {
        return Err(ApiError::not_found(format!(
            "No {} credential for this owner",
            family
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn parse_family(raw: &str) -> ApiResult<ProviderFamily> {
    ProviderFamily::parse(raw).ok_or_else(|| {
        ApiError::invalid_format(
            "family",
            "openai|anthropic|google|openrouter|meta-llama|mistral",
        )
    })
}
