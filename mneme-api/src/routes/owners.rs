//! Owner bootstrap route
//!
//! Account CRUD beyond the fields the core reads belongs to an external
//! collaborator; this single route exists so a deployment (or a test)
//! can mint the billed principal the management surface keys on.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use mneme_core::{EntityIdType, Owner, OwnerId};

/// Response containing the new owner.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OwnerResponse {
    pub owner: Owner,
}

/// POST /v1/owners - create an owner on the free tier
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/owners",
    tag = "Owners",
    responses(
        (status = 201, description = "Owner created", body = OwnerResponse),
    )
))]
pub async fn create_owner(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let owner = state.registry.create_owner(OwnerId::now_v7()).await;
    let snapshot = owner.snapshot().await;

    tracing::info!(owner_id = %snapshot.id, "Owner created");

    Ok((StatusCode::CREATED, Json(OwnerResponse { owner: snapshot })))
}
