use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;

use larder_sync::partners::PartnerError;
use larder_sync::{copier, refresh};
use larder_types::api::{Claims, CopyQuery};

use crate::auth::{AppState, current_user};
use crate::error::ApiError;

/// Re-sync all kinds whose remote change counter moved. Runs for one
/// account are expected to be serialized by the client; a racing run is
/// caught at commit time and answered with `sync_conflict`.
pub async fn refresh_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    let outcome = refresh::refresh(&state.remote, &state.db, &user).await?;
    Ok(Json(outcome))
}

/// Copy an active partner's recipes into the caller's own remote account.
/// `?dry_run=true` reports the exact same decisions without writing.
pub async fn copy_from_partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
    Query(query): Query<CopyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;

    // Only mutually approved partners may be copied from.
    let partner_id = partner_id.to_string();
    let is_active = state
        .db
        .active_partners(&user.id)?
        .iter()
        .any(|p| p.id == partner_id);
    if !is_active {
        return Err(PartnerError::NoSuchPartner.into());
    }
    let partner = state
        .db
        .get_user_by_id(&partner_id)?
        .ok_or(PartnerError::NoSuchPartner)?;

    let report = copier::copy_from_partner(
        &state.remote,
        &user.remote_token,
        &partner.remote_token,
        &partner.name,
        query.dry_run,
    )
    .await?;
    Ok(Json(report))
}
