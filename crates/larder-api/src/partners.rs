use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use larder_db::models::PartnerRow;
use larder_sync::partners;
use larder_types::api::{AllPartners, Claims, PartnerRequest, PartnerSummary, PendingPartner, PendingPartners};

use crate::auth::{AppState, current_user, parse_uuid};
use crate::error::ApiError;

fn summary(row: &PartnerRow) -> PartnerSummary {
    PartnerSummary {
        id: parse_uuid(&row.id),
        name: row.name.clone(),
        recipe_count: row.recipe_count,
    }
}

fn pending(row: &PartnerRow) -> PendingPartner {
    PendingPartner {
        id: parse_uuid(&row.id),
        name: row.name.clone(),
    }
}

pub async fn list_partners(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;

    // Pure reads over the edge set, recomputed on every call.
    let state2 = state.clone();
    let user_id = user.id.clone();
    let (active, incoming, outgoing) = tokio::task::spawn_blocking(move || {
        let active = state2.db.active_partners(&user_id)?;
        let incoming = state2.db.pending_incoming(&user_id)?;
        let outgoing = state2.db.pending_outgoing(&user_id)?;
        Ok::<_, larder_db::StoreError>((active, incoming, outgoing))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal()
    })??;

    Ok(Json(AllPartners {
        active: active.iter().map(summary).collect(),
        pending: PendingPartners {
            incoming: incoming.iter().map(pending).collect(),
            outgoing: outgoing.iter().map(pending).collect(),
        },
    }))
}

pub async fn request_partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PartnerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    let outcome = partners::request_partner(&state.db, &user, req.partner_code.trim())?;
    let status = match outcome {
        partners::RequestOutcome::Requested => "requested",
        partners::RequestOutcome::Approved => "approved",
    };
    Ok((StatusCode::CREATED, Json(serde_json::json!({"status": status}))))
}

pub async fn approve_partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    partners::approve_partner(&state.db, &user, &partner_id.to_string())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_active_partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    partners::remove_active_partner(&state.db, &user, &partner_id.to_string())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_pending_partner(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(partner_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    partners::remove_pending_partner(&state.db, &user, &partner_id.to_string())?;
    Ok(StatusCode::NO_CONTENT)
}
