//! Serves stored image blobs. These routes are unauthenticated; the URLs
//! embed the content hash and filename and only resolve while both still
//! match the record, which keeps them hard to guess and self-invalidating.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use bytes::Bytes;
use serde_json::Value;
use tracing::error;

use larder_db::models::RecordRow;
use larder_types::models::Kind;

use crate::auth::AppState;
use crate::error::ApiError;

fn field<'a>(record: &'a RecordRow, key: &str) -> Option<&'a str> {
    record.data.get(key).and_then(Value::as_str)
}

async fn load_image(state: &AppState, kind: Kind, id: i64) -> Result<Vec<u8>, ApiError> {
    let state2 = state.clone();
    tokio::task::spawn_blocking(move || state2.db.get_image_global(kind, id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal()
        })??
        .ok_or_else(|| ApiError::not_found("not_found"))
}

/// GET /image/recipe/{id}/photo/{hash}/{name}; a recipe's main photo.
pub async fn recipe_main_photo(
    State(state): State<AppState>,
    Path((id, hash, name)): Path<(i64, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, record) = state
        .db
        .get_record_global(Kind::Recipes, id)?
        .ok_or_else(|| ApiError::not_found("not_found"))?;

    if field(&record, "photo_hash") != Some(hash.as_str())
        || field(&record, "photo") != Some(name.as_str())
    {
        return Err(ApiError::not_found("not_found"));
    }

    let bytes = load_image(&state, Kind::Recipes, id).await?;
    Ok(([(header::ETAG, format!("\"{hash}\""))], Bytes::from(bytes)))
}

/// GET /image/recipe/{id}/photos/{pid}/{hash}/{name}; an extra photo,
/// validated against both the photo record and its owning recipe.
pub async fn recipe_photo(
    State(state): State<AppState>,
    Path((id, pid, hash, name)): Path<(i64, i64, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (recipe_owner, recipe) = state
        .db
        .get_record_global(Kind::Recipes, id)?
        .ok_or_else(|| ApiError::not_found("not_found"))?;
    let (photo_owner, photo) = state
        .db
        .get_record_global(Kind::Photos, pid)?
        .ok_or_else(|| ApiError::not_found("not_found"))?;

    if photo_owner != recipe_owner
        || field(&photo, "recipe_uid") != Some(recipe.uid.as_str())
        || field(&photo, "hash") != Some(hash.as_str())
        || field(&photo, "filename") != Some(name.as_str())
    {
        return Err(ApiError::not_found("not_found"));
    }

    let bytes = load_image(&state, Kind::Photos, pid).await?;
    Ok(([(header::ETAG, format!("\"{hash}\""))], Bytes::from(bytes)))
}
