use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::Value;
use tracing::error;

use larder_db::models::RecordRow;
use larder_types::api::{CategoryNode, Claims, RecipeDetail, RecipeListEntry};
use larder_types::models::Kind;

use crate::auth::{AppState, current_user};
use crate::error::ApiError;

async fn load_records(state: &AppState, user_id: String, kind: Kind) -> Result<Vec<RecordRow>, ApiError> {
    let state2 = state.clone();
    tokio::task::spawn_blocking(move || state2.db.records(&user_id, kind))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal()
        })?
        .map_err(ApiError::from)
}

// -- Categories --

/// Rebuild the category tree from the flat payloads. The parent/child
/// relation only exists as `parent_uid` references; categories pointing at
/// a parent we do not hold locally surface as roots rather than vanish.
fn build_category_tree(records: &[RecordRow]) -> Vec<CategoryNode> {
    let known: HashSet<&str> = records.iter().map(|r| r.uid.as_str()).collect();

    let mut by_parent: HashMap<Option<&str>, Vec<&RecordRow>> = HashMap::new();
    for record in records {
        let parent = record
            .data
            .get("parent_uid")
            .and_then(Value::as_str)
            .filter(|uid| known.contains(uid));
        by_parent.entry(parent).or_default().push(record);
    }
    for bucket in by_parent.values_mut() {
        bucket.sort_by_key(|r| r.data.get("order_flag").and_then(Value::as_i64).unwrap_or(0));
    }

    fn node(record: &RecordRow, by_parent: &HashMap<Option<&str>, Vec<&RecordRow>>) -> CategoryNode {
        let children = by_parent
            .get(&Some(record.uid.as_str()))
            .map(|rows| rows.iter().map(|r| node(r, by_parent)).collect())
            .unwrap_or_default();
        CategoryNode {
            id: record.id,
            uid: record.uid.clone(),
            name: record.name().unwrap_or("").to_string(),
            children,
        }
    }

    by_parent
        .get(&None)
        .map(|roots| roots.iter().map(|r| node(r, &by_parent)).collect())
        .unwrap_or_default()
}

pub async fn list_categories(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    let records = load_records(&state, user.id, Kind::Categories).await?;
    Ok(Json(build_category_tree(&records)))
}

// -- Recipes --

fn main_photo_url(record: &RecordRow) -> Option<String> {
    let photo = record
        .data
        .get("photo")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    let hash = record.data.get("photo_hash").and_then(Value::as_str)?;
    Some(format!("/image/recipe/{}/photo/{}/{}", record.id, hash, photo))
}

pub async fn list_recipes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;
    let records = load_records(&state, user.id, Kind::Recipes).await?;

    let mut entries: Vec<RecipeListEntry> = records
        .iter()
        .map(|record| RecipeListEntry {
            id: record.id,
            name: record.name().unwrap_or("").to_string(),
            in_trash: record
                .data
                .get("in_trash")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            photo_url: main_photo_url(record),
            categories: record
                .data
                .get("categories")
                .and_then(Value::as_array)
                .map(|uids| {
                    uids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();
    entries.sort_by_key(|e| e.name.to_lowercase());

    Ok(Json(entries))
}

pub async fn get_recipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims)?;

    let state2 = state.clone();
    let user_id = user.id.clone();
    let (record, photos) = tokio::task::spawn_blocking(move || {
        let record = state2.db.get_record(&user_id, Kind::Recipes, id)?;
        let photos = state2.db.records(&user_id, Kind::Photos)?;
        Ok::<_, larder_db::StoreError>((record, photos))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::internal()
    })??;

    let record = record.ok_or_else(|| ApiError::not_found("not_found"))?;

    // Soft join: photos reference their recipe by uid, resolved here at
    // read time.
    let mut own_photos: Vec<&RecordRow> = photos
        .iter()
        .filter(|p| p.data.get("recipe_uid").and_then(Value::as_str) == Some(record.uid.as_str()))
        .collect();
    own_photos.sort_by_key(|p| p.data.get("order_flag").and_then(Value::as_i64).unwrap_or(0));

    let photo_urls: Vec<String> = own_photos
        .iter()
        .filter_map(|p| {
            let hash = p.data.get("hash").and_then(Value::as_str)?;
            let filename = p.data.get("filename").and_then(Value::as_str)?;
            Some(format!(
                "/image/recipe/{}/photos/{}/{}/{}",
                record.id, p.id, hash, filename
            ))
        })
        .collect();

    // the upstream storage url is useless to clients
    let mut data = record.data.clone();
    if let Some(obj) = data.as_object_mut() {
        obj.remove("photo_url");
    }

    Ok(Json(RecipeDetail {
        id: record.id,
        name: record.name().unwrap_or("").to_string(),
        in_trash: record
            .data
            .get("in_trash")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        photo_url: main_photo_url(&record),
        photos: photo_urls,
        data,
    }))
}
