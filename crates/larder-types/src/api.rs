use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{CopyReport, RefreshOutcome};

// -- JWT Claims --

/// JWT claims shared between larder-api (REST middleware) and larder-cli.
/// Canonical definition lives here in larder-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub partner_code: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub token: String,
}

// -- Sync --

pub type RefreshResponse = RefreshOutcome;

#[derive(Debug, Default, Deserialize)]
pub struct CopyQuery {
    #[serde(default)]
    pub dry_run: bool,
}

pub type CopyResponse = CopyReport;

// -- Partners --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartnerRequest {
    pub partner_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartnerSummary {
    pub id: Uuid,
    pub name: String,
    pub recipe_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingPartner {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PendingPartners {
    pub incoming: Vec<PendingPartner>,
    pub outgoing: Vec<PendingPartner>,
}

#[derive(Debug, Serialize)]
pub struct AllPartners {
    pub active: Vec<PartnerSummary>,
    pub pending: PendingPartners,
}

// -- Categories --

/// Category tree node; `children` is recomputed from `parent_uid` on every
/// read, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub children: Vec<CategoryNode>,
}

// -- Recipes --

#[derive(Debug, Serialize)]
pub struct RecipeListEntry {
    pub id: i64,
    pub name: String,
    pub in_trash: bool,
    pub photo_url: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub name: String,
    pub in_trash: bool,
    pub photo_url: Option<String>,
    pub photos: Vec<String>,
    pub data: Value,
}
