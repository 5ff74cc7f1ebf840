use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The record kinds mirrored from the remote service. The lowercase names
/// double as sync cursor keys and DB discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Categories,
    Recipes,
    Photos,
}

impl Kind {
    /// Fixed sync order: categories first so recipes can reference them,
    /// photos last so their recipes exist locally.
    pub const ALL: [Kind; 3] = [Kind::Categories, Kind::Recipes, Kind::Photos];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Categories => "categories",
            Kind::Recipes => "recipes",
            Kind::Photos => "photos",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind change counters reported by the remote service. The service
/// tracks more kinds than we mirror (menus, groceries, ...); unknown keys
/// pass through untouched so a wholesale replace never loses them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub BTreeMap<String, i64>);

impl SyncCursor {
    pub fn get(&self, kind: &str) -> i64 {
        self.0.get(kind).copied().unwrap_or(0)
    }

    /// Kinds whose counter strictly exceeds the previously stored value.
    /// Keys missing on either side default to 0.
    pub fn dirty_kinds(&self, prev: &SyncCursor) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|(kind, counter)| **counter > prev.get(kind))
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn set(&mut self, kind: &str, counter: i64) {
        self.0.insert(kind.to_string(), counter);
    }
}

fn new_remote_uid() -> String {
    // The remote service assigns uppercase UUIDs; records we create follow suit.
    Uuid::new_v4().to_string().to_uppercase()
}

/// A recipe category. Parent/child structure is carried only through
/// `parent_uid`; the tree is recomputed on read, never stored as edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPayload {
    pub uid: String,
    pub name: String,
    pub order_flag: i64,
    #[serde(default)]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CategoryPayload {
    pub fn new(name: impl Into<String>, order_flag: i64, parent_uid: Option<String>) -> Self {
        Self {
            uid: new_remote_uid(),
            name: name.into(),
            order_flag,
            parent_uid,
            deleted: false,
            extra: Map::new(),
        }
    }
}

/// Lightweight recipe listing entry. The listing endpoint returns only
/// `{uid, hash}` pairs; the full payload costs a second fetch per recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub uid: String,
    pub hash: String,
}

/// Full recipe payload. Only the fields the engine interprets are typed;
/// everything else (ingredients, directions, ratings, ...) passes through
/// the open map untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipePayload {
    pub uid: String,
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub in_trash: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub on_grocery_list: Option<Value>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub photo_hash: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecipePayload {
    /// Strip fields that belong to the source account, not the recipe.
    pub fn clear_user_data(&mut self) {
        self.categories.clear();
        self.on_grocery_list = None;
    }
}

/// Photo metadata. `recipe_uid` is a soft join: the referenced recipe may
/// not be present locally. `photo_url` is only populated when the photo was
/// fetched through its dedicated endpoint, not from the listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoPayload {
    pub uid: String,
    pub name: String,
    pub filename: String,
    pub hash: String,
    pub order_flag: i64,
    pub recipe_uid: String,
    // Only present when fetched through the dedicated photo endpoint; kept
    // out of the serialized form when absent so listing-shaped and
    // fetch-then-stripped payloads compare equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which kinds a refresh run actually re-synced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub categories: bool,
    pub recipes: bool,
    pub photos: bool,
}

impl RefreshOutcome {
    pub fn mark(&mut self, kind: Kind) {
        match kind {
            Kind::Categories => self.categories = true,
            Kind::Recipes => self.recipes = true,
            Kind::Photos => self.photos = true,
        }
    }
}

/// What the cross-account copier decided for one partner recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CopyAction {
    /// Already present in the user's own account (by uid).
    AlreadyPresent,
    /// The partner trashed it; never copied.
    Trashed,
    Copied { photos: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeCopy {
    pub uid: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub action: CopyAction,
}

/// Per-partner report of a copy run. Identical for dry and wet runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    pub dry_run: bool,
    pub recipes: Vec<RecipeCopy>,
    pub created_categories: Vec<String>,
}

impl CopyReport {
    pub fn copied_count(&self) -> usize {
        self.recipes
            .iter()
            .filter(|r| matches!(r.action, CopyAction::Copied { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dirty_kinds_compares_against_previous_counters() {
        let prev = SyncCursor(BTreeMap::from([
            ("recipes".to_string(), 4),
            ("categories".to_string(), 2),
        ]));
        let mut fresh = prev.clone();
        fresh.set("recipes", 5);
        fresh.set("photos", 1);

        let dirty = fresh.dirty_kinds(&prev);
        assert!(dirty.contains("recipes"));
        assert!(dirty.contains("photos"), "unknown previous keys default to 0");
        assert!(!dirty.contains("categories"));
    }

    #[test]
    fn dirty_kinds_ignores_counters_that_went_backwards() {
        let prev = SyncCursor(BTreeMap::from([("recipes".to_string(), 9)]));
        let fresh = SyncCursor(BTreeMap::from([("recipes".to_string(), 3)]));
        assert!(fresh.dirty_kinds(&prev).is_empty());
    }

    #[test]
    fn recipe_payload_round_trips_unknown_fields() {
        let raw = json!({
            "uid": "A1",
            "name": "Shakshuka",
            "hash": "abc",
            "in_trash": false,
            "categories": [],
            "ingredients": "eggs\ntomatoes",
            "rating": 5,
        });
        let recipe: RecipePayload = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(recipe.extra["ingredients"], "eggs\ntomatoes");

        let back = serde_json::to_value(&recipe).unwrap();
        assert_eq!(back["rating"], 5);
        assert_eq!(back["uid"], "A1");
    }

    #[test]
    fn clear_user_data_strips_account_fields() {
        let mut recipe: RecipePayload = serde_json::from_value(json!({
            "uid": "A1",
            "name": "Soup",
            "hash": "h",
            "categories": ["C1", "C2"],
            "on_grocery_list": "2023-01-01",
        }))
        .unwrap();
        recipe.clear_user_data();
        assert!(recipe.categories.is_empty());
        assert!(recipe.on_grocery_list.is_none());
    }
}
