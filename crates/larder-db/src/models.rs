//! Database row types and commit batches; these map directly to SQLite
//! rows. Distinct from larder-types API models to keep the DB layer
//! independent.

use serde_json::Value;

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub remote_token: String,
    pub partner_code: String,
    pub cursor: String,
    pub created_at: String,
}

/// One mirrored remote record. Image bytes live in a separate BLOB column
/// and are fetched on demand, never as part of collection reads.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: i64,
    pub uid: String,
    pub data: Value,
}

impl RecordRow {
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }

    /// Content digest carried by recipe payloads; cheap change detection.
    pub fn hash(&self) -> Option<&str> {
        self.data.get("hash").and_then(Value::as_str)
    }
}

pub struct EdgeRow {
    pub source_id: String,
    pub target_id: String,
    pub approved: bool,
}

/// Partner listing row with the partner's locally-mirrored recipe count.
pub struct PartnerRow {
    pub id: String,
    pub name: String,
    pub recipe_count: i64,
}

/// What to do with a record's image bytes on update.
pub enum ImageOp {
    Keep,
    Set(Vec<u8>),
    Clear,
}

pub struct NewRecord {
    pub uid: String,
    pub data: Value,
    pub image: Option<Vec<u8>>,
}

pub struct RecordUpdate {
    pub id: i64,
    pub data: Value,
    pub image: ImageOp,
}

/// All mutations one kind's reconciliation produced. Applied in a single
/// transaction together with that kind's cursor entry; either everything
/// lands or nothing does.
#[derive(Default)]
pub struct KindCommit {
    pub created: Vec<NewRecord>,
    pub updated: Vec<RecordUpdate>,
    pub deleted: Vec<i64>,
}

impl KindCommit {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
