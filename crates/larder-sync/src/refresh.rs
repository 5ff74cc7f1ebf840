//! Cursor-gated refresh: re-sync only the kinds whose remote change counter
//! advanced since the last successful run.
//!
//! Each dirty kind commits on its own (records plus that kind's cursor
//! entry, one transaction), in the fixed order categories → recipes →
//! photos. A kind that fails aborts the run: earlier kinds keep their
//! commits and advanced cursor entries, the failed kind's entry stays put
//! so the next run retries it from scratch. Only after every dirty kind
//! committed is the full cursor adopted wholesale; that also records
//! counters of kinds we do not mirror.

use tracing::info;

use larder_db::Database;
use larder_db::models::UserRow;
use larder_remote::RemoteApi;
use larder_types::models::{Kind, RefreshOutcome, SyncCursor};

use crate::collections;
use crate::error::SyncError;

pub async fn refresh<S: RemoteApi + ?Sized>(
    remote: &S,
    db: &Database,
    user: &UserRow,
) -> Result<RefreshOutcome, SyncError> {
    let fresh = remote.get_sync_cursor(&user.remote_token).await?;
    let prev: SyncCursor =
        serde_json::from_str(&user.cursor).map_err(larder_db::StoreError::Payload)?;
    let dirty = fresh.dirty_kinds(&prev);

    let mut outcome = RefreshOutcome::default();
    for kind in Kind::ALL {
        if !dirty.contains(kind.as_str()) {
            continue;
        }
        info!("Running sync ({})", kind);
        let current = db.records(&user.id, kind)?;
        let commit = match kind {
            Kind::Categories => {
                collections::sync_categories(remote, &user.remote_token, current).await?
            }
            Kind::Recipes => collections::sync_recipes(remote, &user.remote_token, current).await?,
            Kind::Photos => collections::sync_photos(remote, &user.remote_token, current).await?,
        };
        db.apply_commit(&user.id, kind, &commit, Some(fresh.get(kind.as_str())))?;
        outcome.mark(kind);
    }

    db.replace_cursor(&user.id, &fresh)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, seed_user, test_db};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn recipe(uid: &str, hash: &str) -> larder_types::models::RecipePayload {
        serde_json::from_value(json!({
            "uid": uid,
            "name": format!("recipe {uid}"),
            "hash": hash,
        }))
        .unwrap()
    }

    fn photo(uid: &str, recipe_uid: &str) -> larder_types::models::PhotoPayload {
        serde_json::from_value(json!({
            "uid": uid,
            "name": uid,
            "filename": format!("{uid}.jpg"),
            "hash": format!("hash-{uid}"),
            "order_flag": 1,
            "recipe_uid": recipe_uid,
        }))
        .unwrap()
    }

    fn cursor(entries: &[(&str, i64)]) -> SyncCursor {
        SyncCursor(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn only_dirty_kinds_are_synced() {
        let db = test_db();
        let user = seed_user(&db, "u1");
        let remote = FakeRemote::default();
        remote.add_recipe(&user.remote_token, recipe("R1", "h1"));
        remote.set_cursor(&user.remote_token, cursor(&[("recipes", 1)]));

        let outcome = refresh(&remote, &db, &user).await.unwrap();

        assert!(outcome.recipes);
        assert!(!outcome.categories);
        assert!(!outcome.photos);
        assert_eq!(db.records("u1", Kind::Recipes).unwrap().len(), 1);
        assert_eq!(db.get_cursor("u1").unwrap().get("recipes"), 1);
    }

    #[tokio::test]
    async fn clean_cursor_skips_everything() {
        let db = test_db();
        let user = seed_user(&db, "u1");
        let remote = FakeRemote::default();
        remote.add_recipe(&user.remote_token, recipe("R1", "h1"));
        remote.set_cursor(&user.remote_token, cursor(&[("recipes", 3)]));

        let outcome = refresh(&remote, &db, &user).await.unwrap();
        assert!(outcome.recipes);

        // No remote changes since: second refresh touches nothing.
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        let outcome = refresh(&remote, &db, &user).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::default());
        assert_eq!(remote.recipe_detail_fetches(), 1);
    }

    #[tokio::test]
    async fn failed_kind_keeps_earlier_commits_and_blocks_cursor_adoption() {
        let db = test_db();
        let user = seed_user(&db, "u1");
        let remote = FakeRemote::default();
        remote.add_recipe(&user.remote_token, recipe("R1", "h1"));
        remote.add_photo_with_url(&user.remote_token, photo("P1", "R1"), "http://cdn/p1.jpg");
        remote.set_cursor(&user.remote_token, cursor(&[("recipes", 2), ("photos", 2)]));
        remote.fail_photo_listing();

        let err = refresh(&remote, &db, &user).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));

        // Recipes committed and advanced; photos stayed at 0 so the next run
        // will retry them.
        assert_eq!(db.records("u1", Kind::Recipes).unwrap().len(), 1);
        let stored = db.get_cursor("u1").unwrap();
        assert_eq!(stored.get("recipes"), 2);
        assert_eq!(stored.get("photos"), 0);
    }

    #[tokio::test]
    async fn deletion_is_absence_from_the_listing() {
        let db = test_db();
        let user = seed_user(&db, "u1");
        let remote = FakeRemote::default();
        remote.add_recipe(&user.remote_token, recipe("R1", "h1"));
        remote.add_recipe(&user.remote_token, recipe("R2", "h2"));
        remote.set_cursor(&user.remote_token, cursor(&[("recipes", 1)]));
        refresh(&remote, &db, &user).await.unwrap();
        assert_eq!(db.records("u1", Kind::Recipes).unwrap().len(), 2);

        // R2 disappears remotely; counter advances.
        {
            let mut state_recipes = remote.recipes_of(&user.remote_token);
            state_recipes.retain(|r| r.uid != "R2");
            remote.replace_recipes(&user.remote_token, state_recipes);
        }
        remote.set_cursor(&user.remote_token, cursor(&[("recipes", 2)]));

        let user = db.get_user_by_id("u1").unwrap().unwrap();
        refresh(&remote, &db, &user).await.unwrap();
        let records = db.records("u1", Kind::Recipes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, "R1");
    }
}
