//! Per-kind collection syncers: wire the generic reconcile engine to the
//! remote endpoints of one record kind and its post-processing (image
//! materialization). Each syncer turns the diff into a [`KindCommit`] the
//! caller applies in a single transaction.

use futures_util::{StreamExt, stream};
use serde_json::Value;
use tracing::{info, warn};

use larder_db::models::{ImageOp, KindCommit, NewRecord, RecordRow, RecordUpdate};
use larder_remote::{RemoteApi, RemoteError};

use crate::error::SyncError;
use crate::reconcile::{MAX_PARALLEL_FETCHES, reconcile};

/// Raw structural comparison; the default for kinds whose listing already
/// carries the full payload.
fn payload_changed<T: serde::Serialize>(old: &RecordRow, new: &T) -> bool {
    serde_json::to_value(new).map(|value| old.data != value).unwrap_or(true)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, SyncError> {
    Ok(serde_json::to_value(value).map_err(RemoteError::from)?)
}

/// Categories: no second fetch, no binaries. Parent/child structure rides
/// along inside the payloads and is recomputed on read.
pub async fn sync_categories<S: RemoteApi + ?Sized>(
    remote: &S,
    token: &str,
    current: Vec<RecordRow>,
) -> Result<KindCommit, SyncError> {
    let incoming = remote.get_categories(token).await?;
    let diff = reconcile(
        current,
        incoming,
        |c| c.uid.as_str(),
        payload_changed,
        |c| async move { to_value(&c) },
    )
    .await?;

    let mut commit = KindCommit::default();
    for row in diff.deleted {
        info!("Deleting category {} ({})", row.uid, row.name().unwrap_or("?"));
        commit.deleted.push(row.id);
    }
    for (old, data) in diff.updated {
        commit.updated.push(RecordUpdate {
            id: old.id,
            data,
            image: ImageOp::Keep,
        });
    }
    for (uid, data) in diff.created {
        commit.created.push(NewRecord {
            uid,
            data,
            image: None,
        });
    }
    Ok(commit)
}

/// Recipes: the listing is `{uid, hash}` pairs; the hash comparison is what
/// keeps unchanged recipes from costing a detail fetch. Every created or
/// updated recipe then materializes its main photo.
pub async fn sync_recipes<S: RemoteApi + ?Sized>(
    remote: &S,
    token: &str,
    current: Vec<RecordRow>,
) -> Result<KindCommit, SyncError> {
    let incoming = remote.get_recipe_list(token).await?;
    let diff = reconcile(
        current,
        incoming,
        |s| s.uid.as_str(),
        |old, new| old.hash() != Some(new.hash.as_str()),
        |s| async move {
            let recipe = remote.get_recipe(token, &s.uid).await?;
            to_value(&recipe)
        },
    )
    .await?;

    let mut commit = KindCommit::default();
    for row in diff.deleted {
        info!("Deleting recipe {} ({})", row.uid, row.name().unwrap_or("?"));
        commit.deleted.push(row.id);
    }

    commit.created = stream::iter(diff.created.into_iter().map(|(uid, data)| async move {
        let image = download_recipe_image(remote, &uid, &data).await.flatten();
        NewRecord { uid, data, image }
    }))
    .buffer_unordered(MAX_PARALLEL_FETCHES)
    .collect()
    .await;

    commit.updated = stream::iter(diff.updated.into_iter().map(|(old, data)| async move {
        let image = match download_recipe_image(remote, &old.uid, &data).await {
            Some(Some(bytes)) => ImageOp::Set(bytes),
            // no photo on the recipe anymore: never leave stale bytes behind
            None => ImageOp::Clear,
            // download failed: keep whatever we had rather than dropping it
            Some(None) => ImageOp::Keep,
        };
        RecordUpdate {
            id: old.id,
            data,
            image,
        }
    }))
    .buffer_unordered(MAX_PARALLEL_FETCHES)
    .collect()
    .await;

    Ok(commit)
}

/// Outer `None`: the recipe has no photo. `Some(None)`: it has one but the
/// download failed (logged, never fatal to the batch).
async fn download_recipe_image<S: RemoteApi + ?Sized>(
    remote: &S,
    uid: &str,
    data: &Value,
) -> Option<Option<Vec<u8>>> {
    let filename = data.get("photo").and_then(Value::as_str).filter(|s| !s.is_empty())?;
    let url = data.get("photo_url").and_then(Value::as_str).filter(|s| !s.is_empty())?;
    info!("Downloading photo {} for recipe {}", filename, uid);
    match remote.fetch_binary(url).await {
        Ok(bytes) => Some(Some(bytes)),
        Err(err) => {
            warn!("Image download for recipe {} failed: {}", uid, err);
            Some(None)
        }
    }
}

/// Photos: the listing carries the full metadata, so there is no expand
/// step. Binaries are fetched only for created photos; the listing omits
/// the download URL, so each new photo is re-fetched through its dedicated
/// endpoint first. Updates never re-download.
pub async fn sync_photos<S: RemoteApi + ?Sized>(
    remote: &S,
    token: &str,
    current: Vec<RecordRow>,
) -> Result<KindCommit, SyncError> {
    let incoming = remote.get_photos(token).await?;
    let diff = reconcile(
        current,
        incoming,
        |p| p.uid.as_str(),
        payload_changed,
        |p| async move { to_value(&p) },
    )
    .await?;

    let mut commit = KindCommit::default();
    for row in diff.deleted {
        info!("Deleting photo {} ({})", row.uid, row.name().unwrap_or("?"));
        commit.deleted.push(row.id);
    }
    for (old, data) in diff.updated {
        commit.updated.push(RecordUpdate {
            id: old.id,
            data,
            image: ImageOp::Keep,
        });
    }

    commit.created = stream::iter(diff.created.into_iter().map(|(uid, data)| async move {
        let (data, image) = download_new_photo(remote, token, &uid, data).await;
        NewRecord { uid, data, image }
    }))
    .buffer_unordered(MAX_PARALLEL_FETCHES)
    .collect()
    .await;

    Ok(commit)
}

/// Fetch a newly observed photo through its dedicated endpoint to obtain
/// the download URL, then pull the binary. The URL itself is not stored;
/// if the metadata drifted between listing and fetch, the fetched version
/// wins.
async fn download_new_photo<S: RemoteApi + ?Sized>(
    remote: &S,
    token: &str,
    uid: &str,
    listed: Value,
) -> (Value, Option<Vec<u8>>) {
    info!("Downloading photo {}", uid);
    let fetched = match remote.get_photo(token, uid).await {
        Ok(photo) => photo,
        Err(err) => {
            warn!("Fetching photo {} failed: {}", uid, err);
            return (listed, None);
        }
    };

    let url = fetched.photo_url.clone();
    let mut value = match serde_json::to_value(&fetched) {
        Ok(value) => value,
        Err(err) => {
            warn!("Encoding photo {} failed: {}", uid, err);
            return (listed, None);
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.remove("photo_url");
    }
    if value != listed {
        warn!("Photo {} metadata changed during sync", uid);
    }

    let image = match url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => match remote.fetch_binary(url).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("Image download for photo {} failed: {}", uid, err);
                None
            }
        },
        None => {
            warn!("Photo {} has no download url", uid);
            None
        }
    };
    (value, image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use larder_types::models::{PhotoPayload, RecipePayload};
    use serde_json::json;

    fn recipe(uid: &str, hash: &str, photo: Option<(&str, &str)>) -> RecipePayload {
        serde_json::from_value(json!({
            "uid": uid,
            "name": format!("recipe {uid}"),
            "hash": hash,
            "photo": photo.map(|(name, _)| name),
            "photo_url": photo.map(|(_, url)| url),
        }))
        .unwrap()
    }

    fn photo(uid: &str, recipe_uid: &str) -> PhotoPayload {
        serde_json::from_value(json!({
            "uid": uid,
            "name": format!("photo {uid}"),
            "filename": format!("{uid}.jpg"),
            "hash": format!("hash-{uid}"),
            "order_flag": 1,
            "recipe_uid": recipe_uid,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unchanged_recipe_hash_skips_the_detail_fetch() {
        let remote = FakeRemote::default();
        remote.add_recipe("me", recipe("A", "h1", None));
        remote.add_recipe("me", recipe("B", "h2", None));

        let stored = serde_json::to_value(recipe("A", "h1", None)).unwrap();
        let current = vec![RecordRow {
            id: 1,
            uid: "A".into(),
            data: stored,
        }];

        let commit = sync_recipes(&remote, "me", current).await.unwrap();

        assert_eq!(commit.created.len(), 1);
        assert_eq!(commit.created[0].uid, "B");
        assert!(commit.updated.is_empty());
        assert_eq!(
            remote.recipe_detail_fetches(),
            1,
            "only the new recipe may cost a detail fetch"
        );
    }

    #[tokio::test]
    async fn changed_recipe_downloads_its_image() {
        let remote = FakeRemote::default();
        remote.add_recipe("me", recipe("A", "h2", Some(("a.jpg", "http://cdn/a.jpg"))));
        remote.add_binary("http://cdn/a.jpg", vec![9, 9, 9]);

        let stored = serde_json::to_value(recipe("A", "h1", None)).unwrap();
        let current = vec![RecordRow {
            id: 1,
            uid: "A".into(),
            data: stored,
        }];

        let commit = sync_recipes(&remote, "me", current).await.unwrap();
        assert_eq!(commit.updated.len(), 1);
        assert!(matches!(&commit.updated[0].image, ImageOp::Set(bytes) if bytes == &vec![9, 9, 9]));
    }

    #[tokio::test]
    async fn recipe_without_photo_clears_stale_image() {
        let remote = FakeRemote::default();
        remote.add_recipe("me", recipe("A", "h2", None));

        let stored = serde_json::to_value(recipe("A", "h1", Some(("a.jpg", "http://cdn/a.jpg")))).unwrap();
        let current = vec![RecordRow {
            id: 1,
            uid: "A".into(),
            data: stored,
        }];

        let commit = sync_recipes(&remote, "me", current).await.unwrap();
        assert_eq!(commit.updated.len(), 1);
        assert!(matches!(commit.updated[0].image, ImageOp::Clear));
    }

    #[tokio::test]
    async fn failed_image_download_keeps_the_record() {
        let remote = FakeRemote::default();
        // URL registered nowhere: the binary fetch will fail
        remote.add_recipe("me", recipe("A", "h2", Some(("a.jpg", "http://cdn/gone.jpg"))));

        let stored = serde_json::to_value(recipe("A", "h1", None)).unwrap();
        let current = vec![RecordRow {
            id: 1,
            uid: "A".into(),
            data: stored,
        }];

        let commit = sync_recipes(&remote, "me", current).await.unwrap();
        assert_eq!(commit.updated.len(), 1, "record still commits");
        assert!(matches!(commit.updated[0].image, ImageOp::Keep));
    }

    #[tokio::test]
    async fn new_photos_download_updated_photos_do_not() {
        let remote = FakeRemote::default();
        let mut listed = photo("P1", "R1");
        remote.add_photo_with_url("me", listed.clone(), "http://cdn/p1.jpg");
        remote.add_binary("http://cdn/p1.jpg", vec![1]);

        // P2 exists locally with different metadata -> update path
        listed = photo("P2", "R1");
        remote.add_photo_with_url("me", listed.clone(), "http://cdn/p2.jpg");
        remote.add_binary("http://cdn/p2.jpg", vec![2]);
        let mut stored = serde_json::to_value(&listed).unwrap();
        stored["name"] = json!("old name");
        let current = vec![RecordRow {
            id: 5,
            uid: "P2".into(),
            data: stored,
        }];

        let commit = sync_photos(&remote, "me", current).await.unwrap();

        assert_eq!(commit.created.len(), 1);
        assert_eq!(commit.created[0].uid, "P1");
        assert_eq!(commit.created[0].image, Some(vec![1]));

        assert_eq!(commit.updated.len(), 1);
        assert!(
            matches!(commit.updated[0].image, ImageOp::Keep),
            "photo updates never re-download"
        );
        assert_eq!(remote.binary_fetches(), 1);
    }
}
