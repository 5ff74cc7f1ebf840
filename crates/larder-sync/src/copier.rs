//! Cross-account copy: pull a partner's recipes and photos out of their
//! remote account and push them into the user's own remote account.
//!
//! Idempotency comes entirely from the uid gate; a recipe whose uid the
//! user's own listing already contains is never copied again, and the
//! engine keeps no bookkeeping of its own. Copied recipes land in a
//! two-level category tree ("Sync" → one child per partner) bootstrapped
//! lazily on the first actual copy of a run.

use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};

use larder_remote::RemoteApi;
use larder_types::models::{CategoryPayload, CopyAction, CopyReport, PhotoPayload, RecipeCopy};

use crate::error::SyncError;

pub const SYNC_ROOT_NAME: &str = "Sync";

/// Group a flat photo listing by owning recipe. The back-reference is a
/// soft join: uids of recipes we never see are fine here.
pub fn photos_by_recipe(photos: Vec<PhotoPayload>) -> BTreeMap<String, Vec<PhotoPayload>> {
    let mut grouped: BTreeMap<String, Vec<PhotoPayload>> = BTreeMap::new();
    for photo in photos {
        grouped.entry(photo.recipe_uid.clone()).or_default().push(photo);
    }
    grouped
}

/// Copy every not-yet-owned, un-trashed recipe of the partner into the
/// user's account, photos included. With `dry_run` every read and decision
/// still happens but nothing is created or uploaded; the report is the
/// same either way.
pub async fn copy_from_partner<S: RemoteApi + ?Sized>(
    remote: &S,
    user_token: &str,
    partner_token: &str,
    partner_name: &str,
    dry_run: bool,
) -> Result<CopyReport, SyncError> {
    let own_uids: HashSet<String> = remote
        .get_recipe_list(user_token)
        .await?
        .into_iter()
        .map(|r| r.uid)
        .collect();
    let partner_recipes = remote.get_recipe_list(partner_token).await?;
    let partner_photos = photos_by_recipe(remote.get_photos(partner_token).await?);

    let mut report = CopyReport {
        dry_run,
        ..Default::default()
    };
    let mut sync_cat_uid: Option<String> = None;

    for item in partner_recipes {
        if own_uids.contains(&item.uid) {
            info!("Recipe {} already synced", item.uid);
            report.recipes.push(RecipeCopy {
                uid: item.uid,
                name: None,
                action: CopyAction::AlreadyPresent,
            });
            continue;
        }

        let mut recipe = remote.get_recipe(partner_token, &item.uid).await?;
        if recipe.in_trash {
            info!("Recipe \"{}\" is trashed", recipe.name);
            report.recipes.push(RecipeCopy {
                uid: item.uid,
                name: Some(recipe.name),
                action: CopyAction::Trashed,
            });
            continue;
        }

        let cat_uid = match &sync_cat_uid {
            Some(uid) => uid.clone(),
            None => {
                let uid = ensure_sync_category(
                    remote,
                    user_token,
                    partner_name,
                    dry_run,
                    &mut report.created_categories,
                )
                .await?;
                sync_cat_uid = Some(uid.clone());
                uid
            }
        };

        recipe.clear_user_data();
        recipe.categories = vec![cat_uid];

        info!("Creating recipe \"{}\"", recipe.name);
        if !dry_run {
            let image = recipe_image(remote, &recipe).await;
            remote.create_recipe(user_token, &recipe, image).await?;
        }

        let mut photos = 0;
        for photo in partner_photos.get(&recipe.uid).map(Vec::as_slice).unwrap_or_default() {
            match copy_photo(remote, partner_token, user_token, &photo.uid, dry_run).await {
                Ok(()) => photos += 1,
                Err(err) => {
                    warn!(
                        "Skipping photo {} of recipe \"{}\": {}",
                        photo.uid, recipe.name, err
                    );
                }
            }
        }

        report.recipes.push(RecipeCopy {
            uid: recipe.uid.clone(),
            name: Some(recipe.name.clone()),
            action: CopyAction::Copied { photos },
        });
    }

    // Best-effort, and issued even when nothing was copied: the user's own
    // clients should re-check promptly either way.
    info!("Triggering client sync");
    if !dry_run {
        if let Err(err) = remote.notify_sync(user_token).await {
            warn!("Sync notification failed: {}", err);
        }
    }

    Ok(report)
}

/// Find or create the "Sync" root and the per-partner child below it, both
/// matched case-insensitively. Order flags account for categories created
/// earlier in this same call.
async fn ensure_sync_category<S: RemoteApi + ?Sized>(
    remote: &S,
    token: &str,
    partner_name: &str,
    dry_run: bool,
    created: &mut Vec<String>,
) -> Result<String, SyncError> {
    let categories = remote.get_categories(token).await?;
    let mut max_order_flag = categories.iter().map(|c| c.order_flag).max().unwrap_or(-1);

    let root = match categories
        .iter()
        .find(|c| c.name.to_lowercase() == SYNC_ROOT_NAME.to_lowercase())
    {
        Some(existing) => existing.clone(),
        None => {
            let root = CategoryPayload::new(SYNC_ROOT_NAME, max_order_flag + 1, None);
            max_order_flag += 1;
            info!("Creating top-level sync category \"{}\"", root.name);
            created.push(root.name.clone());
            if !dry_run {
                remote.create_category(token, &root).await?;
            }
            root
        }
    };

    let child = match categories.iter().find(|c| {
        c.parent_uid.as_deref() == Some(root.uid.as_str())
            && c.name.to_lowercase() == partner_name.to_lowercase()
    }) {
        Some(existing) => existing.clone(),
        None => {
            let child =
                CategoryPayload::new(partner_name, max_order_flag + 1, Some(root.uid.clone()));
            info!("Creating sync category \"{}\"", child.name);
            created.push(child.name.clone());
            if !dry_run {
                remote.create_category(token, &child).await?;
            }
            child
        }
    };

    Ok(child.uid)
}

async fn recipe_image<S: RemoteApi + ?Sized>(
    remote: &S,
    recipe: &larder_types::models::RecipePayload,
) -> Option<Vec<u8>> {
    recipe.photo.as_deref().filter(|p| !p.is_empty())?;
    let url = recipe.photo_url.as_deref().filter(|u| !u.is_empty())?;
    match remote.fetch_binary(url).await {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("Image download for recipe \"{}\" failed: {}", recipe.name, err);
            None
        }
    }
}

/// Re-fetch one partner photo to obtain its download URL, pull the binary
/// and upload both into the user's account.
async fn copy_photo<S: RemoteApi + ?Sized>(
    remote: &S,
    partner_token: &str,
    user_token: &str,
    uid: &str,
    dry_run: bool,
) -> Result<(), SyncError> {
    let photo = remote.get_photo(partner_token, uid).await?;
    info!("Creating photo \"{}\"", photo.name);
    if dry_run {
        return Ok(());
    }
    let image = match photo.photo_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Some(remote.fetch_binary(url).await?),
        None => None,
    };
    remote.create_photo(user_token, &photo, image).await?;
    Ok(())
}
