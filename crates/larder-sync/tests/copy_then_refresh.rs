/// Integration test: copy a partner's recipes into the user's remote
/// account, then refresh the user's local mirror and verify everything
/// (records, category tagging, image bytes) arrived intact.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use larder_db::Database;
use larder_remote::{RemoteApi, RemoteError};
use larder_sync::{copier, partners, refresh};
use larder_types::models::{
    CategoryPayload, Kind, PhotoPayload, RecipePayload, RecipeSummary, SyncCursor,
};

/// Minimal in-process recipe service: every account is a token-keyed bucket
/// of categories/recipes/photos, binaries live behind fake CDN urls, and
/// the per-kind counters bump on every write like the real service.
#[derive(Default)]
struct Service {
    inner: Mutex<Accounts>,
}

#[derive(Default)]
struct Accounts {
    categories: HashMap<String, Vec<CategoryPayload>>,
    recipes: HashMap<String, Vec<RecipePayload>>,
    photos: HashMap<String, Vec<PhotoPayload>>,
    binaries: HashMap<String, Vec<u8>>,
    counters: HashMap<String, SyncCursor>,
}

impl Service {
    fn bump(accounts: &mut Accounts, token: &str, kind: &str) {
        let cursor = accounts.counters.entry(token.to_string()).or_default();
        cursor.set(kind, cursor.get(kind) + 1);
    }

    fn seed_recipe(&self, token: &str, recipe: RecipePayload) {
        let mut accounts = self.inner.lock().unwrap();
        accounts.recipes.entry(token.to_string()).or_default().push(recipe);
        Self::bump(&mut accounts, token, "recipes");
    }

    fn seed_photo(&self, token: &str, photo: PhotoPayload, bytes: Vec<u8>) {
        let mut accounts = self.inner.lock().unwrap();
        if let Some(url) = &photo.photo_url {
            accounts.binaries.insert(url.clone(), bytes);
        }
        accounts.photos.entry(token.to_string()).or_default().push(photo);
        Self::bump(&mut accounts, token, "photos");
    }
}

#[async_trait]
impl RemoteApi for Service {
    async fn login(&self, email: &str, _password: &str) -> Result<String, RemoteError> {
        Ok(format!("token-{email}"))
    }

    async fn check_token(&self, _token: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn get_sync_cursor(&self, token: &str) -> Result<SyncCursor, RemoteError> {
        Ok(self.inner.lock().unwrap().counters.get(token).cloned().unwrap_or_default())
    }

    async fn get_categories(&self, token: &str) -> Result<Vec<CategoryPayload>, RemoteError> {
        let mut categories = self
            .inner
            .lock()
            .unwrap()
            .categories
            .get(token)
            .cloned()
            .unwrap_or_default();
        categories.sort_by_key(|c| c.order_flag);
        Ok(categories)
    }

    async fn create_category(&self, token: &str, category: &CategoryPayload) -> Result<(), RemoteError> {
        let mut accounts = self.inner.lock().unwrap();
        accounts
            .categories
            .entry(token.to_string())
            .or_default()
            .push(category.clone());
        Service::bump(&mut accounts, token, "categories");
        Ok(())
    }

    async fn get_recipe_list(&self, token: &str) -> Result<Vec<RecipeSummary>, RemoteError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .recipes
            .get(token)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|r| RecipeSummary {
                uid: r.uid,
                hash: r.hash,
            })
            .collect())
    }

    async fn get_recipe(&self, token: &str, uid: &str) -> Result<RecipePayload, RemoteError> {
        self.inner
            .lock()
            .unwrap()
            .recipes
            .get(token)
            .and_then(|recipes| recipes.iter().find(|r| r.uid == uid))
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn create_recipe(
        &self,
        token: &str,
        recipe: &RecipePayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        let mut accounts = self.inner.lock().unwrap();
        if let (Some(url), Some(bytes)) = (&recipe.photo_url, image) {
            accounts.binaries.insert(url.clone(), bytes);
        }
        let recipes = accounts.recipes.entry(token.to_string()).or_default();
        recipes.retain(|r| r.uid != recipe.uid);
        recipes.push(recipe.clone());
        Service::bump(&mut accounts, token, "recipes");
        Ok(())
    }

    async fn get_photos(&self, token: &str) -> Result<Vec<PhotoPayload>, RemoteError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .photos
            .get(token)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut p| {
                p.photo_url = None;
                p
            })
            .collect())
    }

    async fn get_photo(&self, token: &str, uid: &str) -> Result<PhotoPayload, RemoteError> {
        self.inner
            .lock()
            .unwrap()
            .photos
            .get(token)
            .and_then(|photos| photos.iter().find(|p| p.uid == uid))
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn create_photo(
        &self,
        token: &str,
        photo: &PhotoPayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        let mut accounts = self.inner.lock().unwrap();
        // uploads keep their source url so the new owner's sync can fetch it
        if let (Some(url), Some(bytes)) = (&photo.photo_url, image) {
            accounts.binaries.insert(url.clone(), bytes);
        }
        accounts
            .photos
            .entry(token.to_string())
            .or_default()
            .push(photo.clone());
        Service::bump(&mut accounts, token, "photos");
        Ok(())
    }

    async fn notify_sync(&self, _token: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.inner
            .lock()
            .unwrap()
            .binaries
            .get(url)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }
}

fn recipe(uid: &str, name: &str) -> RecipePayload {
    serde_json::from_value(serde_json::json!({
        "uid": uid,
        "name": name,
        "hash": format!("hash-{uid}"),
        "in_trash": false,
        "categories": ["SOME-CAT"],
        "on_grocery_list": "2023-05-01",
        "ingredients": "flour\nwater",
    }))
    .unwrap()
}

fn photo(uid: &str, recipe_uid: &str, url: &str) -> PhotoPayload {
    serde_json::from_value(serde_json::json!({
        "uid": uid,
        "name": uid,
        "filename": format!("{uid}.jpg"),
        "hash": format!("hash-{uid}"),
        "order_flag": 1,
        "recipe_uid": recipe_uid,
        "photo_url": url,
    }))
    .unwrap()
}

fn open_db(tag: &str) -> Database {
    let path = std::env::temp_dir().join(format!(
        "larder_e2e_{}_{}.sqlite",
        std::process::id(),
        tag
    ));
    let _ = std::fs::remove_file(&path);
    Database::open(&path).unwrap()
}

#[tokio::test]
async fn copy_from_partner_then_refresh_mirror() {
    let service = Service::default();
    let db = open_db("copy_refresh");

    // Two local accounts, partnered up.
    let alice = larder_sync::account::login_or_create(&service, &db, "alice@example.com", "pw")
        .await
        .unwrap();
    let bob = larder_sync::account::login_or_create(&service, &db, "bob@example.com", "pw")
        .await
        .unwrap();
    partners::request_partner(&db, &alice, &bob.partner_code).unwrap();
    partners::approve_partner(&db, &bob, &alice.id).unwrap();

    // Bob's remote account holds one recipe with one photo.
    service.seed_recipe(&bob.remote_token, recipe("R1", "Pierogi"));
    service.seed_photo(
        &bob.remote_token,
        photo("P1", "R1", "http://cdn/p1.jpg"),
        vec![7, 7, 7],
    );

    // Copy Bob's recipes into Alice's remote account.
    let report = copier::copy_from_partner(
        &service,
        &alice.remote_token,
        &bob.remote_token,
        &bob.name,
        false,
    )
    .await
    .unwrap();
    assert_eq!(report.copied_count(), 1);
    assert_eq!(report.created_categories, vec!["Sync", "bob"]);

    // Refresh Alice's local mirror from her remote account.
    let outcome = refresh::refresh(&service, &db, &alice).await.unwrap();
    assert!(outcome.categories && outcome.recipes && outcome.photos);

    let categories = db.records(&alice.id, Kind::Categories).unwrap();
    assert_eq!(categories.len(), 2);
    let sync_root = categories.iter().find(|c| c.name() == Some("Sync")).unwrap();
    let bob_cat = categories.iter().find(|c| c.name() == Some("bob")).unwrap();
    assert_eq!(
        bob_cat.data["parent_uid"].as_str(),
        Some(sync_root.uid.as_str())
    );

    let recipes = db.records(&alice.id, Kind::Recipes).unwrap();
    assert_eq!(recipes.len(), 1);
    assert_eq!(recipes[0].name(), Some("Pierogi"));
    // copied recipe was tagged into the partner category, user data stripped
    assert_eq!(
        recipes[0].data["categories"].as_array().unwrap()[0].as_str(),
        Some(bob_cat.uid.as_str())
    );
    assert!(recipes[0].data["on_grocery_list"].is_null());

    let photos = db.records(&alice.id, Kind::Photos).unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(
        db.get_record_image(&alice.id, Kind::Photos, photos[0].id).unwrap(),
        Some(vec![7, 7, 7]),
        "photo binary landed in the mirror"
    );

    // A second refresh with no remote changes is a no-op.
    let alice = db.get_user_by_id(&alice.id).unwrap().unwrap();
    let outcome = refresh::refresh(&service, &db, &alice).await.unwrap();
    assert!(!outcome.categories && !outcome.recipes && !outcome.photos);

    // A second copy run finds everything already present.
    let report = copier::copy_from_partner(
        &service,
        &alice.remote_token,
        &bob.remote_token,
        &bob.name,
        false,
    )
    .await
    .unwrap();
    assert_eq!(report.copied_count(), 0);
    assert!(report.created_categories.is_empty());
}
