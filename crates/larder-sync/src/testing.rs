//! In-memory stand-in for the remote service, keyed by token. Counts the
//! calls the engine's optimizations are supposed to avoid.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use larder_db::Database;
use larder_remote::{RemoteApi, RemoteError};
use larder_types::models::{CategoryPayload, PhotoPayload, RecipePayload, RecipeSummary, SyncCursor};

pub fn test_db() -> Database {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "larder_sync_test_{}_{}.sqlite",
        std::process::id(),
        n
    ));
    let _ = std::fs::remove_file(&path);
    Database::open(&path).unwrap()
}

pub fn seed_user(db: &Database, id: &str) -> larder_db::models::UserRow {
    db.create_user(
        id,
        &format!("{id}@example.com"),
        id,
        "hash",
        &format!("token-{id}"),
        &format!("code-{id}"),
    )
    .unwrap()
}

#[derive(Default)]
struct State {
    cursors: HashMap<String, SyncCursor>,
    categories: HashMap<String, Vec<CategoryPayload>>,
    recipes: HashMap<String, Vec<RecipePayload>>,
    photos: HashMap<String, Vec<(PhotoPayload, Option<String>)>>,
    binaries: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    detail_fetches: AtomicUsize,
    binary_fetch_count: AtomicUsize,
    create_count: AtomicUsize,
    notify_count: AtomicUsize,
    photo_listing_fails: std::sync::atomic::AtomicBool,
}

impl FakeRemote {
    /// Make the next photo listing calls fail, as a network outage would.
    pub fn fail_photo_listing(&self) {
        self.photo_listing_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_cursor(&self, token: &str, cursor: SyncCursor) {
        self.state.lock().unwrap().cursors.insert(token.to_string(), cursor);
    }

    pub fn add_category(&self, token: &str, category: CategoryPayload) {
        self.state
            .lock()
            .unwrap()
            .categories
            .entry(token.to_string())
            .or_default()
            .push(category);
    }

    pub fn add_recipe(&self, token: &str, recipe: RecipePayload) {
        self.state
            .lock()
            .unwrap()
            .recipes
            .entry(token.to_string())
            .or_default()
            .push(recipe);
    }

    pub fn add_photo_with_url(&self, token: &str, photo: PhotoPayload, url: &str) {
        self.state
            .lock()
            .unwrap()
            .photos
            .entry(token.to_string())
            .or_default()
            .push((photo, Some(url.to_string())));
    }

    pub fn add_binary(&self, url: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().binaries.insert(url.to_string(), bytes);
    }

    pub fn recipe_detail_fetches(&self) -> usize {
        self.detail_fetches.load(Ordering::SeqCst)
    }

    pub fn binary_fetches(&self) -> usize {
        self.binary_fetch_count.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn notify_calls(&self) -> usize {
        self.notify_count.load(Ordering::SeqCst)
    }

    pub fn categories_of(&self, token: &str) -> Vec<CategoryPayload> {
        self.state.lock().unwrap().categories.get(token).cloned().unwrap_or_default()
    }

    pub fn recipes_of(&self, token: &str) -> Vec<RecipePayload> {
        self.state.lock().unwrap().recipes.get(token).cloned().unwrap_or_default()
    }

    pub fn replace_recipes(&self, token: &str, recipes: Vec<RecipePayload>) {
        self.state.lock().unwrap().recipes.insert(token.to_string(), recipes);
    }

    pub fn photos_of(&self, token: &str) -> Vec<PhotoPayload> {
        self.state
            .lock()
            .unwrap()
            .photos
            .get(token)
            .map(|photos| photos.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn login(&self, email: &str, _password: &str) -> Result<String, RemoteError> {
        Ok(format!("token-{email}"))
    }

    async fn check_token(&self, _token: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn get_sync_cursor(&self, token: &str) -> Result<SyncCursor, RemoteError> {
        Ok(self.state.lock().unwrap().cursors.get(token).cloned().unwrap_or_default())
    }

    async fn get_categories(&self, token: &str) -> Result<Vec<CategoryPayload>, RemoteError> {
        let mut categories = self.categories_of(token);
        categories.sort_by_key(|c| c.order_flag);
        Ok(categories)
    }

    async fn create_category(&self, token: &str, category: &CategoryPayload) -> Result<(), RemoteError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        self.add_category(token, category.clone());
        Ok(())
    }

    async fn get_recipe_list(&self, token: &str) -> Result<Vec<RecipeSummary>, RemoteError> {
        Ok(self
            .recipes_of(token)
            .into_iter()
            .map(|r| RecipeSummary {
                uid: r.uid,
                hash: r.hash,
            })
            .collect())
    }

    async fn get_recipe(&self, token: &str, uid: &str) -> Result<RecipePayload, RemoteError> {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        self.recipes_of(token)
            .into_iter()
            .find(|r| r.uid == uid)
            .ok_or(RemoteError::NotFound)
    }

    async fn create_recipe(
        &self,
        token: &str,
        recipe: &RecipePayload,
        _image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let recipes = state.recipes.entry(token.to_string()).or_default();
        recipes.retain(|r| r.uid != recipe.uid);
        recipes.push(recipe.clone());
        Ok(())
    }

    async fn get_photos(&self, token: &str) -> Result<Vec<PhotoPayload>, RemoteError> {
        if self.photo_listing_fails.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejection("photo listing unavailable".into()));
        }
        // the listing never exposes download urls
        Ok(self.photos_of(token))
    }

    async fn get_photo(&self, token: &str, uid: &str) -> Result<PhotoPayload, RemoteError> {
        let state = self.state.lock().unwrap();
        state
            .photos
            .get(token)
            .and_then(|photos| photos.iter().find(|(p, _)| p.uid == uid))
            .map(|(p, url)| {
                let mut photo = p.clone();
                photo.photo_url = url.clone();
                photo
            })
            .ok_or(RemoteError::NotFound)
    }

    async fn create_photo(
        &self,
        token: &str,
        photo: &PhotoPayload,
        _image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let mut listed = photo.clone();
        listed.photo_url = None;
        let mut state = self.state.lock().unwrap();
        state
            .photos
            .entry(token.to_string())
            .or_default()
            .push((listed, None));
        Ok(())
    }

    async fn notify_sync(&self, _token: &str) -> Result<(), RemoteError> {
        self.notify_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.binary_fetch_count.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .binaries
            .get(url)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }
}
