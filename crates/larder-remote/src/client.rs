use std::io::Write;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use larder_types::models::{CategoryPayload, PhotoPayload, RecipePayload, RecipeSummary, SyncCursor};

use crate::error::RemoteError;

pub const DEFAULT_API_BASE: &str = "https://www.paprikaapp.com/api/v2";

#[derive(serde::Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: String,
}

/// The remote operations the sync engine and copier consume. `RemoteClient`
/// is the production implementation; tests substitute in-memory fakes.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<String, RemoteError>;
    async fn check_token(&self, token: &str) -> Result<(), RemoteError>;
    async fn get_sync_cursor(&self, token: &str) -> Result<SyncCursor, RemoteError>;
    async fn get_categories(&self, token: &str) -> Result<Vec<CategoryPayload>, RemoteError>;
    async fn create_category(&self, token: &str, category: &CategoryPayload) -> Result<(), RemoteError>;
    async fn get_recipe_list(&self, token: &str) -> Result<Vec<RecipeSummary>, RemoteError>;
    async fn get_recipe(&self, token: &str, uid: &str) -> Result<RecipePayload, RemoteError>;
    async fn create_recipe(
        &self,
        token: &str,
        recipe: &RecipePayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError>;
    async fn get_photos(&self, token: &str) -> Result<Vec<PhotoPayload>, RemoteError>;
    async fn get_photo(&self, token: &str, uid: &str) -> Result<PhotoPayload, RemoteError>;
    async fn create_photo(
        &self,
        token: &str,
        photo: &PhotoPayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError>;
    async fn notify_sync(&self, token: &str) -> Result<(), RemoteError>;
    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Stateless HTTP client for the recipe service. Credentials are passed per
/// call; the client holds no account context.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: String,
}

impl RemoteClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_result<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T, RemoteError> {
        debug!("GET {}", path);
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;
        let envelope: Envelope<T> = parse_envelope(resp).await?;
        envelope
            .result
            .ok_or_else(|| RemoteError::Rejection("response envelope had no result".into()))
    }

    async fn post_multipart(&self, token: &str, path: &str, form: Form) -> Result<(), RemoteError> {
        debug!("POST {}", path);
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        // Uploads answer with an empty-result envelope on success.
        let _: Envelope<serde_json::Value> = parse_envelope(resp).await?;
        Ok(())
    }
}

/// Map a response to the error taxonomy and decode the envelope.
/// 401 means the credential itself was refused; other non-success statuses
/// are transport failures unless the body carries a structured error.
async fn parse_envelope<T: DeserializeOwned>(resp: Response) -> Result<Envelope<T>, RemoteError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        let message = resp
            .json::<Envelope<serde_json::Value>>()
            .await
            .ok()
            .and_then(|e| e.error)
            .map(|e| e.message)
            .unwrap_or_else(|| "unauthorized".into());
        return Err(RemoteError::InvalidToken(message));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound);
    }
    let resp = resp.error_for_status()?;
    let envelope: Envelope<T> = resp.json().await?;
    if let Some(error) = envelope.error {
        return Err(RemoteError::Rejection(error.message));
    }
    Ok(envelope)
}

/// Gzip a JSON payload for the `data` part of an upload. The categories
/// endpoint expects a batch and gets the single object wrapped in a
/// one-element array.
fn gzip_json<T: Serialize>(value: &T, wrap_list: bool) -> Result<Vec<u8>, RemoteError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if wrap_list {
        encoder.write_all(b"[").map_err(io_to_encode)?;
        encoder.write_all(&json).map_err(io_to_encode)?;
        encoder.write_all(b"]").map_err(io_to_encode)?;
    } else {
        encoder.write_all(&json).map_err(io_to_encode)?;
    }
    encoder.finish().map_err(io_to_encode)
}

fn io_to_encode(err: std::io::Error) -> RemoteError {
    RemoteError::Encode(serde_json::Error::io(err))
}

fn upload_form<T: Serialize>(
    value: &T,
    wrap_list: bool,
    image: Option<(String, Vec<u8>)>,
) -> Result<Form, RemoteError> {
    let mut form = Form::new().part("data", Part::bytes(gzip_json(value, wrap_list)?));
    if let Some((filename, bytes)) = image {
        form = form.part("photo_upload", Part::bytes(bytes).file_name(filename));
    }
    Ok(form)
}

#[async_trait]
impl RemoteApi for RemoteClient {
    async fn login(&self, email: &str, password: &str) -> Result<String, RemoteError> {
        #[derive(serde::Deserialize)]
        struct LoginResult {
            token: String,
        }
        let resp = self
            .http
            .post(self.url("/account/login/"))
            .form(&[("email", email), ("password", password)])
            .send()
            .await?;
        let envelope: Envelope<LoginResult> = parse_envelope(resp).await?;
        envelope
            .result
            .map(|r| r.token)
            .ok_or_else(|| RemoteError::Rejection("login response had no token".into()))
    }

    async fn check_token(&self, token: &str) -> Result<(), RemoteError> {
        let _: SyncCursor = self.get_result(token, "/sync/status/").await?;
        Ok(())
    }

    async fn get_sync_cursor(&self, token: &str) -> Result<SyncCursor, RemoteError> {
        self.get_result(token, "/sync/status/").await
    }

    async fn get_categories(&self, token: &str) -> Result<Vec<CategoryPayload>, RemoteError> {
        let mut categories: Vec<CategoryPayload> = self.get_result(token, "/sync/categories/").await?;
        categories.sort_by_key(|c| c.order_flag);
        Ok(categories)
    }

    async fn create_category(&self, token: &str, category: &CategoryPayload) -> Result<(), RemoteError> {
        let form = upload_form(category, true, None)?;
        self.post_multipart(token, "/sync/categories/", form).await
    }

    async fn get_recipe_list(&self, token: &str) -> Result<Vec<RecipeSummary>, RemoteError> {
        self.get_result(token, "/sync/recipes/").await
    }

    async fn get_recipe(&self, token: &str, uid: &str) -> Result<RecipePayload, RemoteError> {
        self.get_result(token, &format!("/sync/recipe/{uid}/")).await
    }

    async fn create_recipe(
        &self,
        token: &str,
        recipe: &RecipePayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        let upload = match (&recipe.photo, image) {
            (Some(filename), Some(bytes)) => Some((filename.clone(), bytes)),
            _ => None,
        };
        let form = upload_form(recipe, false, upload)?;
        self.post_multipart(token, &format!("/sync/recipe/{}/", recipe.uid), form)
            .await
    }

    async fn get_photos(&self, token: &str) -> Result<Vec<PhotoPayload>, RemoteError> {
        self.get_result(token, "/sync/photos/").await
    }

    async fn get_photo(&self, token: &str, uid: &str) -> Result<PhotoPayload, RemoteError> {
        self.get_result(token, &format!("/sync/photo/{uid}/")).await
    }

    async fn create_photo(
        &self,
        token: &str,
        photo: &PhotoPayload,
        image: Option<Vec<u8>>,
    ) -> Result<(), RemoteError> {
        let upload = image.map(|bytes| (photo.filename.clone(), bytes));
        let form = upload_form(photo, false, upload)?;
        self.post_multipart(token, &format!("/sync/photo/{}/", photo.uid), form)
            .await
    }

    async fn notify_sync(&self, token: &str) -> Result<(), RemoteError> {
        let resp = self
            .http
            .post(self.url("/sync/notify/"))
            .bearer_auth(token)
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    /// Binary payloads live on a CDN; the URL is pre-signed, no auth header.
    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let resp = self.http.get(url).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}
