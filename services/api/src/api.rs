use crate::auth::{AuthenticatedUser, Caller};
use crate::blob_store::{stream_from_bytes, BlobStore, PutObject};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::inference::{DetectionRequest, InferenceService, RecipeRequest};
use crate::upload::{
    content_type_for_key, extension_for, object_key, read_single_file, UploadPolicy,
    UploadRejection, UploadedFile,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Room for multipart boundaries and part headers on top of the file limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub inference: Arc<dyn InferenceService>,
    pub upload_policy: Arc<UploadPolicy>,
    pub verifier: Option<Arc<crate::auth::TokenVerifier>>,
    /// Return the storage key next to the file id
    pub include_key: bool,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    #[serde(rename = "fileId")]
    pub file_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Ingredient detection response
#[derive(Debug, Serialize)]
pub struct DetectIngredientsResponse {
    #[serde(rename = "fileId")]
    pub file_id: Uuid,
    pub ingredients: Value,
}

/// Recipe generation response
#[derive(Debug, Serialize)]
pub struct GenerateRecipeResponse {
    pub recipe: Value,
}

/// An object written by the relay
struct StoredUpload {
    file_id: Uuid,
    key: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = state.upload_policy.max_file_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/storage/upload-image", post(upload_image))
        .route(
            "/api/storage/images/*key",
            get(get_image).delete(delete_image),
        )
        .route("/api/ai/detect-ingredients", post(detect_ingredients))
        .route("/api/ai/generate-recipe", post(generate_recipe))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wastenot-api"
    }))
}

/// Validate one multipart file and write it through the connector
async fn accept_upload(
    state: &AppState,
    caller: &Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StoredUpload, ApiError> {
    let file = match multipart {
        Ok(mut multipart) => read_single_file(&mut multipart, &state.upload_policy).await,
        Err(rejection) => Err(UploadRejection::Malformed(rejection.body_text())),
    }
    .map_err(|rejection| {
        metrics::counter!("wastenot.uploads.rejected", "code" => rejection.code()).increment(1);
        ApiError::from(rejection)
    })?;

    store_upload(state, caller, file).await
}

async fn store_upload(
    state: &AppState,
    caller: &Caller,
    file: UploadedFile,
) -> Result<StoredUpload, ApiError> {
    let file_id = Uuid::new_v4();
    let key = object_key(
        caller.owner.as_deref(),
        &file_id,
        extension_for(&file.content_type),
    );

    info!(
        key = %key,
        file_name = ?file.file_name,
        size_bytes = file.size(),
        backend = state.store.backend(),
        "Uploading file"
    );

    let object = PutObject {
        key: key.clone(),
        content_length: file.size() as u64,
        content_type: file.content_type,
        body: stream_from_bytes(file.data),
    };

    if !state.store.put(object, caller.token.as_deref()).await {
        metrics::counter!("wastenot.storage.failures").increment(1);
        return Err(ApiError::StorageFailed);
    }

    metrics::counter!("wastenot.uploads.stored").increment(1);

    Ok(StoredUpload { file_id, key })
}

/// Store an uploaded image
#[instrument(skip_all, fields(owner = ?caller.owner))]
async fn upload_image(
    State(state): State<AppState>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadImageResponse>), ApiError> {
    let stored = accept_upload(&state, &caller, multipart).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadImageResponse {
            file_id: stored.file_id,
            key: state.include_key.then_some(stored.key),
        }),
    ))
}

/// Store an uploaded image and relay it to ingredient detection
#[instrument(skip_all, fields(owner = ?caller.owner))]
async fn detect_ingredients(
    State(state): State<AppState>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<DetectIngredientsResponse>), ApiError> {
    let stored = accept_upload(&state, &caller, multipart).await?;

    let ingredients = state
        .inference
        .detect_ingredients(DetectionRequest {
            image: stored.key,
            auth_token: caller.token,
        })
        .await
        .map_err(ApiError::DetectionFailed)?;

    Ok((
        StatusCode::CREATED,
        Json(DetectIngredientsResponse {
            file_id: stored.file_id,
            ingredients,
        }),
    ))
}

/// Inbound recipe body. Optional fields accept null; `ingredients` is
/// checked by hand so any wrong shape gets the same answer.
#[derive(Debug, Deserialize)]
struct GenerateRecipeBody {
    #[serde(default)]
    ingredients: Value,
    #[serde(default)]
    dietary_preferences: Option<Vec<String>>,
    #[serde(default)]
    allergies: Option<Vec<String>>,
    #[serde(default)]
    meal_type: Option<String>,
    #[serde(default)]
    cooking_time: Option<String>,
}

impl GenerateRecipeBody {
    fn parse(body: Value) -> Result<RecipeRequest, ApiError> {
        if !body.is_object() {
            return Err(ApiError::IngredientsRequired);
        }

        let body: GenerateRecipeBody =
            serde_json::from_value(body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;

        let ingredients: Vec<String> = serde_json::from_value(body.ingredients)
            .map_err(|_| ApiError::IngredientsRequired)?;
        if ingredients.is_empty() {
            return Err(ApiError::IngredientsRequired);
        }

        Ok(RecipeRequest {
            ingredients,
            dietary_preferences: body.dietary_preferences.unwrap_or_default(),
            allergies: body.allergies.unwrap_or_default(),
            meal_type: body.meal_type.unwrap_or_default(),
            cooking_time: body.cooking_time.unwrap_or_default(),
        })
    }
}

/// Relay a recipe generation request
#[instrument(skip_all)]
async fn generate_recipe(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<GenerateRecipeResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let request = GenerateRecipeBody::parse(body)?;

    let recipe = state
        .inference
        .generate_recipe(request)
        .await
        .map_err(ApiError::GenerationFailed)?;

    Ok(Json(GenerateRecipeResponse { recipe }))
}

/// Stream a stored image back to its owner
#[instrument(skip(state, user), fields(sub = %user.claims.sub))]
async fn get_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    if !user.owns(&key) {
        return Err(ApiError::Forbidden);
    }

    let body = state
        .store
        .get(&key, Some(&user.token))
        .await
        .ok_or(ApiError::NotFound)?;

    Ok((
        [(header::CONTENT_TYPE, content_type_for_key(&key))],
        Body::from_stream(body),
    )
        .into_response())
}

/// Delete a stored image owned by the caller
#[instrument(skip(state, user), fields(sub = %user.claims.sub))]
async fn delete_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !user.owns(&key) {
        return Err(ApiError::Forbidden);
    }

    if !state.store.delete(&key, Some(&user.token)).await {
        metrics::counter!("wastenot.storage.failures").increment(1);
        return Err(ApiError::DeleteFailed);
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Start the relay API server and serve until `shutdown` resolves.
///
/// In-flight requests are allowed to finish once `shutdown` fires.
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(address = %addr, "Relay API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    info!("Relay API server stopped accepting connections");

    Ok(())
}
