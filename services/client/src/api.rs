use crate::config::{ClientConfig, RetryConfig};
use crate::error::{InvokeError, Operation};
use crate::retry::Retry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

/// Image to send as the multipart `file` field
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl ImageFile {
    /// Read an image from disk, taking its content type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, InvokeError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| InvokeError::InvalidInput(format!("{}: {e}", path.display())))?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());

        let content_type = match path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            _ => DEFAULT_IMAGE_TYPE,
        };

        Ok(Self {
            file_name,
            content_type: content_type.to_string(),
            data: Bytes::from(data),
        })
    }

    /// Decode a `data:<mime>;base64,<payload>` URL as produced by web pickers
    pub fn from_data_url(url: &str, file_name: impl Into<String>) -> Result<Self, InvokeError> {
        let (header, payload) = url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .ok_or_else(|| InvokeError::InvalidInput("not a data URL".to_string()))?;

        let content_type = header
            .split(';')
            .next()
            .filter(|mime| !mime.is_empty())
            .unwrap_or(DEFAULT_IMAGE_TYPE);

        let data = STANDARD
            .decode(payload)
            .map_err(|e| InvokeError::InvalidInput(format!("invalid base64 payload: {e}")))?;

        Ok(Self {
            file_name: file_name.into(),
            content_type: content_type.to_string(),
            data: Bytes::from(data),
        })
    }

    fn form(&self) -> Result<Form, InvokeError> {
        let part = Part::bytes(self.data.to_vec())
            .file_name(self.file_name.clone())
            .mime_str(&self.content_type)
            .map_err(|e| InvokeError::InvalidInput(format!("invalid content type: {e}")))?;

        Ok(Form::new().part("file", part))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadImageResponse {
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectIngredientsResponse {
    #[serde(rename = "fileId")]
    pub file_id: String,
    pub ingredients: Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerateRecipeResponse {
    #[serde(default)]
    pub recipe: Value,
}

/// Recipe generation input, sent with snake_case keys
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipeRequest {
    pub ingredients: Vec<String>,
    pub dietary_preferences: Vec<String>,
    pub allergies: Vec<String>,
    pub meal_type: String,
    pub cooking_time: String,
}

/// Client for the WasteNot relay API
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Absolute `http...` paths pass through; anything else is joined onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http") {
            return path.to_string();
        }

        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.access_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Store an image without running detection
    #[instrument(skip(self, image, cancel), fields(file = %image.file_name))]
    pub async fn upload_image(
        &self,
        image: &ImageFile,
        cancel: &CancellationToken,
    ) -> Result<UploadImageResponse, InvokeError> {
        let url = self.endpoint("storage/upload-image");

        self.invoke(Operation::Upload, self.config.upload, cancel, || {
            let form = image.form()?;
            Ok(self.authorize(self.http.post(&url)).multipart(form))
        })
        .await
    }

    /// Upload an image and detect the ingredients it shows
    #[instrument(skip(self, image, cancel), fields(file = %image.file_name))]
    pub async fn detect_ingredients(
        &self,
        image: &ImageFile,
        cancel: &CancellationToken,
    ) -> Result<DetectIngredientsResponse, InvokeError> {
        let url = self.endpoint("ai/detect-ingredients");

        self.invoke(Operation::Detection, self.config.detection, cancel, || {
            let form = image.form()?;
            Ok(self.authorize(self.http.post(&url)).multipart(form))
        })
        .await
    }

    /// Generate a recipe from ingredients and preferences
    #[instrument(skip(self, request, cancel), fields(ingredient_count = request.ingredients.len()))]
    pub async fn generate_recipe(
        &self,
        request: &RecipeRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateRecipeResponse, InvokeError> {
        let url = self.endpoint("ai/generate-recipe");

        self.invoke(Operation::Generation, self.config.generation, cancel, || {
            Ok(self.http.post(&url).json(request))
        })
        .await
    }

    async fn invoke<T, F>(
        &self,
        operation: Operation,
        policy: RetryConfig,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<T, InvokeError>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder, InvokeError>,
    {
        Retry::new(policy)
            .run(operation, cancel, |attempt| {
                let request = build();
                async move {
                    debug!(%operation, attempt, "Sending request to API");
                    execute(operation, request?).await
                }
            })
            .await
    }
}

async fn execute<T: DeserializeOwned>(
    operation: Operation,
    request: RequestBuilder,
) -> Result<T, InvokeError> {
    let response = request
        .send()
        .await
        .map_err(|e| InvokeError::network(operation, e))?;

    let status = response.status();
    info!(%operation, status = status.as_u16(), "Response received");

    let text = response
        .text()
        .await
        .map_err(|e| InvokeError::network(operation, e))?;

    if !status.is_success() {
        return Err(InvokeError::Status {
            operation,
            status: status.as_u16(),
            body: text,
        });
    }

    let text = if text.trim().is_empty() { "{}" } else { &text };

    serde_json::from_str(text).map_err(|e| InvokeError::Decode {
        operation,
        message: e.to_string(),
    })
}
