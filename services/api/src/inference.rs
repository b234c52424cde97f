use crate::config::InferenceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

/// Errors from the AI service
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to create AI service client: {0}")]
    Configuration(String),

    #[error("AI service request timed out after {0:?}")]
    Timeout(Duration),

    #[error("AI service request failed: {0}")]
    Http(String),

    #[error("AI service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI service reported an error: {0}")]
    Service(String),

    #[error("Unexpected AI service response: {0}")]
    InvalidResponse(String),
}

/// Ingredient detection input: a stored image reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRequest {
    /// Storage key of the uploaded image
    pub image: String,
    /// Caller token, forwarded so the service can read the object
    #[serde(rename = "authToken")]
    pub auth_token: Option<String>,
}

/// Recipe generation input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeRequest {
    pub ingredients: Vec<String>,
    pub dietary_preferences: Vec<String>,
    pub allergies: Vec<String>,
    pub meal_type: String,
    pub cooking_time: String,
}

/// Envelope used by the AI service for every answer
#[derive(Debug, Deserialize)]
struct ServiceEnvelope {
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Operations the relay forwards to the AI service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Detect ingredients in a stored image
    async fn detect_ingredients(&self, request: DetectionRequest) -> Result<Value, InferenceError>;

    /// Generate a recipe from an ingredient list and preferences
    async fn generate_recipe(&self, request: RecipeRequest) -> Result<Value, InferenceError>;
}

/// HTTP client for the AI service
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Configuration(e.to_string()))?;

        info!(base_url = %config.base_url, "AI service client initialized");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn call<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Value, InferenceError> {
        let started = Instant::now();
        let result = self.send(path, body).await;

        metrics::histogram!("wastenot.inference.duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("wastenot.inference.failures", "operation" => operation).increment(1);
            warn!(operation, error = %e, "AI service call failed");
        }

        result
    }

    async fn send<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, InferenceError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.timeout)
                } else {
                    InferenceError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ServiceEnvelope = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope(envelope: ServiceEnvelope) -> Result<Value, InferenceError> {
    if let Some(error) = envelope.error {
        return Err(InferenceError::Service(error));
    }

    envelope
        .message
        .ok_or_else(|| InferenceError::InvalidResponse("missing 'message' field".to_string()))
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    #[instrument(skip(self, request), fields(image = %request.image))]
    async fn detect_ingredients(&self, request: DetectionRequest) -> Result<Value, InferenceError> {
        debug!("Sending ingredient detection request");
        self.call("detect_ingredients", "detect-ingredients", &request)
            .await
    }

    #[instrument(skip(self, request), fields(ingredient_count = request.ingredients.len()))]
    async fn generate_recipe(&self, request: RecipeRequest) -> Result<Value, InferenceError> {
        info!("Sending request to AI service for recipe generation");
        self.call("generate_recipe", "generate-recipe", &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> ServiceEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_detection_request_wire_format() {
        let request = DetectionRequest {
            image: "user-123/abc.jpeg".to_string(),
            auth_token: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "image": "user-123/abc.jpeg", "authToken": null })
        );
    }

    #[test]
    fn test_recipe_request_wire_format() {
        let request = RecipeRequest {
            ingredients: vec!["egg".to_string()],
            dietary_preferences: vec![],
            allergies: vec!["nuts".to_string()],
            meal_type: "lunch".to_string(),
            cooking_time: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "ingredients": ["egg"],
                "dietary_preferences": [],
                "allergies": ["nuts"],
                "meal_type": "lunch",
                "cooking_time": ""
            })
        );
    }

    #[test]
    fn test_envelope_message_is_returned() {
        let value = unwrap_envelope(envelope(json!({ "message": ["egg", "milk"] }))).unwrap();
        assert_eq!(value, json!(["egg", "milk"]));
    }

    #[test]
    fn test_envelope_error_wins() {
        match unwrap_envelope(envelope(json!({ "error": "model unavailable" }))) {
            Err(InferenceError::Service(message)) => assert_eq!(message, "model unavailable"),
            other => panic!("Expected service error, got {:?}", other),
        }
    }

    #[test]
    fn test_envelope_without_message_is_invalid() {
        assert!(matches!(
            unwrap_envelope(envelope(json!({}))),
            Err(InferenceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = HttpInferenceClient::new(&InferenceConfig {
            base_url: "http://localhost:8000/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.url("generate-recipe"), "http://localhost:8000/generate-recipe");
    }
}
