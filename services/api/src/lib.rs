//! WasteNot Relay API
//!
//! Upload and inference relay for the WasteNot mobile app. The service accepts
//! food photos from the app, stores them in object storage under the caller's
//! namespace, and forwards ingredient detection and recipe generation requests
//! to the AI service.
//!
//! ## Features
//!
//! - **Validated Uploads**: One file per request, PNG/JPEG only, 10 MiB cap,
//!   checked before anything reaches a storage connector
//! - **Pluggable Storage**: GCS through its S3-interoperable API, Supabase
//!   Storage over REST, or an in-memory store for local runs
//! - **AI Relay**: Stored image keys and recipe preferences are forwarded to
//!   the AI service and its answers passed back unchanged
//! - **Owner-Scoped Access**: Fetch and delete routes require a verified
//!   token whose subject owns the key prefix
//!
//! ## Architecture
//!
//! ```text
//! Mobile App                  Relay API                  Object Storage
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ upload-image │──────────▶│ Upload       │─────────▶│ {sub}/       │
//! │ detect       │           │ Policy       │          │   {id}.{ext} │
//! │ recipe       │           └──────────────┘          └──────────────┘
//! └──────────────┘                  │                         ▲
//!        │                          ▼                         │
//!        │                   ┌──────────────┐                 │
//!        │                   │ Blob Store   │─────────────────┘
//!        │                   │ Connector    │
//!        │                   └──────────────┘
//!        │                          │ key + token
//!        ▼                          ▼
//! ┌──────────────┐           ┌──────────────┐
//! │ Bearer       │           │ AI Service   │
//! │ Token        │           │ Client       │
//! └──────────────┘           └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod inference;
pub mod upload;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthenticatedUser, Caller, TokenVerifier, UntrustedClaims};
pub use blob_store::{BlobStore, GcsStore, MemoryStore, PutObject, SupabaseStore};
pub use config::Config;
pub use error::ApiError;
pub use inference::{HttpInferenceClient, InferenceError, InferenceService, RecipeRequest};
pub use upload::{UploadPolicy, UploadRejection};
