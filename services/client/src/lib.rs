//! WasteNot API Client
//!
//! Client side of the WasteNot relay. Wraps the upload, ingredient detection
//! and recipe generation endpoints with a bounded retry loop: a fixed number
//! of attempts, a fixed delay between them, a timeout per attempt and a
//! cancellation token covering the whole call.
//!
//! | operation  | attempts | delay | attempt timeout |
//! |------------|----------|-------|-----------------|
//! | detection  | 3        | 60 s  | 600 s           |
//! | generation | 1        |       | 120 s           |
//! | upload     | 1        |       | 120 s           |

pub mod api;
pub mod config;
pub mod error;
pub mod retry;

pub use api::{
    ApiClient, DetectIngredientsResponse, GenerateRecipeResponse, ImageFile, RecipeRequest,
    UploadImageResponse,
};
pub use config::{ClientConfig, ConfigError, RetryConfig};
pub use error::{InvokeError, Operation};
pub use retry::Retry;
