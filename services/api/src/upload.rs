//! Upload policy: what a relay endpoint accepts and where it is stored.

use crate::config::UploadConfig;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Name of the multipart field carrying the file
pub const FILE_FIELD: &str = "file";

const FALLBACK_EXTENSION: &str = "jpg";

/// Reasons an upload is refused before anything is stored
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadRejection {
    #[error("File is required")]
    MissingFile,

    #[error("Unsupported file type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Malformed multipart data: {0}")]
    Malformed(String),
}

impl UploadRejection {
    pub fn code(&self) -> &'static str {
        match self {
            UploadRejection::MissingFile => "FILE_REQUIRED",
            UploadRejection::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            UploadRejection::TooLarge { .. } => "FILE_TOO_LARGE",
            UploadRejection::Malformed(_) => "MALFORMED_MULTIPART",
        }
    }
}

/// Size and type limits for uploaded files
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl UploadPolicy {
    pub fn allows(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            allowed_mime_types: config.allowed_mime_types.clone(),
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        (&UploadConfig::default()).into()
    }
}

/// One accepted file, fully buffered
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Read exactly one `file` part from a multipart body, enforcing `policy`.
///
/// The type check runs on the declared content type before any bytes are
/// read, and reading stops as soon as the size limit is crossed.
pub async fn read_single_file(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
) -> Result<UploadedFile, UploadRejection> {
    let mut accepted: Option<UploadedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| rejection_from(e, policy))?
    {
        let is_file_field = field.name() == Some(FILE_FIELD);

        if !is_file_field {
            if field.file_name().is_some() {
                let name = field.name().unwrap_or_default().to_string();
                warn!(field = %name, "Unexpected file field in upload");
                return Err(UploadRejection::Malformed(format!("unexpected field '{name}'")));
            }
            continue;
        }

        if accepted.is_some() {
            warn!("More than one file in upload");
            return Err(UploadRejection::Malformed(
                "only one file may be uploaded".to_string(),
            ));
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_ascii_lowercase();

        if !policy.allows(&content_type) {
            warn!(mimetype = %content_type, "Image is invalid");
            return Err(UploadRejection::UnsupportedMediaType(content_type));
        }

        let file_name = field.file_name().map(str::to_string);
        let mut buffer = BytesMut::new();

        while let Some(chunk) = field.chunk().await.map_err(|e| rejection_from(e, policy))? {
            if buffer.len() + chunk.len() > policy.max_file_bytes {
                warn!(limit = policy.max_file_bytes, "Upload exceeds size limit");
                return Err(UploadRejection::TooLarge {
                    limit: policy.max_file_bytes,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        accepted = Some(UploadedFile {
            file_name,
            content_type,
            data: buffer.freeze(),
        });
    }

    accepted.ok_or_else(|| {
        warn!("Attempted to upload an image without a file");
        UploadRejection::MissingFile
    })
}

fn rejection_from(error: MultipartError, policy: &UploadPolicy) -> UploadRejection {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadRejection::TooLarge {
            limit: policy.max_file_bytes,
        }
    } else {
        warn!(error = %error.body_text(), "Malformed multipart data when trying to upload image");
        UploadRejection::Malformed(error.body_text())
    }
}

/// File extension for a stored object, falling back to `jpg`
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" => "jpeg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => FALLBACK_EXTENSION,
    }
}

/// Content type to serve for a stored key, derived from its extension
pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpeg" || ext == "jpg" => "image/jpeg",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Storage key for a new object: `{fileId}.{ext}` or `{owner}/{fileId}.{ext}`
pub fn object_key(owner: Option<&str>, file_id: &Uuid, extension: &str) -> String {
    match owner {
        Some(owner) => format!(
            "{owner}/{file_id}.{extension}",
            owner = sanitize_path_component(owner)
        ),
        None => format!("{file_id}.{extension}"),
    }
}

/// Sanitize a path component to prevent path traversal
pub(crate) fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpeg");
        assert_eq!(extension_for("IMAGE/PNG"), "png");
        assert_eq!(extension_for("image/jpg"), "jpg");
        assert_eq!(extension_for("application/x-unknown"), "jpg");
    }

    #[test]
    fn test_content_type_for_key() {
        assert_eq!(content_type_for_key("user-1/abc.jpeg"), "image/jpeg");
        assert_eq!(content_type_for_key("abc.JPG"), "image/jpeg");
        assert_eq!(content_type_for_key("abc.png"), "image/png");
        assert_eq!(content_type_for_key("no-extension"), "application/octet-stream");
    }

    #[test]
    fn test_object_key_with_owner() {
        let file_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            object_key(Some("user-123"), &file_id, "jpeg"),
            "user-123/550e8400-e29b-41d4-a716-446655440000.jpeg"
        );
    }

    #[test]
    fn test_object_key_without_owner() {
        let file_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            object_key(None, &file_id, "png"),
            "550e8400-e29b-41d4-a716-446655440000.png"
        );
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("user-123"), "user-123");
        assert_eq!(sanitize_path_component("../etc"), "___etc");
        assert_eq!(sanitize_path_component("a/b"), "a_b");
    }

    #[test]
    fn test_default_policy() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.max_file_bytes, 10 * 1024 * 1024);
        assert!(policy.allows("image/png"));
        assert!(policy.allows("image/jpg"));
        assert!(policy.allows("Image/JPEG"));
        assert!(!policy.allows("image/gif"));
        assert!(!policy.allows("application/pdf"));
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(UploadRejection::MissingFile.code(), "FILE_REQUIRED");
        assert_eq!(
            UploadRejection::TooLarge { limit: 1 }.code(),
            "FILE_TOO_LARGE"
        );
    }
}
