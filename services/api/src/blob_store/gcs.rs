use super::{collect_body, is_valid_key, BlobStore, BlobStream, PutObject};
use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument};

const GCS_INTEROP_ENDPOINT: &str = "https://storage.googleapis.com";

/// Cloud Storage connector speaking the S3-interoperable XML API.
///
/// Credentials are HMAC keys picked up from the standard AWS credential
/// chain; the caller's bearer token plays no part here.
pub struct GcsStore {
    client: S3Client,
    bucket: String,
}

impl GcsStore {
    /// Create a new Cloud Storage connector
    pub async fn new(config: &StorageConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let s3_config = configure(S3ConfigBuilder::from(&aws_config), config);
        let client = S3Client::from_conf(s3_config.build());

        info!(
            bucket = %config.bucket,
            endpoint = %endpoint(config),
            "Cloud Storage connector initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

fn endpoint(config: &StorageConfig) -> &str {
    config
        .endpoint_url
        .as_deref()
        .unwrap_or(GCS_INTEROP_ENDPOINT)
}

/// Point an S3 client at Cloud Storage or at the configured override
fn configure(builder: S3ConfigBuilder, config: &StorageConfig) -> S3ConfigBuilder {
    let builder = builder.endpoint_url(endpoint(config));

    // Emulators generally only understand path-style requests
    if config.force_path_style {
        builder.force_path_style(true)
    } else {
        builder
    }
}

#[async_trait]
impl BlobStore for GcsStore {
    fn backend(&self) -> &'static str {
        "gcs"
    }

    #[instrument(skip(self, object, _auth_token), fields(bucket = %self.bucket, key = %object.key))]
    async fn put(&self, object: PutObject, _auth_token: Option<&str>) -> bool {
        if !is_valid_key(&object.key) {
            error!("Refusing to put object with an empty key");
            return false;
        }

        debug!(content_length = object.content_length, "Putting object");

        let data = match collect_body(object.body).await {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "Failed to read object body");
                return false;
            }
        };

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .body(ByteStream::from(data))
            .content_type(&object.content_type)
            .set_content_length(i64::try_from(object.content_length).ok())
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Put object success");
                true
            }
            Err(e) => {
                error!(error = %e, "Error putting object");
                false
            }
        }
    }

    #[instrument(skip(self, _auth_token), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str, _auth_token: Option<&str>) -> Option<BlobStream> {
        if !is_valid_key(key) {
            return None;
        }

        debug!("Getting object");

        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let reader = output.body.into_async_read();
                Some(ReaderStream::new(reader).boxed())
            }
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    debug!("Object not found");
                } else {
                    error!(error = %e, "Error getting object");
                }
                None
            }
        }
    }

    #[instrument(skip(self, _auth_token), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str, _auth_token: Option<&str>) -> bool {
        if !is_valid_key(key) {
            return false;
        }

        info!("Deleting object");

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Delete object success");
                true
            }
            // The XML API answers 404 for keys that were never written
            Err(e)
                if e.raw_response()
                    .map(|response| response.status().as_u16() == 404)
                    .unwrap_or(false) =>
            {
                debug!("Object already absent");
                true
            }
            Err(e) => {
                error!(error = %e, "Error deleting object");
                false
            }
        }
    }
}
