use super::{collect_body, is_valid_key, BlobStore, BlobStream, PutObject};
use crate::config::StorageConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::json;
use std::io;
use tracing::{debug, error, info, instrument};

/// Supabase Storage connector over its REST API.
///
/// Requests carry the caller's bearer token when one is supplied so that
/// bucket policies apply to the end user; otherwise the anon key is used.
pub struct SupabaseStore {
    client: Client,
    base_url: Url,
    anon_key: String,
    bucket: String,
}

impl SupabaseStore {
    /// Create a new Supabase Storage connector
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let supabase_url = config
            .supabase_url
            .as_deref()
            .context("storage.supabase_url is not set")?;
        let anon_key = config
            .supabase_anon_key
            .clone()
            .context("storage.supabase_anon_key is not set")?;

        let base_url = Url::parse(supabase_url).context("Invalid Supabase URL")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Supabase URL cannot be used as a base: {supabase_url}"));
        }

        info!(
            bucket = %config.bucket,
            url = %base_url,
            "Supabase Storage connector initialized"
        );

        Ok(Self {
            client: Client::new(),
            base_url,
            anon_key,
            bucket: config.bucket.clone(),
        })
    }

    /// `{base}/storage/v1/object/{bucket}[/{key segments}]`
    fn object_url(&self, key: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "object", self.bucket.as_str()]);
            if let Some(key) = key {
                segments.extend(key.split('/'));
            }
        }
        url
    }

    fn authorize(&self, request: RequestBuilder, auth_token: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(auth_token.unwrap_or(&self.anon_key))
    }
}

#[async_trait]
impl BlobStore for SupabaseStore {
    fn backend(&self) -> &'static str {
        "supabase"
    }

    #[instrument(skip(self, object, auth_token), fields(bucket = %self.bucket, key = %object.key))]
    async fn put(&self, object: PutObject, auth_token: Option<&str>) -> bool {
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

        let request = self
            .client
            .post(self.object_url(Some(&object.key)))
            .header(reqwest::header::CONTENT_TYPE, &object.content_type)
            .header("x-upsert", "true")
            .body(data);

        match self.authorize(request, auth_token).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Put object success");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Error putting object");
                false
            }
            Err(e) => {
                error!(error = %e, "Error putting object");
                false
            }
        }
    }

    #[instrument(skip(self, auth_token), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str, auth_token: Option<&str>) -> Option<BlobStream> {
        if !is_valid_key(key) {
            return None;
        }

        debug!("Getting object");

        let request = self.client.get(self.object_url(Some(key)));

        match self.authorize(request, auth_token).send().await {
            Ok(response) if response.status().is_success() => Some(
                response
                    .bytes_stream()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
                    .boxed(),
            ),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Error getting object");
                None
            }
            Err(e) => {
                error!(error = %e, "Error getting object");
                None
            }
        }
    }

    #[instrument(skip(self, auth_token), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str, auth_token: Option<&str>) -> bool {
        if !is_valid_key(key) {
            return false;
        }

        info!("Deleting object");

        // Bulk removal answers 200 with the removed entries, possibly none
        let request = self
            .client
            .delete(self.object_url(None))
            .json(&json!({ "prefixes": [key] }));

        match self.authorize(request, auth_token).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Delete object success");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Error deleting object");
                false
            }
            Err(e) => {
                error!(error = %e, "Error deleting object");
                false
            }
        }
    }
}
