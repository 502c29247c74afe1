//! S3-backed `PhotoBucket`. Works against AWS or any S3-compatible endpoint
//! (MinIO, R2, Supabase storage).
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::bucket::{BucketError, PhotoBucket};
use crate::config::Config;
use crate::keys::KeyService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl S3Config {
    /// Bucket settings from config, credentials from the keyring.
    /// None if backup storage isn't configured.
    pub fn from_config(config: &Config, keys: &KeyService) -> Option<Self> {
        let (access_key, secret_key) = keys.get_s3_credentials()?;
        Some(Self {
            bucket: config.cloud_bucket.clone()?,
            region: config
                .cloud_region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: config.cloud_endpoint.clone(),
            access_key,
            secret_key,
        })
    }

    pub fn validate(&self) -> Result<(), BucketError> {
        for (value, name) in [
            (&self.bucket, "Bucket name"),
            (&self.region, "Region"),
            (&self.access_key, "Access key"),
            (&self.secret_key, "Secret key"),
        ] {
            if value.trim().is_empty() {
                return Err(BucketError::Storage(format!("{} cannot be empty", name)));
            }
        }
        Ok(())
    }
}

fn is_not_found(msg: &str) -> bool {
    msg.contains("NoSuchKey")
        || msg.contains("NotFound")
        || msg.contains("not found")
        || msg.contains("404")
}

pub struct S3PhotoBucket {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3PhotoBucket {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        config.validate()?;
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "glow-photo-backup",
        );

        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        let endpoint = config
            .endpoint
            .map(|ep| ep.trim_end_matches('/').to_string());
        if let Some(ref ep) = endpoint {
            info!("Using custom S3 endpoint: {}", ep);
            builder = builder.endpoint_url(ep);
        }

        let aws_config = builder.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            region: config.region,
            endpoint,
        })
    }
}

#[async_trait]
impl PhotoBucket for S3PhotoBucket {
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<(), BucketError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/octet-stream")
            .body(data.into())
            .send()
            .await
            .map_err(|e| BucketError::Storage(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("{e:?}");
                if is_not_found(&msg) {
                    BucketError::NotFound(key.to_string())
                } else {
                    BucketError::Storage(format!("get {key}: {e}"))
                }
            })?;

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| BucketError::Storage(format!("read body for {key}: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| BucketError::Storage(format!("list {prefix}: {e}")))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| k.to_string()),
            );

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BucketError::Storage(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if is_not_found(&format!("{e:?}")) {
                    Ok(false)
                } else {
                    Err(BucketError::Storage(format!("head {key}: {e}")))
                }
            }
        }
    }

    fn url_for(&self, key: &str) -> String {
        match &self.endpoint {
            Some(ep) => format!("{}/{}/{}", ep, self.bucket, key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}
