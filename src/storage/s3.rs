//! Amazon S3 backup medium (requires the `s3` feature).

use aws_sdk_s3::Client;

use crate::error::{DraftKeeperError, Result};
use crate::storage::BackupStorage;

/// Backup medium that keeps each key as an object in an Amazon S3 (or
/// S3-compatible) bucket.
///
/// Useful when emergency backups must survive the loss of the local disk
/// that also holds the primary store.
///
/// # Example
///
/// ```rust,ignore
/// use draft_keeper::{S3BackupStorage, Credentials, Region, S3Config};
///
/// let creds = Credentials::new("AKID", "SECRET", None, None, "my-app");
/// let config = S3Config::builder()
///     .region(Region::new("us-east-1"))
///     .credentials_provider(creds)
///     .build();
/// let storage = S3BackupStorage::from_conf(config, "draft-backups");
/// ```
pub struct S3BackupStorage {
    client: Client,
    bucket: String,
}

impl S3BackupStorage {
    /// Create a new `S3BackupStorage` with an existing [`Client`] and bucket name.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create an `S3BackupStorage` from an [`aws_sdk_s3::Config`].
    pub fn from_conf(config: aws_sdk_s3::Config, bucket: impl Into<String>) -> Self {
        let client = Client::from_conf(config);
        Self::new(client, bucket)
    }

    /// Create an `S3BackupStorage` using credentials and region from the AWS
    /// environment (env vars, config files, IMDS, etc.).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let client = Client::new(&config);
        Self::new(client, bucket)
    }
}

impl BackupStorage for S3BackupStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => return Err(DraftKeeperError::BackupStorage(Box::new(e))),
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(value.to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?;

        tracing::debug!(
            "Uploaded {} bytes to s3://{}/{}",
            value.len(),
            self.bucket,
            key
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 reports success for keys that do not exist.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }
}
