//! A simplified S3 client that supports downloading objects to and uploading objects from files.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use crate::error::IngestError;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;
use url::Url;

/// Region used when credentials are given explicitly and no region is configured.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    /// Resolve credentials from the environment (variables, profile or execution role).
    Environment,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

/// S3 client object.
#[derive(Clone, Debug)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `endpoint`: Optional object storage API URL, for S3-compatible stores
    /// * `credentials`: Object storage account credentials
    /// * `region`: Optional region overriding the environment
    pub async fn new(
        endpoint: Option<&Url>,
        credentials: S3Credentials,
        region: Option<&str>,
    ) -> Self {
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(region.unwrap_or(DEFAULT_REGION).to_string()))
            }
            S3Credentials::Environment => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
                let builder = aws_sdk_s3::config::Builder::from(&sdk_config);
                match region {
                    Some(region) => builder.region(Region::new(region.to_string())),
                    None => builder,
                }
            }
        };
        let builder = match endpoint {
            Some(url) => builder.endpoint_url(url.to_string()).force_path_style(true),
            None => builder,
        };
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Downloads an object from object storage into a file and returns the number of bytes
    /// written
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    /// * `dest`: Path of the file to create
    pub async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<u64, IngestError> {
        let mut response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::Span::current())
            .await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        // Iterate over the streaming response, copying data into the file.
        while let Some(bytes) = response
            .body
            .try_next()
            .instrument(tracing::Span::current())
            .await?
        {
            file.write_all(&bytes).await?;
            written += u64::try_from(bytes.len())?;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Uploads a file to object storage
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    /// * `src`: Path of the file to upload
    pub async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
    ) -> Result<(), IngestError> {
        let body = ByteStream::from_path(src).await?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .instrument(tracing::Span::current())
            .await?;
        Ok(())
    }
}
