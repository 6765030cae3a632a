//! Object stores that raw files are fetched from and artifacts are written to.

use crate::error::IngestError;
use crate::s3_client::S3Client;

use async_trait::async_trait;
use expanduser::expanduser;
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// A store of objects addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// Copy the object at `key` into the file `dest`.
    ///
    /// Returns the number of bytes written.
    async fn fetch(&self, key: &str, dest: &Path) -> Result<u64, IngestError>;

    /// Copy the file `src` to the object at `key`.
    async fn store(&self, src: &Path, key: &str) -> Result<(), IngestError>;

    /// A human readable location of `key`, for logs and reports.
    fn describe(&self, key: &str) -> String;
}

/// Join a key onto an optional prefix.
fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// An S3 bucket, optionally restricted to a key prefix.
#[derive(Clone, Debug)]
pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Create an S3 store.
    pub fn new(client: S3Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<u64, IngestError> {
        tracing::debug!("Downloading {}", self.describe(key));
        self.client
            .download_object(&self.bucket, &join_key(&self.prefix, key), dest)
            .await
    }

    async fn store(&self, src: &Path, key: &str) -> Result<(), IngestError> {
        tracing::debug!("Uploading {}", self.describe(key));
        self.client
            .upload_object(&self.bucket, &join_key(&self.prefix, key), src)
            .await
    }

    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, join_key(&self.prefix, key))
    }
}

/// A directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a local store rooted at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Path of `key` below the root. Keys may not escape the root.
    fn path(&self, key: &str) -> Result<PathBuf, IngestError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(IngestError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<u64, IngestError> {
        let src = self.path(key)?;
        match tokio::fs::copy(src, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(IngestError::ObjectNotFound {
                    key: key.to_string(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn store(&self, src: &Path, key: &str) -> Result<(), IngestError> {
        let dest = self.path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, dest).await?;
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}

/// Where artifacts are written.
#[derive(Clone, Debug, PartialEq)]
pub enum Destination {
    /// `s3://bucket/prefix`
    S3 { bucket: String, prefix: String },
    /// A local directory
    Local(PathBuf),
}

impl Destination {
    /// Parse a destination: an `s3://` URL or a local path (`~` is expanded).
    pub fn parse(destination: &str) -> Result<Self, IngestError> {
        let invalid = || IngestError::InvalidDestination {
            destination: destination.to_string(),
        };
        if destination.starts_with("s3://") {
            let url = Url::parse(destination).map_err(|_| invalid())?;
            let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
            Ok(Destination::S3 {
                bucket: bucket.to_string(),
                prefix: url.path().trim_matches('/').to_string(),
            })
        } else if destination.is_empty() {
            Err(invalid())
        } else {
            let path = expanduser(destination).map_err(|_| invalid())?;
            Ok(Destination::Local(path))
        }
    }
}

/// Decode an object key as it appears in an S3 event notification.
///
/// Keys are URL encoded, with spaces encoded as `+`.
pub fn decode_key(key: &str) -> Result<String, IngestError> {
    percent_decode_str(&key.replace('+', " "))
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| IngestError::InvalidKey {
            key: key.to_string(),
        })
}
