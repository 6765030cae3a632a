//! Error handling.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::PathBuf;
use strum_macros::Display;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;
use tracing::{event, Level};

/// Ingest error type
///
/// This type encapsulates the various errors that may occur while routing and ingesting a file.
/// Each variant results in either a skipped or a failed record.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A configuration document could not be read
    #[error("failed to read configuration file {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration document is not valid YAML for its type
    #[error("failed to parse configuration file {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A configuration document failed validation
    #[error("configuration file {path} is not valid")]
    ConfigValidation {
        path: PathBuf,
        #[source]
        source: validator::ValidationErrors,
    },

    /// Error inflating a compressed input
    #[error("failed to decompress {name}")]
    Decompression {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The same identity was registered twice in the routing document
    #[error("{kind} {name} is registered more than once")]
    DuplicateRegistration { kind: &'static str, name: String },

    /// An ingest task panicked or was cancelled
    #[error("ingest task failed")]
    IngestTask(#[from] JoinError),

    /// Insufficient scratch space to hold an input
    #[error("insufficient scratch space to ingest object ({requested} > {total} bytes)")]
    InsufficientScratchSpace { requested: u64, total: u64 },

    /// The destination string could not be understood
    #[error("invalid destination {destination}")]
    InvalidDestination { destination: String },

    /// An object key could not be decoded
    #[error("invalid object key {key}")]
    InvalidKey { key: String },

    /// A routing pattern failed to compile
    #[error("invalid pattern {pattern} for {name}")]
    InvalidPattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Filesystem error in the scratch area
    #[error("scratch filesystem error")]
    Io(#[from] std::io::Error),

    /// A pipeline matched the file name but a location did not
    #[error("no location matches file {file} for pipeline {pipeline}")]
    NoLocationMatch { file: String, pipeline: String },

    /// The object named by an event no longer exists
    #[error("object {key} not found")]
    ObjectNotFound { key: String },

    /// A (pipeline, location) pair resolved without a registered configuration
    #[error("no configuration registered for pipeline {pipeline} at location {location}")]
    NoConfiguration { pipeline: String, location: String },

    /// No pipeline matches the file name
    #[error("no pipeline matches file {file}")]
    NoPipelineMatch { file: String },

    /// The pipeline exited unsuccessfully
    #[error("pipeline {pipeline} failed with {status}: {stderr}")]
    PipelineFailed {
        pipeline: String,
        status: String,
        stderr: String,
    },

    /// The pipeline process could not be started
    #[error("failed to start pipeline command {command}")]
    PipelineSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline did not finish in time
    #[error("pipeline {pipeline} timed out after {seconds} seconds")]
    PipelineTimeout { pipeline: String, seconds: u64 },

    /// Error reading object data from S3
    #[error("error receiving object from S3 storage")]
    S3ByteStream(#[from] ByteStreamError),

    /// Error while retrieving an object from S3
    #[error("error retrieving object from S3 storage")]
    S3GetObject(#[from] SdkError<GetObjectError>),

    /// Error while storing an object in S3
    #[error("error storing object in S3 storage")]
    S3PutObject(#[from] SdkError<PutObjectError>),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// A pipeline refers to a location that was never declared
    #[error("pipeline {pipeline} refers to undeclared location {location}")]
    UndeclaredLocation { pipeline: String, location: String },

    /// Error walking the pipeline output directory
    #[error("failed to collect pipeline outputs")]
    WalkDir(#[from] walkdir::Error),
}

/// What happens to a record that produced an error.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Disposition {
    /// Nothing to do for this record; retrying would not help.
    Skip,
    /// The record failed and the invocation should report an error.
    Fail,
}

/// Report describing an error, suitable for inclusion in an invocation response.
///
/// Implements serde (de)serialise.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,

    /// Skip or fail
    pub disposition: Disposition,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `disposition`: What happens to the record
    /// * `error`: The error that occurred
    fn new<E>(disposition: Disposition, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport {
            message,
            caused_by,
            disposition,
        }
    }

    /// Return a report for a record that should be skipped
    fn skip<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(Disposition::Skip, error)
    }

    /// Return a report for a record that failed
    fn fail<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(Disposition::Fail, error)
    }

    /// Whether the record failed.
    pub fn is_failure(&self) -> bool {
        self.disposition == Disposition::Fail
    }
}

impl From<IngestError> for ErrorReport {
    /// Convert from an `IngestError` into an `ErrorReport`.
    fn from(error: IngestError) -> Self {
        Self::from(&error)
    }
}

impl From<&IngestError> for ErrorReport {
    /// Convert from an `IngestError` reference into an `ErrorReport`.
    fn from(error: &IngestError) -> Self {
        let report = match error {
            // Unroutable files are expected in a shared bucket.
            IngestError::NoPipelineMatch { file: _ }
            | IngestError::NoLocationMatch {
                file: _,
                pipeline: _,
            }
            // The object was removed between the event and the download.
            | IngestError::ObjectNotFound { key: _ } => Self::skip(error),

            // Configuration and processing failures
            IngestError::ConfigRead { .. }
            | IngestError::ConfigParse { .. }
            | IngestError::ConfigValidation { .. }
            | IngestError::Decompression { .. }
            | IngestError::DuplicateRegistration { .. }
            | IngestError::IngestTask(_)
            | IngestError::InsufficientScratchSpace { .. }
            | IngestError::InvalidDestination { .. }
            | IngestError::InvalidKey { .. }
            | IngestError::InvalidPattern { .. }
            | IngestError::Io(_)
            | IngestError::NoConfiguration { .. }
            | IngestError::PipelineFailed { .. }
            | IngestError::PipelineSpawn { .. }
            | IngestError::PipelineTimeout { .. }
            | IngestError::S3ByteStream(_)
            | IngestError::S3PutObject(_)
            | IngestError::SemaphoreAcquireError(_)
            | IngestError::TryFromInt(_)
            | IngestError::UndeclaredLocation { .. }
            | IngestError::WalkDir(_) => Self::fail(error),

            IngestError::S3GetObject(sdk_error) => {
                // Tailor the report based on the specific SdkError variant.
                match sdk_error {
                    // These are generic SdkError variants.
                    SdkError::ConstructionFailure(_)
                    | SdkError::DispatchFailure(_)
                    | SdkError::ResponseError(_)
                    | SdkError::TimeoutError(_) => Self::fail(error),

                    // This is a more specific ServiceError variant, with GetObjectError as the
                    // inner error.
                    SdkError::ServiceError(get_obj_error) => {
                        let get_obj_error = get_obj_error.err();
                        match get_obj_error {
                            // The object was removed between the event and the download.
                            GetObjectError::NoSuchKey(_) => Self::skip(error),

                            GetObjectError::InvalidObjectState(_) => Self::fail(error),

                            // Quite a lot of error cases end up as unhandled. Attempt to determine
                            // the error from the code.
                            _ => match get_obj_error.code() {
                                Some("NoSuchKey") => Self::skip(error),
                                _ => Self::fail(error),
                            },
                        }
                    }

                    // The enum is marked as non-exhaustive
                    _ => Self::fail(error),
                }
            }
        };

        // Log failures.
        if report.is_failure() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        } else {
            event!(Level::WARN, "{}", error.to_string());
        }

        report
    }
}
