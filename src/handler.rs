//! AWS Lambda handler for S3 event notifications.
//!
//! Each record of an event is ingested concurrently. The invocation fails if any record failed,
//! so that the platform's retry and dead letter handling applies.

use crate::app::App;
use crate::dispatcher::IngestReport;
use crate::error::{ErrorReport, IngestError};
use crate::metrics::{self, RECORDS};
use crate::storage;

use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::Display;

/// Prefix of the event names that trigger an ingest.
const OBJECT_CREATED: &str = "ObjectCreated:";

/// Outcome of a single record.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    Ingested,
    Skipped,
    Failed,
}

/// Report on a single record, included in the invocation response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecordOutcome {
    /// Location of the raw object
    pub object: String,
    /// What happened to it
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl RecordOutcome {
    /// Build an outcome from the result of an ingest.
    pub fn from_result(object: String, result: Result<IngestReport, IngestError>) -> Self {
        let outcome = match result {
            Ok(report) => Self {
                object,
                status: RecordStatus::Ingested,
                ingest: Some(report),
                error: None,
            },
            Err(error) => {
                let report = ErrorReport::from(error);
                Self {
                    object,
                    status: if report.is_failure() {
                        RecordStatus::Failed
                    } else {
                        RecordStatus::Skipped
                    },
                    ingest: None,
                    error: Some(report),
                }
            }
        };
        RECORDS
            .with_label_values(&[&outcome.status.to_string()])
            .inc();
        outcome
    }

    /// An outcome for a record that is not an object creation.
    fn ignored(object: String) -> Self {
        RECORDS
            .with_label_values(&[&RecordStatus::Skipped.to_string()])
            .inc();
        Self {
            object,
            status: RecordStatus::Skipped,
            ingest: None,
            error: None,
        }
    }
}

/// Response of an invocation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct IngestSummary {
    /// One outcome per record, in event order
    pub records: Vec<RecordOutcome>,
}

impl IngestSummary {
    /// Number of records with the given status.
    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// An S3 object referenced by an event record.
#[derive(Debug, PartialEq)]
struct ObjectRef {
    bucket: String,
    key: String,
    size: Option<u64>,
}

impl ObjectRef {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Extract the object of a record, decoding its key.
fn object_ref(record: &S3EventRecord) -> Result<ObjectRef, IngestError> {
    let missing = || IngestError::InvalidKey {
        key: String::new(),
    };
    let bucket = record.s3.bucket.name.clone().ok_or_else(missing)?;
    let key = record.s3.object.key.as_deref().ok_or_else(missing)?;
    let size = record
        .s3
        .object
        .size
        .and_then(|size| u64::try_from(size).ok());
    Ok(ObjectRef {
        bucket,
        key: storage::decode_key(key)?,
        size,
    })
}

/// Whether a record announces a new object.
fn is_object_created(record: &S3EventRecord) -> bool {
    record
        .event_name
        .as_deref()
        .is_some_and(|name| name.starts_with(OBJECT_CREATED))
}

/// Location of a record's object with its key as received, for records that are not decoded.
fn describe_raw(record: &S3EventRecord) -> String {
    format!(
        "s3://{}/{}",
        record.s3.bucket.name.as_deref().unwrap_or_default(),
        record.s3.object.key.as_deref().unwrap_or_default()
    )
}

/// Ingest every object created by an event.
pub async fn process_event(app: Arc<App>, event: S3Event) -> IngestSummary {
    let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; event.records.len()];
    let mut tasks = vec![];
    for (index, record) in event.records.iter().enumerate() {
        if !is_object_created(record) {
            tracing::debug!(
                "Ignoring {} event for {}",
                record.event_name.as_deref().unwrap_or("unnamed"),
                describe_raw(record)
            );
            outcomes[index] = Some(RecordOutcome::ignored(describe_raw(record)));
            continue;
        }
        let object = match object_ref(record) {
            Ok(object) => object,
            Err(error) => {
                let object = describe_raw(record);
                outcomes[index] = Some(RecordOutcome::from_result(object, Err(error)));
                continue;
            }
        };
        let app = app.clone();
        let describe = object.describe();
        // Tasks run concurrently from here; results are collected in event order.
        let task = tokio::spawn(async move {
            let source = app.input_store(&object.bucket);
            app.dispatcher
                .ingest(source.as_ref(), &object.key, object.size)
                .await
        });
        tasks.push((index, describe, task));
    }
    for (index, object, task) in tasks {
        let result = task.await.unwrap_or_else(|error| Err(error.into()));
        outcomes[index] = Some(RecordOutcome::from_result(object, result));
    }
    IngestSummary {
        records: outcomes.into_iter().flatten().collect(),
    }
}

/// Lambda entry point.
pub async fn handler(app: Arc<App>, event: LambdaEvent<S3Event>) -> Result<IngestSummary, Error> {
    tracing::info!(
        "Invocation {} with {} records",
        event.context.request_id,
        event.payload.records.len()
    );
    let summary = process_event(app, event.payload).await;
    tracing::debug!("{}", metrics::render());
    let failed = summary.count(RecordStatus::Failed);
    tracing::info!(
        "Ingested {}, skipped {}, failed {}",
        summary.count(RecordStatus::Ingested),
        summary.count(RecordStatus::Skipped),
        failed
    );
    if failed > 0 {
        return Err(Error::from(format!(
            "{} of {} records failed",
            failed,
            summary.records.len()
        )));
    }
    Ok(summary)
}
