//! Application state and the local (non-Lambda) entry points.

use crate::cli::CommandLineArgs;
use crate::dispatcher::{Dispatcher, IngestReport};
use crate::error::{ErrorReport, IngestError};
use crate::handler::{IngestSummary, RecordOutcome};
use crate::pipeline::ExternalPipeline;
use crate::registry::PipelineRegistry;
use crate::resource_manager::ResourceManager;
use crate::routing::{self, Route};
use crate::s3_client::{S3Client, S3Credentials};
use crate::storage::{Destination, LocalStore, ObjectStore, S3Store};

use expanduser::expanduser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where raw objects named in storage events are read from.
#[derive(Debug)]
enum InputStores {
    /// Buckets of an S3 service
    S3(S3Client),
    /// Subdirectories of a local directory, one per bucket
    Local(PathBuf),
}

/// Shared application state.
#[derive(Debug)]
pub struct App {
    /// Dispatcher
    pub dispatcher: Dispatcher,

    /// Input stores
    inputs: InputStores,
}

/// Route of a local file, as printed in route-only mode.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RouteReport {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datastream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Build an S3 client from the command line arguments.
async fn s3_client(args: &CommandLineArgs) -> S3Client {
    let credentials = match (&args.s3_access_key, &args.s3_secret_key) {
        (Some(access_key), Some(secret_key)) => S3Credentials::access_key(access_key, secret_key),
        _ => S3Credentials::Environment,
    };
    S3Client::new(
        args.s3_endpoint.as_ref(),
        credentials,
        args.s3_region.as_deref(),
    )
    .await
}

impl App {
    /// Create an [App] from the command line arguments.
    ///
    /// Loads and validates every configuration document; any error here is fatal.
    pub async fn new(args: &CommandLineArgs) -> Result<Self, IngestError> {
        let config_root = expanduser(&args.config_root)?;
        let registry = PipelineRegistry::load(&config_root, &args.routing_file)?;
        tracing::info!(
            "Loaded {} pipelines and {} locations from {}",
            registry.routing().pipelines().len(),
            registry.routing().locations().len(),
            config_root.display()
        );

        let (destination, client) = match Destination::parse(&args.destination)? {
            Destination::S3 { bucket, prefix } => {
                let client = s3_client(args).await;
                let store = S3Store::new(client.clone(), &bucket, &prefix);
                (Box::new(store) as Box<dyn ObjectStore>, Some(client))
            }
            Destination::Local(path) => {
                (Box::new(LocalStore::new(&path)) as Box<dyn ObjectStore>, None)
            }
        };

        let inputs = if args.is_lambda() {
            let client = match client {
                Some(client) => client,
                None => s3_client(args).await,
            };
            InputStores::S3(client)
        } else {
            InputStores::Local(PathBuf::from("."))
        };

        let pipeline = ExternalPipeline::new(
            &args.pipeline_command,
            &args.pipeline_args,
            Duration::from_secs(args.pipeline_timeout),
        );
        let task_limit = args.task_limit.or_else(|| Some(num_cpus::get()));
        let resource_manager = ResourceManager::new(task_limit, args.scratch_limit);
        let scratch_dir = expanduser(&args.scratch_dir)?;

        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(pipeline),
            destination,
            resource_manager,
            &scratch_dir,
            args.archive_raw,
        );
        Ok(Self { dispatcher, inputs })
    }

    /// Store holding the objects of `bucket`.
    pub fn input_store(&self, bucket: &str) -> Box<dyn ObjectStore> {
        match &self.inputs {
            InputStores::S3(client) => Box::new(S3Store::new(client.clone(), bucket, "")),
            InputStores::Local(root) => Box::new(LocalStore::new(&root.join(bucket))),
        }
    }

    /// Ingest local files, one after another.
    pub async fn ingest_files(&self, files: &[PathBuf]) -> IngestSummary {
        let mut records = vec![];
        for file in files {
            let result = self.ingest_file(file).await;
            records.push(RecordOutcome::from_result(
                file.display().to_string(),
                result,
            ));
        }
        IngestSummary { records }
    }

    async fn ingest_file(&self, file: &Path) -> Result<IngestReport, IngestError> {
        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::InvalidKey {
                key: file.display().to_string(),
            })?;
        let source = LocalStore::new(file.parent().unwrap_or(Path::new("")));
        let size = tokio::fs::metadata(file).await.ok().map(|m| m.len());
        self.dispatcher.ingest(&source, name, size).await
    }

    /// Resolve the route of local files without ingesting them.
    pub fn route_files(&self, files: &[PathBuf]) -> Vec<RouteReport> {
        files
            .iter()
            .map(|file| {
                let file = file.display().to_string();
                match self.dispatcher.registry().resolve(routing::file_name(&file)) {
                    Ok((route, spec)) => RouteReport {
                        file,
                        route: Some(route),
                        datastream: Some(spec.datastream()),
                        error: None,
                    },
                    Err(error) => RouteReport {
                        file,
                        route: None,
                        datastream: None,
                        error: Some(error.into()),
                    },
                }
            })
            .collect()
    }

    /// An [App] reading bucket objects below `buckets` and writing to a local directory.
    #[cfg(test)]
    pub(crate) fn local(
        config_root: &Path,
        buckets: &Path,
        destination: &Path,
        scratch_dir: &Path,
        pipeline: Arc<dyn crate::pipeline::Pipeline>,
    ) -> Result<Self, IngestError> {
        let registry = PipelineRegistry::load(config_root, Path::new("routing.yml"))?;
        let dispatcher = Dispatcher::new(
            registry,
            pipeline,
            Box::new(LocalStore::new(destination)),
            ResourceManager::new(Some(2), None),
            scratch_dir,
            false,
        );
        Ok(Self {
            dispatcher,
            inputs: InputStores::Local(buckets.to_path_buf()),
        })
    }
}
