//! The pipeline seam.
//!
//! Transformation, quality control and output formatting are performed by an external pipeline.
//! This module defines the contract between the dispatcher and that pipeline, and an
//! implementation that runs it as a child process.

use crate::error::IngestError;
use crate::registry::PipelineSpec;
use crate::routing::Route;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

/// Number of trailing stderr lines kept in a failure report.
const STDERR_TAIL_LINES: usize = 20;

/// A single pipeline run.
#[derive(Debug)]
pub struct PipelineJob<'a> {
    /// Route the input was resolved to
    pub route: &'a Route,
    /// Configuration of the route
    pub spec: &'a PipelineSpec,
    /// Local copy of the raw input
    pub input: &'a Path,
    /// Directory the pipeline writes its artifacts to
    pub output_dir: &'a Path,
}

/// Trait for pipelines.
///
/// This forms the contract between the dispatcher and the pipeline implementation.
#[async_trait]
pub trait Pipeline: std::fmt::Debug + Send + Sync {
    /// Execute the pipeline.
    ///
    /// Returns the paths of the artifacts produced, all below `job.output_dir`.
    ///
    /// # Arguments
    ///
    /// * `job`: The input and configuration to run with
    async fn run(&self, job: &PipelineJob<'_>) -> Result<Vec<PathBuf>, IngestError>;
}

/// A pipeline run as an external command.
///
/// The command is invoked as
/// `<program> <args>... --pipeline-config <path> --storage-config <path> --output-dir <dir> <input>`
/// with `INGEST_PIPELINE`, `INGEST_LOCATION` and `INGEST_DATASTREAM` set in its environment.
/// Every regular file left in the output directory is an artifact.
#[derive(Clone, Debug)]
pub struct ExternalPipeline {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalPipeline {
    /// Create an external pipeline.
    ///
    /// # Arguments
    ///
    /// * `program`: Executable to run
    /// * `args`: Arguments placed before the standard arguments
    /// * `timeout`: Time after which the run is killed
    pub fn new(program: &str, args: &[String], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            timeout,
        }
    }

    fn command(&self, job: &PipelineJob<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--pipeline-config")
            .arg(&job.spec.pipeline_config_path)
            .arg("--storage-config")
            .arg(&job.spec.storage_config_path)
            .arg("--output-dir")
            .arg(job.output_dir)
            .arg(job.input)
            .env("INGEST_PIPELINE", &job.route.pipeline)
            .env("INGEST_LOCATION", &job.route.location)
            .env("INGEST_DATASTREAM", job.spec.datastream())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Pipeline for ExternalPipeline {
    async fn run(&self, job: &PipelineJob<'_>) -> Result<Vec<PathBuf>, IngestError> {
        tracing::debug!("Running {} for {}", self.program, job.route);
        let child = self
            .command(job)
            .spawn()
            .map_err(|source| IngestError::PipelineSpawn {
                command: self.program.clone(),
                source,
            })?;
        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(IngestError::PipelineTimeout {
                    pipeline: job.route.pipeline.clone(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!("{}", line);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(IngestError::PipelineFailed {
                pipeline: job.route.pipeline.clone(),
                status: output.status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }
        for line in stderr.lines() {
            tracing::info!("{}", line);
        }
        collect_artifacts(job.output_dir)
    }
}

/// Returns the last `n` lines of `text`.
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Returns every regular file below `dir`, in a stable order.
pub fn collect_artifacts(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut artifacts = vec![];
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            artifacts.push(entry.into_path());
        }
    }
    Ok(artifacts)
}
