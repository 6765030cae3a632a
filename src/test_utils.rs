use crate::error::IngestError;
use crate::pipeline::{Pipeline, PipelineJob};
use crate::registry::PipelineSpec;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub(crate) const ROUTING_YML: &str = r#"
pipelines:
  - name: buoy
    patterns:
      - '^buoy\.z0[0-9]\.00\.\d{8}\.\d{6}\.[a-z]+\.csv(\.gz)?$'
    storage_config: buoy/storage_config.yml
    configs:
      humboldt: buoy/pipeline_config_humboldt.yml
      morro: buoy/pipeline_config_morro.yml
locations:
  - name: humboldt
    patterns:
      - '\.z05\.'
  - name: morro
    patterns:
      - '\.z06\.'
"#;

pub(crate) const PIPELINE_CONFIG_HUMBOLDT_YML: &str = r#"
pipeline:
  type: Ingest
  location_id: humboldt
  dataset_name: buoy
  qualifier: z05
  data_level: a1

dataset_definition:
  attributes:
    title: Buoy surface measurements
    conventions: "ME Data Pipeline Standards: Version 1.0"
  dimensions:
    time:
      length: unlimited
  variables:
    time:
      input:
        name: DataTimeStamp
        converter:
          classname: StringTimeConverter
          parameters:
            time_format: "%Y-%m-%d %H:%M:%S"
      dims: [time]
      type: long
      attrs:
        units: seconds since 1970-01-01T00:00:00
    wave_height:
      input:
        name: "Significant Wave Height (m)"
        units: m
      dims: [time]
      type: float
      attrs:
        long_name: Significant wave height
        units: m

quality_management:
  manage_missing_coordinates:
    checker:
      classname: CheckMissing
    handlers:
      - classname: FailPipeline
    variables:
      - COORDS
  manage_missing_values:
    checker:
      classname: CheckMissing
    variables:
      - DATA_VARS
"#;

pub(crate) const STORAGE_CONFIG_YML: &str = r#"
storage:
  classname: FileSystem
  parameters:
    retain_input_files: true

file_handlers:
  input:
    csv:
      file_pattern: '.*\.csv'
      classname: CsvHandler
  output:
    netcdf:
      file_extension: .nc
      classname: NetCdfHandler
"#;

/// Write a complete configuration root into `dir`.
pub(crate) fn write_config_root(dir: &Path) {
    let buoy = dir.join("buoy");
    std::fs::create_dir_all(&buoy).unwrap();
    std::fs::write(dir.join("routing.yml"), ROUTING_YML).unwrap();
    std::fs::write(buoy.join("storage_config.yml"), STORAGE_CONFIG_YML).unwrap();
    std::fs::write(
        buoy.join("pipeline_config_humboldt.yml"),
        PIPELINE_CONFIG_HUMBOLDT_YML,
    )
    .unwrap();
    std::fs::write(
        buoy.join("pipeline_config_morro.yml"),
        PIPELINE_CONFIG_HUMBOLDT_YML
            .replace("location_id: humboldt", "location_id: morro")
            .replace("qualifier: z05", "qualifier: z06"),
    )
    .unwrap();
}

/// Overwrite the morro pipeline config with one that still declares `location_id: humboldt`.
pub(crate) fn write_mislabelled_morro(dir: &Path) {
    std::fs::write(
        dir.join("buoy/pipeline_config_morro.yml"),
        PIPELINE_CONFIG_HUMBOLDT_YML.replace("qualifier: z05", "qualifier: z06"),
    )
    .unwrap();
}

static UNROUTABLE_LOCK: Mutex<()> = Mutex::new(());

/// Serialise tests that observe or change the unroutable files counter.
pub(crate) fn lock_unroutable() -> MutexGuard<'static, ()> {
    UNROUTABLE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A pipeline that writes a fixed set of artifacts derived from its input.
#[derive(Debug, Default)]
pub(crate) struct FakePipeline {
    /// Relative paths of the artifacts to write
    pub artifacts: Vec<String>,
    /// Fail every run with this message
    pub fail_with: Option<String>,
    /// Panic on every run
    pub panic: bool,
    /// Inputs seen, as (pipeline, location, input file name, contents)
    pub runs: Mutex<Vec<(String, String, String, String)>>,
}

impl FakePipeline {
    pub fn new(artifacts: &[&str]) -> Self {
        Self {
            artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Pipeline for FakePipeline {
    async fn run(&self, job: &PipelineJob<'_>) -> Result<Vec<PathBuf>, IngestError> {
        let contents = std::fs::read_to_string(job.input).unwrap_or_default();
        self.runs.lock().unwrap().push((
            job.route.pipeline.clone(),
            job.route.location.clone(),
            job.input
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            contents.clone(),
        ));
        if self.panic {
            panic!("pipeline panicked on {}", job.route);
        }
        if let Some(message) = &self.fail_with {
            return Err(IngestError::PipelineFailed {
                pipeline: job.route.pipeline.clone(),
                status: "exit status: 1".to_string(),
                stderr: message.clone(),
            });
        }
        let mut outputs = vec![];
        for artifact in &self.artifacts {
            let path = job.output_dir.join(artifact);
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(&path, contents.to_uppercase())?;
            outputs.push(path);
        }
        Ok(outputs)
    }
}

/// Build a pipeline spec from the fixture documents, with paths below `dir`.
pub(crate) fn make_spec(dir: &Path) -> PipelineSpec {
    PipelineSpec {
        pipeline_config_path: dir.join("buoy/pipeline_config_humboldt.yml"),
        storage_config_path: dir.join("buoy/storage_config.yml"),
        pipeline_config: serde_yaml::from_str(PIPELINE_CONFIG_HUMBOLDT_YML).unwrap(),
        storage_config: serde_yaml::from_str(STORAGE_CONFIG_YML).unwrap(),
    }
}
