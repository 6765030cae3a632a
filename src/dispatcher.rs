//! Ingest of a single raw file.
//!
//! The dispatcher resolves the route of a file, stages it in scratch space, runs the pipeline and
//! writes the artifacts to the destination under `{location_id}/{datastream}/`.

use crate::compression;
use crate::error::IngestError;
use crate::metrics::{ARTIFACTS, INGESTS, PIPELINE_TIME, UNROUTABLE};
use crate::pipeline::{Pipeline, PipelineJob};
use crate::registry::{PipelineRegistry, PipelineSpec};
use crate::resource_manager::ResourceManager;
use crate::routing::{self, Route};
use crate::storage::ObjectStore;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Result of a successful ingest.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IngestReport {
    /// Route the file was resolved to
    pub route: Route,
    /// Datastream the artifacts were stored under
    pub datastream: String,
    /// Locations of everything written to the destination
    pub stored: Vec<String>,
    /// Size of the raw input in bytes
    pub bytes: u64,
    /// Time spent in the pipeline, in seconds
    pub pipeline_seconds: f64,
}

/// Dispatches raw files to their pipelines.
#[derive(Debug)]
pub struct Dispatcher {
    /// Routing and configuration
    registry: PipelineRegistry,
    /// Pipeline implementation
    pipeline: Arc<dyn Pipeline>,
    /// Where artifacts are written
    destination: Box<dyn ObjectStore>,
    /// Resource manager
    resource_manager: ResourceManager,
    /// Parent directory of per-ingest scratch directories
    scratch_dir: PathBuf,
    /// Whether raw inputs are copied to their raw datastream
    archive_raw: bool,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        registry: PipelineRegistry,
        pipeline: Arc<dyn Pipeline>,
        destination: Box<dyn ObjectStore>,
        resource_manager: ResourceManager,
        scratch_dir: &Path,
        archive_raw: bool,
    ) -> Self {
        Self {
            registry,
            pipeline,
            destination,
            resource_manager,
            scratch_dir: scratch_dir.to_path_buf(),
            archive_raw,
        }
    }

    /// Routing and configuration.
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Resolve the route of an object key, counting unroutable files.
    pub fn resolve(&self, key: &str) -> Result<(Route, &PipelineSpec), IngestError> {
        self.registry
            .resolve(routing::file_name(key))
            .inspect_err(|error| {
                if matches!(
                    error,
                    IngestError::NoPipelineMatch { .. } | IngestError::NoLocationMatch { .. }
                ) {
                    UNROUTABLE.inc();
                }
            })
    }

    /// Ingest one object.
    ///
    /// # Arguments
    ///
    /// * `source`: Store holding the raw object
    /// * `key`: Key of the raw object
    /// * `size_hint`: Size of the object in bytes, if known, used to reserve scratch space
    pub async fn ingest(
        &self,
        source: &dyn ObjectStore,
        key: &str,
        size_hint: Option<u64>,
    ) -> Result<IngestReport, IngestError> {
        let (route, spec) = self.resolve(key)?;
        let span = tracing::info_span!("ingest", run_id = %Uuid::new_v4(), %route, key);
        self.ingest_routed(source, key, size_hint, route, spec)
            .instrument(span)
            .await
    }

    async fn ingest_routed(
        &self,
        source: &dyn ObjectStore,
        key: &str,
        size_hint: Option<u64>,
        route: Route,
        spec: &PipelineSpec,
    ) -> Result<IngestReport, IngestError> {
        let name = routing::file_name(key);
        tracing::info!("Ingesting {}", source.describe(key));

        let _task = self.resource_manager.task().await?;
        let _scratch = self
            .resource_manager
            .scratch(size_hint.unwrap_or_default())
            .await?;

        // Removed when dropped.
        let scratch = tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir_in(&self.scratch_dir)?;
        let input_dir = scratch.path().join("input");
        let inflated_dir = scratch.path().join("inflated");
        let output_dir = scratch.path().join("output");
        for dir in [&input_dir, &inflated_dir, &output_dir] {
            tokio::fs::create_dir(dir).await?;
        }

        let raw = input_dir.join(name);
        let bytes = source.fetch(key, &raw).await?;
        tracing::debug!("Fetched {} bytes", bytes);

        let input = {
            let raw = raw.clone();
            tokio::task::spawn_blocking(move || {
                compression::inflate_if_compressed(&raw, &inflated_dir)
            })
            .await??
        };

        let job = PipelineJob {
            route: &route,
            spec,
            input: &input,
            output_dir: &output_dir,
        };
        let start = Instant::now();
        let artifacts = self.pipeline.run(&job).await;
        let pipeline_seconds = start.elapsed().as_secs_f64();
        PIPELINE_TIME
            .with_label_values(&[&route.pipeline])
            .observe(pipeline_seconds);
        let artifacts = artifacts?;
        if artifacts.is_empty() {
            tracing::warn!("Pipeline produced no artifacts");
        }

        let datastream = spec.datastream();
        let mut stored = vec![];
        for artifact in &artifacts {
            let key = artifact_key(spec.location_id(), &datastream, &output_dir, artifact);
            self.destination.store(artifact, &key).await?;
            stored.push(self.destination.describe(&key));
        }
        ARTIFACTS
            .with_label_values(&[&route.pipeline])
            .inc_by(u64::try_from(artifacts.len())?);

        if self.archive_raw {
            let key = format!("{}/{}/{}", spec.location_id(), spec.raw_datastream(), name);
            self.destination.store(&raw, &key).await?;
            stored.push(self.destination.describe(&key));
        }

        INGESTS
            .with_label_values(&[&route.pipeline, &route.location])
            .inc();
        tracing::info!(
            "Stored {} objects for {} in {:.1}s",
            stored.len(),
            datastream,
            pipeline_seconds
        );
        Ok(IngestReport {
            route,
            datastream,
            stored,
            bytes,
            pipeline_seconds,
        })
    }
}

/// Destination key of an artifact: `{location_id}/{datastream}/{path below the output dir}`.
fn artifact_key(location_id: &str, datastream: &str, output_dir: &Path, artifact: &Path) -> String {
    let relative = artifact
        .strip_prefix(output_dir)
        .ok()
        .filter(|relative| relative.components().next().is_some())
        .unwrap_or_else(|| Path::new(artifact.file_name().unwrap_or_default()));
    let relative = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}/{}", location_id, datastream, relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use crate::test_utils::{self, FakePipeline};

    const GILL: &str = "buoy.z05.00.20201201.000000.gill.csv";

    struct Fixture {
        _config: tempfile::TempDir,
        source: tempfile::TempDir,
        destination: tempfile::TempDir,
        scratch: tempfile::TempDir,
        pipeline: Arc<FakePipeline>,
        dispatcher: Dispatcher,
    }

    fn make_fixture(pipeline: FakePipeline, archive_raw: bool, scratch_limit: Option<u64>) -> Fixture {
        make_fixture_with(pipeline, archive_raw, scratch_limit, |_| {})
    }

    /// As [make_fixture], editing the configuration root before it is loaded.
    fn make_fixture_with(
        pipeline: FakePipeline,
        archive_raw: bool,
        scratch_limit: Option<u64>,
        configure: impl FnOnce(&Path),
    ) -> Fixture {
        let config = tempfile::tempdir().unwrap();
        test_utils::write_config_root(config.path());
        configure(config.path());
        let registry = PipelineRegistry::load(config.path(), Path::new("routing.yml")).unwrap();
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline);
        let dispatcher = Dispatcher::new(
            registry,
            pipeline.clone(),
            Box::new(LocalStore::new(destination.path())),
            ResourceManager::new(Some(2), scratch_limit),
            scratch.path(),
            archive_raw,
        );
        Fixture {
            _config: config,
            source,
            destination,
            scratch,
            pipeline,
            dispatcher,
        }
    }

    impl Fixture {
        fn add_source(&self, key: &str, contents: &[u8]) {
            let path = self.source.path().join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        async fn ingest(&self, key: &str) -> Result<IngestReport, IngestError> {
            let source = LocalStore::new(self.source.path());
            self.dispatcher.ingest(&source, key, Some(16)).await
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    #[test]
    fn artifact_keys() {
        let out = Path::new("/scratch/output");
        assert_eq!(
            "humboldt/humboldt.buoy.a1/a.nc",
            artifact_key("humboldt", "humboldt.buoy.a1", out, &out.join("a.nc"))
        );
        assert_eq!(
            "humboldt/humboldt.buoy.a1/plots/a.png",
            artifact_key("humboldt", "humboldt.buoy.a1", out, &out.join("plots/a.png"))
        );
        assert_eq!(
            "humboldt/humboldt.buoy.a1/b.nc",
            artifact_key("humboldt", "humboldt.buoy.a1", out, Path::new("/elsewhere/b.nc"))
        );
    }

    #[tokio::test]
    async fn ingest() {
        let fixture = make_fixture(FakePipeline::new(&["a.nc", "plots/a.png"]), false, None);
        fixture.add_source(&format!("raw/{GILL}"), b"speed\n");
        let ingests = INGESTS.with_label_values(&["buoy", "humboldt"]).get();
        let report = fixture.ingest(&format!("raw/{GILL}")).await.unwrap();
        assert!(INGESTS.with_label_values(&["buoy", "humboldt"]).get() > ingests);
        assert_eq!(Route::new("buoy", "humboldt"), report.route);
        assert_eq!("humboldt.buoy-z05.a1", report.datastream);
        assert_eq!(6, report.bytes);
        assert_eq!(2, report.stored.len());
        let stored = fixture.destination.path().join("humboldt/humboldt.buoy-z05.a1");
        assert_eq!("SPEED\n", std::fs::read_to_string(stored.join("a.nc")).unwrap());
        assert!(stored.join("plots/a.png").is_file());
        let runs = fixture.pipeline.runs.lock().unwrap();
        assert_eq!(
            vec![(
                "buoy".to_string(),
                "humboldt".to_string(),
                GILL.to_string(),
                "speed\n".to_string()
            )],
            *runs
        );
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn ingest_keys_by_declared_location_id() {
        let fixture = make_fixture_with(
            FakePipeline::new(&["a.nc"]),
            false,
            None,
            test_utils::write_mislabelled_morro,
        );
        let key = "buoy.z06.00.20201201.000000.gill.csv";
        fixture.add_source(key, b"speed\n");
        let report = fixture.ingest(key).await.unwrap();
        assert_eq!(Route::new("buoy", "morro"), report.route);
        assert_eq!("humboldt.buoy-z06.a1", report.datastream);
        assert_eq!(1, report.stored.len());
        assert!(fixture
            .destination
            .path()
            .join("humboldt/humboldt.buoy-z06.a1/a.nc")
            .is_file());
        assert!(!fixture.destination.path().join("morro").exists());
    }

    #[tokio::test]
    async fn ingest_archives_raw() {
        let fixture = make_fixture(FakePipeline::new(&["a.nc"]), true, None);
        fixture.add_source(GILL, b"speed\n");
        let report = fixture.ingest(GILL).await.unwrap();
        assert_eq!(2, report.stored.len());
        let raw = fixture
            .destination
            .path()
            .join("humboldt/humboldt.buoy-z05.00")
            .join(GILL);
        assert_eq!("speed\n", std::fs::read_to_string(raw).unwrap());
    }

    #[tokio::test]
    async fn ingest_compressed() {
        use flate2::read::GzEncoder;
        use std::io::Read;

        let mut compressed = vec![];
        GzEncoder::new(&b"speed\n"[..], flate2::Compression::fast())
            .read_to_end(&mut compressed)
            .unwrap();
        let fixture = make_fixture(FakePipeline::new(&["a.nc"]), false, None);
        let key = format!("{GILL}.gz");
        fixture.add_source(&key, &compressed);
        fixture.ingest(&key).await.unwrap();
        let runs = fixture.pipeline.runs.lock().unwrap();
        assert_eq!(GILL, runs[0].2);
        assert_eq!("speed\n", runs[0].3);
    }

    #[tokio::test]
    async fn ingest_unroutable() {
        let _guard = test_utils::lock_unroutable();
        let fixture = make_fixture(FakePipeline::new(&["a.nc"]), false, None);
        fixture.add_source("notes.txt", b"hello");
        assert!(matches!(
            fixture.ingest("notes.txt").await,
            Err(IngestError::NoPipelineMatch { .. })
        ));
        assert!(fixture.pipeline.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ingest_pipeline_failure() {
        let mut pipeline = FakePipeline::new(&["a.nc"]);
        pipeline.fail_with = Some("bad data".to_string());
        let fixture = make_fixture(pipeline, false, None);
        fixture.add_source(GILL, b"speed\n");
        assert!(matches!(
            fixture.ingest(GILL).await,
            Err(IngestError::PipelineFailed { .. })
        ));
        // Nothing stored, scratch cleaned up.
        assert!(std::fs::read_dir(fixture.destination.path())
            .unwrap()
            .next()
            .is_none());
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn ingest_missing_object() {
        let fixture = make_fixture(FakePipeline::new(&["a.nc"]), false, None);
        assert!(matches!(
            fixture.ingest(GILL).await,
            Err(IngestError::ObjectNotFound { .. })
        ));
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn ingest_insufficient_scratch() {
        let fixture = make_fixture(FakePipeline::new(&["a.nc"]), false, Some(8));
        fixture.add_source(GILL, b"speed\n");
        assert!(matches!(
            fixture.ingest(GILL).await,
            Err(IngestError::InsufficientScratchSpace { requested: 16, total: 8 })
        ));
    }
}
