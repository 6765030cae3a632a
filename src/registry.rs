//! Pipeline registry.
//!
//! Loads the routing document and every configuration document it references, and answers
//! "which configuration processes this file?".

use crate::error::IngestError;
use crate::models::{PipelineConfig, RoutingDocument, StorageConfig};
use crate::routing::{PatternSet, Route, RoutingMap};
use crate::validated_yaml::ValidatedYaml;

use hashbrown::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Everything a pipeline run needs to know about one (pipeline, location) pair.
#[derive(Clone, Debug)]
pub struct PipelineSpec {
    /// Absolute path of the pipeline configuration document
    pub pipeline_config_path: PathBuf,
    /// Absolute path of the storage configuration document
    pub storage_config_path: PathBuf,
    /// Parsed pipeline configuration
    pub pipeline_config: PipelineConfig,
    /// Parsed storage configuration
    pub storage_config: StorageConfig,
}

impl PipelineSpec {
    /// Datastream name of the standardized output.
    pub fn datastream(&self) -> String {
        self.pipeline_config.pipeline.datastream()
    }

    /// Datastream name of the raw inputs.
    pub fn raw_datastream(&self) -> String {
        self.pipeline_config.pipeline.raw_datastream()
    }

    /// Location identity used in output keys.
    pub fn location_id(&self) -> &str {
        &self.pipeline_config.pipeline.location_id
    }
}

/// Registry of pipelines, locations and their configurations.
#[derive(Debug)]
pub struct PipelineRegistry {
    /// Directory the configuration paths are relative to
    root: PathBuf,
    /// File name routing
    routing: RoutingMap,
    /// Configuration for each routable pair
    specs: HashMap<Route, PipelineSpec>,
}

impl PipelineRegistry {
    /// Load a registry.
    ///
    /// # Arguments
    ///
    /// * `root`: Configuration root directory
    /// * `routing_file`: Routing document path, relative to `root`
    pub fn load(root: &Path, routing_file: &Path) -> Result<Self, IngestError> {
        let routing_path = root.join(routing_file);
        let ValidatedYaml(document) = ValidatedYaml::<RoutingDocument>::from_path(&routing_path)?;
        Self::from_document(root, document)
    }

    /// Build a registry from an already validated routing document.
    pub fn from_document(root: &Path, document: RoutingDocument) -> Result<Self, IngestError> {
        let mut locations = HashSet::new();
        for location in &document.locations {
            if !locations.insert(location.name.as_str()) {
                return Err(IngestError::DuplicateRegistration {
                    kind: "location",
                    name: location.name.clone(),
                });
            }
        }

        let mut pipelines = HashSet::new();
        let mut specs = HashMap::new();
        // Storage configurations are shared between the locations of a pipeline.
        for entry in &document.pipelines {
            if !pipelines.insert(entry.name.as_str()) {
                return Err(IngestError::DuplicateRegistration {
                    kind: "pipeline",
                    name: entry.name.clone(),
                });
            }
            let storage_config_path = root.join(&entry.storage_config);
            let ValidatedYaml(storage_config) =
                ValidatedYaml::<StorageConfig>::from_path(&storage_config_path)?;
            for (location, config) in &entry.configs {
                if !locations.contains(location.as_str()) {
                    return Err(IngestError::UndeclaredLocation {
                        pipeline: entry.name.clone(),
                        location: location.clone(),
                    });
                }
                let pipeline_config_path = root.join(config);
                let ValidatedYaml(pipeline_config) =
                    ValidatedYaml::<PipelineConfig>::from_path(&pipeline_config_path)?;
                if pipeline_config.pipeline.location_id != *location {
                    tracing::warn!(
                        "{} declares location_id {} but is registered for location {}",
                        pipeline_config_path.display(),
                        pipeline_config.pipeline.location_id,
                        location
                    );
                }
                specs.insert(
                    Route::new(&entry.name, location),
                    PipelineSpec {
                        pipeline_config_path,
                        storage_config_path: storage_config_path.clone(),
                        pipeline_config,
                        storage_config: storage_config.clone(),
                    },
                );
            }
        }

        let routing = RoutingMap::new(
            PatternSet::new(
                document
                    .pipelines
                    .iter()
                    .map(|entry| (entry.name.as_str(), entry.patterns.iter())),
            )?,
            PatternSet::new(
                document
                    .locations
                    .iter()
                    .map(|entry| (entry.name.as_str(), entry.patterns.iter())),
            )?,
        );
        tracing::info!(
            "Loaded {} pipelines, {} locations and {} configurations from {}",
            routing.pipelines().len(),
            routing.locations().len(),
            specs.len(),
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            routing,
            specs,
        })
    }

    /// Resolve a file name to its route and configuration.
    ///
    /// # Arguments
    ///
    /// * `name`: File name, without any directory or key prefix
    pub fn resolve(&self, name: &str) -> Result<(Route, &PipelineSpec), IngestError> {
        let route = self.routing.resolve(name)?;
        match self.specs.get(&route) {
            Some(spec) => Ok((route, spec)),
            None => Err(IngestError::NoConfiguration {
                pipeline: route.pipeline,
                location: route.location,
            }),
        }
    }

    /// Look up the configuration of a route.
    pub fn get(&self, route: &Route) -> Option<&PipelineSpec> {
        self.specs.get(route)
    }

    /// File name routing.
    pub fn routing(&self) -> &RoutingMap {
        &self.routing
    }

    /// Configuration root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
