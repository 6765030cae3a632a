//! Configuration documents and associated functions and methods
//!
//! These types describe the YAML documents that configure each pipeline: the routing document,
//! the per-location pipeline configuration and the storage configuration. Only the structure
//! needed for dispatch and a handful of cross-reference checks are enforced here; the pipeline
//! itself interprets the rest.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Keywords that may stand in for variable names in quality checks.
pub const VARIABLE_KEYWORDS: [&str; 3] = ["ALL", "COORDS", "DATA_VARS"];

/// Default data level of raw inputs.
fn default_input_data_level() -> String {
    "00".to_string()
}

/// Validate an identifier (pipeline, location or dataset name)
fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    let valid = identifier
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        let mut error = ValidationError::new(
            "identifiers may only contain lowercase letters, digits and underscores",
        );
        error.add_param("identifier".into(), &identifier);
        return Err(error);
    }
    Ok(())
}

/// Validate that each pattern compiles as a regular expression
fn validate_patterns(patterns: &[String]) -> Result<(), ValidationError> {
    for pattern in patterns {
        validate_pattern(pattern)?;
    }
    Ok(())
}

/// Validate that a pattern compiles as a regular expression
fn validate_pattern(pattern: &str) -> Result<(), ValidationError> {
    if Regex::new(pattern).is_err() {
        let mut error = ValidationError::new("pattern is not a valid regular expression");
        error.add_param("pattern".into(), &pattern);
        return Err(error);
    }
    Ok(())
}

/// The routing document, `routing.yml`.
///
/// Pipelines and locations are sequences so that registration order is preserved: the first
/// matching entry wins.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RoutingDocument {
    /// Registered pipelines, in match order
    #[validate]
    #[validate(length(min = 1, message = "at least one pipeline must be registered"))]
    pub pipelines: Vec<PipelineEntry>,
    /// Registered locations, in match order
    #[validate]
    #[validate(length(min = 1, message = "at least one location must be registered"))]
    pub locations: Vec<LocationEntry>,
}

/// A pipeline registration in the routing document
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PipelineEntry {
    /// Pipeline identity
    #[validate(
        length(min = 1, message = "pipeline name must not be empty"),
        custom = "validate_identifier"
    )]
    pub name: String,
    /// File name patterns selecting this pipeline
    #[validate(
        length(min = 1, message = "pipeline patterns must not be empty"),
        custom = "validate_patterns"
    )]
    pub patterns: Vec<String>,
    /// Storage configuration path, relative to the configuration root
    pub storage_config: String,
    /// Pipeline configuration path for each location, relative to the configuration root
    pub configs: BTreeMap<String, String>,
}

/// A location registration in the routing document
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LocationEntry {
    /// Location identity
    #[validate(
        length(min = 1, message = "location name must not be empty"),
        custom = "validate_identifier"
    )]
    pub name: String,
    /// File name patterns selecting this location
    #[validate(
        length(min = 1, message = "location patterns must not be empty"),
        custom = "validate_patterns"
    )]
    pub patterns: Vec<String>,
}

/// Pipeline kind
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
pub enum PipelineType {
    /// Converts raw instrument files into a standardized dataset
    Ingest,
}

/// The `pipeline` section of a pipeline configuration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
pub struct PipelineSection {
    /// Pipeline kind
    #[serde(rename = "type")]
    pub kind: PipelineType,
    /// Location identity as it appears in datastream names
    #[validate(
        length(min = 1, message = "location_id must not be empty"),
        custom = "validate_identifier"
    )]
    pub location_id: String,
    /// Dataset name
    #[validate(
        length(min = 1, message = "dataset_name must not be empty"),
        custom = "validate_identifier"
    )]
    pub dataset_name: String,
    /// Optional dataset qualifier
    pub qualifier: Option<String>,
    /// Optional temporal resolution
    pub temporal: Option<String>,
    /// Data level of the standardized output
    #[validate(length(min = 1, message = "data_level must not be empty"))]
    pub data_level: String,
    /// Data level of the raw inputs
    #[serde(default = "default_input_data_level")]
    pub input_data_level: String,
}

impl PipelineSection {
    /// Returns the datastream name of the standardized output.
    pub fn datastream(&self) -> String {
        self.datastream_at(&self.data_level)
    }

    /// Returns the datastream name of the raw inputs.
    pub fn raw_datastream(&self) -> String {
        self.datastream_at(&self.input_data_level)
    }

    fn datastream_at(&self, data_level: &str) -> String {
        let mut name = format!("{}.{}", self.location_id, self.dataset_name);
        for part in [&self.qualifier, &self.temporal].into_iter().flatten() {
            name.push('-');
            name.push_str(part);
        }
        format!("{}.{}", name, data_level)
    }
}

/// Length of a dimension: a fixed size or `unlimited`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DimensionLength {
    Fixed(u64),
    Named(String),
}

/// A dimension declaration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Dimension {
    pub length: DimensionLength,
}

/// Class name and parameters of a pluggable pipeline component
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Component {
    pub classname: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

/// How a variable is read from the raw input
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VariableInput {
    /// Name of the variable in the raw file
    pub name: String,
    /// Units in the raw file
    pub units: Option<String>,
    /// Whether the pipeline fails when the variable is absent
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional value converter
    pub converter: Option<Component>,
}

fn default_required() -> bool {
    true
}

/// Storage type of a variable
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Char,
    Byte,
    Ubyte,
    Short,
    Ushort,
    #[serde(alias = "int32")]
    Int,
    #[serde(alias = "uint32")]
    Uint,
    #[serde(alias = "int64")]
    Long,
    #[serde(alias = "uint64")]
    Ulong,
    Float,
    Double,
    Str,
}

/// A variable declaration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Variable {
    /// Raw input mapping; absent for derived variables
    pub input: Option<VariableInput>,
    /// Dimensions of the variable
    #[serde(default)]
    pub dims: Vec<String>,
    /// Storage type
    #[serde(rename = "type")]
    pub dtype: DataType,
    /// Variable attributes
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
}

/// The `dataset_definition` section of a pipeline configuration
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DatasetDefinition {
    /// Global attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Declared dimensions
    pub dimensions: BTreeMap<String, Dimension>,
    /// Declared variables
    pub variables: BTreeMap<String, Variable>,
}

/// A quality check
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QualityCheck {
    /// Component that flags values
    pub checker: Component,
    /// Components that act on flagged values
    #[serde(default)]
    pub handlers: Vec<Component>,
    /// Variables (or keywords) the check applies to
    pub variables: Vec<String>,
    /// Variables excluded from a keyword selection
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A pipeline configuration document
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[validate(schema(function = "validate_pipeline_config"))]
pub struct PipelineConfig {
    #[validate]
    pub pipeline: PipelineSection,
    pub dataset_definition: DatasetDefinition,
    #[serde(default)]
    pub quality_management: BTreeMap<String, QualityCheck>,
}

/// Validate dimensions and variable references in a pipeline configuration
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ValidationError> {
    let definition = &config.dataset_definition;
    if definition.variables.is_empty() {
        return Err(ValidationError::new(
            "dataset_definition must declare at least one variable",
        ));
    }
    for (name, dimension) in &definition.dimensions {
        if let DimensionLength::Named(length) = &dimension.length {
            if length != "unlimited" {
                let mut error =
                    ValidationError::new("dimension length must be a number or 'unlimited'");
                error.add_param("dimension".into(), name);
                error.add_param("length".into(), length);
                return Err(error);
            }
        }
        if !definition.variables.contains_key(name) {
            let mut error = ValidationError::new("dimension has no coordinate variable");
            error.add_param("dimension".into(), name);
            return Err(error);
        }
    }
    for (name, variable) in &definition.variables {
        if let Some(dim) = variable
            .dims
            .iter()
            .find(|dim| !definition.dimensions.contains_key(*dim))
        {
            let mut error = ValidationError::new("variable refers to an undeclared dimension");
            error.add_param("variable".into(), name);
            error.add_param("dimension".into(), dim);
            return Err(error);
        }
    }
    for (name, check) in &config.quality_management {
        let known = |variable: &&String| {
            VARIABLE_KEYWORDS.contains(&variable.as_str())
                || definition.variables.contains_key(*variable)
        };
        if let Some(variable) = check
            .variables
            .iter()
            .chain(check.exclude.iter())
            .find(|variable| !known(variable))
        {
            let mut error = ValidationError::new("quality check refers to an undeclared variable");
            error.add_param("check".into(), name);
            error.add_param("variable".into(), variable);
            return Err(error);
        }
    }
    Ok(())
}

/// A file handler registration
///
/// Validated as part of [StorageConfig].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FileHandler {
    /// Pattern of file names the handler reads
    pub file_pattern: Option<String>,
    /// Extension of files the handler writes
    pub file_extension: Option<String>,
    pub classname: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

/// The `file_handlers` section of a storage configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FileHandlers {
    #[serde(default)]
    pub input: BTreeMap<String, FileHandler>,
    #[serde(default)]
    pub output: BTreeMap<String, FileHandler>,
}

/// A storage configuration document
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[validate(schema(function = "validate_storage_config"))]
pub struct StorageConfig {
    pub storage: Component,
    #[serde(default)]
    pub file_handlers: FileHandlers,
}

/// Validate the file handlers of a storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ValidationError> {
    let handlers = &config.file_handlers;
    for handler in handlers.input.values().chain(handlers.output.values()) {
        // Nested validation is not derived for maps.
        if let Some(pattern) = &handler.file_pattern {
            validate_pattern(pattern)?;
        }
    }
    for (name, handler) in &handlers.input {
        if handler.file_pattern.is_none() {
            let mut error = ValidationError::new("input file handlers require a file_pattern");
            error.add_param("handler".into(), name);
            return Err(error);
        }
    }
    Ok(())
}
