//! Loader that deserialises and validates YAML documents

use crate::error::IngestError;

use serde::de::DeserializeOwned;
use std::path::Path;
use validator::Validate;

/// A YAML document that has been deserialised and then validated using the validator crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedYaml<T>(pub T);

impl<T> ValidatedYaml<T>
where
    T: DeserializeOwned + Validate,
{
    /// Read, deserialise and validate the document at `path`.
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let text = std::fs::read_to_string(path).map_err(|source| IngestError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Deserialise and validate `text`, attributing errors to `path`.
    pub fn parse(path: &Path, text: &str) -> Result<Self, IngestError> {
        let value: T = serde_yaml::from_str(text).map_err(|source| IngestError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        value
            .validate()
            .map_err(|source| IngestError::ConfigValidation {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(ValidatedYaml(value))
    }
}
