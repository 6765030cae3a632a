//! File name routing.
//!
//! A [RoutingMap] holds two independently maintained, ordered sets of regular expressions: one
//! keyed by pipeline identity and one keyed by location identity. A file name is resolved by
//! taking the first pipeline whose patterns match and the first location whose patterns match.

use crate::error::IngestError;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The (pipeline, location) pair a file is routed to.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Route {
    /// Pipeline identity
    pub pipeline: String,
    /// Location identity
    pub location: String,
}

impl Route {
    /// Create a route.
    pub fn new(pipeline: &str, location: &str) -> Self {
        Route {
            pipeline: pipeline.to_string(),
            location: location.to_string(),
        }
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pipeline, self.location)
    }
}

/// An ordered list of identities, each with the patterns that select it.
#[derive(Debug, Default)]
pub struct PatternSet {
    entries: Vec<(String, Vec<Regex>)>,
}

impl PatternSet {
    /// Compile a pattern set from `(identity, patterns)` pairs, preserving their order.
    pub fn new<I, P, S>(entries: I) -> Result<Self, IngestError>
    where
        I: IntoIterator<Item = (S, P)>,
        P: IntoIterator,
        P::Item: AsRef<str>,
        S: Into<String>,
    {
        let mut compiled = vec![];
        for (name, patterns) in entries {
            let name: String = name.into();
            let patterns = patterns
                .into_iter()
                .map(|pattern| {
                    Regex::new(pattern.as_ref()).map_err(|source| IngestError::InvalidPattern {
                        name: name.clone(),
                        pattern: pattern.as_ref().to_string(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push((name, patterns));
        }
        Ok(PatternSet { entries: compiled })
    }

    /// Returns the first identity with a pattern matching `name`.
    pub fn first_match(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|pattern| pattern.is_match(name)))
            .map(|(id, _)| id.as_str())
    }

    /// Returns the registered identities in match order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Returns the number of registered identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Routing map from file names to pipelines and locations.
#[derive(Debug, Default)]
pub struct RoutingMap {
    pipelines: PatternSet,
    locations: PatternSet,
}

impl RoutingMap {
    /// Create a routing map from compiled pipeline and location pattern sets.
    pub fn new(pipelines: PatternSet, locations: PatternSet) -> Self {
        Self {
            pipelines,
            locations,
        }
    }

    /// Returns the first registered pipeline matching the file name.
    pub fn match_pipeline(&self, name: &str) -> Option<&str> {
        self.pipelines.first_match(name)
    }

    /// Returns the first registered location matching the file name.
    pub fn match_location(&self, name: &str) -> Option<&str> {
        self.locations.first_match(name)
    }

    /// Resolve a file name to a route.
    ///
    /// # Arguments
    ///
    /// * `name`: File name, without any directory or key prefix
    pub fn resolve(&self, name: &str) -> Result<Route, IngestError> {
        let pipeline = self
            .match_pipeline(name)
            .ok_or_else(|| IngestError::NoPipelineMatch {
                file: name.to_string(),
            })?;
        let location = self
            .match_location(name)
            .ok_or_else(|| IngestError::NoLocationMatch {
                file: name.to_string(),
                pipeline: pipeline.to_string(),
            })?;
        Ok(Route::new(pipeline, location))
    }

    /// Registered pipeline pattern set.
    pub fn pipelines(&self) -> &PatternSet {
        &self.pipelines
    }

    /// Registered location pattern set.
    pub fn locations(&self) -> &PatternSet {
        &self.locations
    }
}

/// Returns the name that is routed for an object key: its final `/`-separated component.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_routing_map() -> RoutingMap {
        let pipelines = PatternSet::new([
            ("buoy", vec![r"^buoy\..*\.csv$"]),
            ("lidar", vec![r"^lidar\..*\.sta$", r"^lidar\..*\.rtd$"]),
            ("catch_all", vec![r"\.csv$"]),
        ])
        .unwrap();
        let locations = PatternSet::new([
            ("humboldt", vec![r"\.z05\."]),
            ("morro", vec![r"\.z06\."]),
            ("anywhere", vec![r"\.z0\d\."]),
        ])
        .unwrap();
        RoutingMap::new(pipelines, locations)
    }

    #[test]
    fn resolve() {
        let map = make_routing_map();
        assert_eq!(
            Route::new("buoy", "humboldt"),
            map.resolve("buoy.z05.00.20201201.000000.gill.csv").unwrap()
        );
        assert_eq!(
            Route::new("lidar", "morro"),
            map.resolve("lidar.z06.00.20201201.000000.rtd").unwrap()
        );
    }

    #[test]
    fn resolve_first_match_wins() {
        let map = make_routing_map();
        // Both buoy and catch_all match; buoy is registered first.
        assert_eq!(Some("buoy"), map.match_pipeline("buoy.z07.csv"));
        // Only anywhere matches z07.
        assert_eq!(
            Route::new("buoy", "anywhere"),
            map.resolve("buoy.z07.csv").unwrap()
        );
        assert_eq!(Some("catch_all"), map.match_pipeline("sonic.z05.csv"));
        assert_eq!(Some("humboldt"), map.match_location("sonic.z05.csv"));
    }

    #[test]
    fn resolve_sets_are_independent() {
        let map = make_routing_map();
        // The location set is consulted regardless of the pipeline matched.
        assert_eq!(
            Route::new("catch_all", "morro"),
            map.resolve("met.z06.csv").unwrap()
        );
    }

    #[test]
    fn resolve_no_pipeline() {
        let map = make_routing_map();
        match map.resolve("readme.txt").unwrap_err() {
            IngestError::NoPipelineMatch { file } => assert_eq!("readme.txt", file),
            error => panic!("unexpected error {error:?}"),
        }
    }

    #[test]
    fn resolve_no_location() {
        let map = make_routing_map();
        match map.resolve("buoy.x01.csv").unwrap_err() {
            IngestError::NoLocationMatch { file, pipeline } => {
                assert_eq!("buoy.x01.csv", file);
                assert_eq!("buoy", pipeline);
            }
            error => panic!("unexpected error {error:?}"),
        }
    }

    #[test]
    fn patterns_are_unanchored() {
        let set = PatternSet::new([("z05", vec!["z05"])]).unwrap();
        assert_eq!(Some("z05"), set.first_match("buoy.z05.csv"));
        let set = PatternSet::new([("z05", vec!["^z05$"])]).unwrap();
        assert_eq!(None, set.first_match("buoy.z05.csv"));
    }

    #[test]
    fn invalid_pattern() {
        match PatternSet::new([("buoy", vec![r"^buoy\.(csv"])]).unwrap_err() {
            IngestError::InvalidPattern { name, pattern, .. } => {
                assert_eq!("buoy", name);
                assert_eq!(r"^buoy\.(csv", pattern);
            }
            error => panic!("unexpected error {error:?}"),
        }
    }

    #[test]
    fn pattern_set_order() {
        let map = make_routing_map();
        assert_eq!(
            vec!["buoy", "lidar", "catch_all"],
            map.pipelines().names().collect::<Vec<_>>()
        );
        assert_eq!(3, map.locations().len());
        assert!(!map.locations().is_empty());
        assert!(PatternSet::default().is_empty());
    }

    #[test]
    fn empty_map_resolves_nothing() {
        let map = RoutingMap::default();
        assert!(matches!(
            map.resolve("buoy.z05.csv"),
            Err(IngestError::NoPipelineMatch { .. })
        ));
    }

    #[test]
    fn file_name_of_key() {
        assert_eq!("foo.csv", file_name("foo.csv"));
        assert_eq!("foo.csv", file_name("raw/2020/foo.csv"));
        assert_eq!("", file_name("raw/"));
    }

    #[test]
    fn route_display() {
        assert_eq!("buoy@morro", Route::new("buoy", "morro").to_string());
    }
}
