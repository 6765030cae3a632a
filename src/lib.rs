//! This crate provides a serverless ingest dispatcher for scientific measurement data. Raw files
//! uploaded to an object store are routed by file name to a (pipeline, location) pair, processed
//! by an external ingest pipeline configured for that pair, and the standardized outputs are
//! written to a destination store under a datastream named after the location, dataset and data
//! level.
//!
//! Routing is driven by a YAML routing document listing ordered regular expressions for each
//! pipeline and each location. The first matching pipeline and the first matching location win,
//! independently of each other. Every pipeline and storage configuration document referenced by
//! the routing document is loaded and validated at start up.
//!
//! The dispatcher is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * The [Lambda runtime](lambda_runtime) and [event types](aws_lambda_events) for serving S3
//!   event notifications.
//! * [AWS SDK for S3](aws-sdk-s3) is used to interact with S3-compatible object stores.
//! * [Serde](serde) performs (de)serialisation of YAML configuration and JSON responses.
//! * [regex] compiles the routing patterns.

pub mod app;
pub mod cli;
pub mod compression;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod resource_manager;
pub mod routing;
pub mod s3_client;
pub mod storage;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_yaml;
