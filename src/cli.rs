//! Command Line Interface (CLI) arguments.

use byte_unit::Byte;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// Ingest dispatcher command line interface
///
/// Without positional files the process serves AWS Lambda S3 event invocations. With files it
/// ingests them locally and exits.
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Directory holding the routing document and pipeline configurations
    #[arg(long, default_value = "pipelines", env = "INGEST_CONFIG_ROOT")]
    pub config_root: String,
    /// Routing document, relative to the configuration root
    #[arg(long, default_value = "routing.yml", env = "INGEST_ROUTING_FILE")]
    pub routing_file: PathBuf,
    /// Where artifacts are written: s3://bucket/prefix or a local directory
    #[arg(long, default_value = "output", env = "INGEST_DESTINATION")]
    pub destination: String,
    /// URL of an S3-compatible object store, instead of AWS S3
    #[arg(long, env = "INGEST_S3_ENDPOINT")]
    pub s3_endpoint: Option<Url>,
    /// S3 access key. Credentials are taken from the environment if unset
    #[arg(long, env = "INGEST_S3_ACCESS_KEY", requires = "s3_secret_key")]
    pub s3_access_key: Option<String>,
    /// S3 secret key
    #[arg(long, env = "INGEST_S3_SECRET_KEY", requires = "s3_access_key")]
    pub s3_secret_key: Option<String>,
    /// S3 region, overriding the environment
    #[arg(long, env = "INGEST_S3_REGION")]
    pub s3_region: Option<String>,
    /// Pipeline executable
    #[arg(long, default_value = "ingest-runner", env = "INGEST_PIPELINE_COMMAND")]
    pub pipeline_command: String,
    /// Extra argument passed to the pipeline executable before the standard arguments
    #[arg(long = "pipeline-arg", allow_hyphen_values = true)]
    pub pipeline_args: Vec<String>,
    /// Maximum time in seconds a pipeline run may take
    #[arg(long, default_value_t = 840, env = "INGEST_PIPELINE_TIMEOUT")]
    pub pipeline_timeout: u64,
    /// Directory for per-ingest scratch space
    #[arg(long, default_value = "/tmp", env = "INGEST_SCRATCH_DIR")]
    pub scratch_dir: String,
    /// Scratch space available to concurrent ingests (e.g. 512MB)
    #[arg(long, env = "INGEST_SCRATCH_LIMIT", value_parser = parse_bytes)]
    pub scratch_limit: Option<u64>,
    /// Maximum number of files ingested concurrently. Defaults to the number of CPUs
    #[arg(long, env = "INGEST_TASK_LIMIT")]
    pub task_limit: Option<usize>,
    /// Also copy each raw input to its raw datastream at the destination
    #[arg(long, default_value_t = false, env = "INGEST_ARCHIVE_RAW")]
    pub archive_raw: bool,
    /// Print the route of each file without ingesting it
    #[arg(long, default_value_t = false, requires = "files")]
    pub route_only: bool,
    /// Local files to ingest
    pub files: Vec<PathBuf>,
}

impl CommandLineArgs {
    /// Whether the process should serve Lambda invocations.
    pub fn is_lambda(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parse a human readable size, e.g. `512MB` or `1 GiB`.
fn parse_bytes(size: &str) -> Result<u64, String> {
    Byte::parse_str(size, /* ignore case */ true)
        .map(|bytes| bytes.as_u64())
        .map_err(|error| error.to_string())
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CommandLineArgs {
        CommandLineArgs::try_parse_from(std::iter::once("ingest-lambda").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse_from(&[]);
        assert!(args.is_lambda());
        assert_eq!(PathBuf::from("routing.yml"), args.routing_file);
        assert_eq!(840, args.pipeline_timeout);
        assert_eq!(None, args.scratch_limit);
        assert!(!args.archive_raw);
    }

    #[test]
    fn local_files() {
        let args = parse_from(&[
            "--destination",
            "s3://output/ingest",
            "--pipeline-arg",
            "-m",
            "--pipeline-arg",
            "runner",
            "--scratch-limit",
            "1KiB",
            "a.csv",
            "b.csv",
        ]);
        assert!(!args.is_lambda());
        assert_eq!("s3://output/ingest", args.destination);
        assert_eq!(vec!["-m", "runner"], args.pipeline_args);
        assert_eq!(Some(1024), args.scratch_limit);
        assert_eq!(
            vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")],
            args.files
        );
    }

    #[test]
    fn route_only_requires_files() {
        assert!(CommandLineArgs::try_parse_from(["ingest-lambda", "--route-only"]).is_err());
    }

    #[test]
    fn access_key_requires_secret() {
        assert!(
            CommandLineArgs::try_parse_from(["ingest-lambda", "--s3-access-key", "user"])
                .is_err()
        );
    }

    #[test]
    fn invalid_scratch_limit() {
        assert!(
            CommandLineArgs::try_parse_from(["ingest-lambda", "--scratch-limit", "lots"]).is_err()
        );
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        CommandLineArgs::command().debug_assert();
    }
}
