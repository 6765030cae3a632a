use lazy_static::lazy_static;
use prometheus::{self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Records by outcome
    pub static ref RECORDS: IntCounterVec = IntCounterVec::new(
        Opts::new("ingest_records", "The number of storage event records handled"),
        &["outcome"]
    ).unwrap();
    // Files ingested by route
    pub static ref INGESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("ingests", "The number of files ingested"),
        &["pipeline", "location"]
    ).unwrap();
    // Files that matched no pipeline or location
    pub static ref UNROUTABLE: IntCounter = IntCounter::new(
        "unroutable_files", "The number of files that could not be routed"
    ).unwrap();
    // Pipeline histogram by run time
    pub static ref PIPELINE_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("pipeline_time", "The time taken by each pipeline run"),
            buckets: vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0],
        },
        &["pipeline"],
    ).unwrap();
    // Artifacts written to the destination
    pub static ref ARTIFACTS: IntCounterVec = IntCounterVec::new(
        Opts::new("artifacts_stored", "The number of artifacts written to the destination"),
        &["pipeline"]
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(RECORDS.clone())).unwrap();
    REGISTRY.register(Box::new(INGESTS.clone())).unwrap();
    REGISTRY.register(Box::new(UNROUTABLE.clone())).unwrap();
    REGISTRY.register(Box::new(PIPELINE_TIME.clone())).unwrap();
    REGISTRY.register(Box::new(ARTIFACTS.clone())).unwrap();
}

/// Render the registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", error);
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_registered() {
        let _guard = crate::test_utils::lock_unroutable();
        // Registration happens once per process.
        let _ = REGISTRY.register(Box::new(UNROUTABLE.clone()));
        UNROUTABLE.inc();
        let output = render();
        assert!(output.contains("unroutable_files"), "output: {output}");
    }
}
