//! This file defines the ingest-lambda binary entry point.

use ingest_lambda::app::App;
use ingest_lambda::cli;
use ingest_lambda::handler::{self, RecordStatus};
use ingest_lambda::metrics;
use ingest_lambda::tracing;

use lambda_runtime::{service_fn, Error};
use std::sync::Arc;

/// Application entry point
#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    let app = Arc::new(App::new(&args).await?);

    if args.is_lambda() {
        return lambda_runtime::run(service_fn(move |event| {
            handler::handler(app.clone(), event)
        }))
        .await;
    }

    if args.route_only {
        let reports = app.route_files(&args.files);
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    let summary = app.ingest_files(&args.files).await;
    ::tracing::debug!("{}", metrics::render());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.count(RecordStatus::Failed) > 0 {
        std::process::exit(1);
    }
    Ok(())
}
