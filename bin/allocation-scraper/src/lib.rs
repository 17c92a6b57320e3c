use std::{path::PathBuf, sync::Arc};

use allocation_client::{
    aggregate, BatchPlan, BatchRetryOrchestrator, HttpTransport, ProxyRotator, QueryTemplate,
    RequestExecutor, RunResult, TemplateError,
};
use clap::Parser;
use snafu::prelude::*;
use tracing::{error, info, warn};

pub mod settings;

pub use settings::{Paths, Settings, SettingsError};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Configuration error: {}", source))]
    Settings { source: SettingsError },

    #[snafu(display("Failed to read query template: {}", source))]
    QueryTemplateRead { source: common::FileError },

    #[snafu(display("Invalid query template {}: {}", path.display(), source))]
    QueryTemplateParse {
        path: PathBuf,
        source: TemplateError,
    },

    #[snafu(display("No addresses found in {}", path.display()))]
    NoAddresses { path: PathBuf },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Parser, Debug, Clone)]
#[command(name = "allocation-scraper")]
#[command(about = "Fetches per-address token allocations through a rotating proxy pool")]
pub struct AllocationScraperArgs {
    /// Settings file (YAML or TOML)
    #[arg(short, long, env = "ALLOCATION_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

pub async fn run_scraper(args: AllocationScraperArgs) -> Result<RunResult> {
    let settings = Settings::load(&args.config).context(SettingsSnafu)?;
    run_with_settings(&settings).await
}

/// Fetches every listed address, logs the summary and writes the
/// address to amount map. Only startup problems are returned as errors.
pub async fn run_with_settings(settings: &Settings) -> Result<RunResult> {
    let raw_template = common::read_text(&settings.paths.query).context(QueryTemplateReadSnafu)?;
    let template = QueryTemplate::parse(&raw_template).context(QueryTemplateParseSnafu {
        path: &settings.paths.query,
    })?;
    if template.placeholder_count() == 0 {
        warn!(path = %settings.paths.query.display(), "query template has no {{address}} placeholder");
    }

    let addresses = common::read_lines(&settings.paths.addresses);
    ensure!(
        !addresses.is_empty(),
        NoAddressesSnafu {
            path: &settings.paths.addresses
        }
    );

    let proxies = common::read_lines(&settings.paths.proxies);
    if proxies.is_empty() {
        warn!(path = %settings.paths.proxies.display(), "no proxies found, using direct connection");
    }
    let proxies = Arc::new(ProxyRotator::new(proxies));

    let plan = BatchPlan::new(addresses.len(), settings.batch_size);
    info!(api_url = %settings.api_url, "using API URL");
    info!(
        addresses = addresses.len(),
        proxies = proxies.len(),
        "total addresses to process"
    );
    info!(
        batch_size = plan.batch_size(),
        batches = plan.batch_count(),
        base_delay_secs = settings.initial_retry_delay.as_secs_f64(),
        max_persistent_retries = settings.max_persistent_retries,
        "processing in batches"
    );

    let transport = Arc::new(HttpTransport::new(
        settings.api_url.clone(),
        settings.request_timeout,
    ));
    let executor = RequestExecutor::new(transport, proxies, Arc::new(template))
        .with_max_transient_retries(settings.max_transient_retries);
    let orchestrator = BatchRetryOrchestrator::new(
        executor,
        settings.initial_retry_delay,
        settings.max_persistent_retries,
    );

    let outcomes = orchestrator.run_all(&addresses, plan.batch_size()).await;

    let result = aggregate(&outcomes);
    result.log_summary();

    if let Err(err) = common::write_json_pretty(&settings.paths.output_json, &result.amounts) {
        error!(error = %err, "failed to save results");
    }

    Ok(result)
}
