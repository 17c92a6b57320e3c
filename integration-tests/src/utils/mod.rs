mod mock_graphql;

use std::{fs, path::Path, time::Duration};

use allocation_scraper::{Paths, Settings};
use common::init_logger;
use ctor::ctor;

pub use mock_graphql::*;

#[ctor]
fn init_test_tracing() {
    let has_nocapture = std::env::args().any(|arg| arg == "--nocapture" || arg == "--show-output");
    if has_nocapture {
        init_logger("info,allocation_client=debug,allocation_scraper=debug")
            .expect("Logger should initialize");
    }
}

/// Writes the input files into `dir` and returns settings pointing at them
/// with short delays suitable for tests.
pub fn write_run_files(
    dir: &Path,
    endpoint: &str,
    addresses: &[&str],
    proxies: &[String],
) -> Settings {
    let paths = Paths {
        addresses: dir.join("addresses.txt"),
        proxies: dir.join("proxies.txt"),
        query: dir.join("query.graphql"),
        output_json: dir.join("results.json"),
    };
    fs::write(&paths.addresses, addresses.join("\n")).expect("write addresses");
    fs::write(&paths.proxies, proxies.join("\n")).expect("write proxies");
    fs::write(&paths.query, QUERY_TEMPLATE).expect("write query");

    Settings {
        api_url: endpoint.parse().expect("endpoint should be a URL"),
        paths,
        batch_size: 10,
        initial_retry_delay: Duration::from_millis(50),
        max_persistent_retries: 3,
        request_timeout: Duration::from_secs(5),
        max_transient_retries: 3,
    }
}
