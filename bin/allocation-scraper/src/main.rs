use allocation_scraper::{run_scraper, AllocationScraperArgs};
use clap::Parser;
use common::init_logger;

#[tokio::main]
async fn main() -> allocation_scraper::Result<()> {
    let args = AllocationScraperArgs::parse();

    init_logger(&args.log_level).expect("Logger should initialize");

    run_scraper(args).await.map(|_| ())
}
