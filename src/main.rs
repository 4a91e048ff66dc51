mod app;
mod browser;
mod core;
mod extract;
mod logger;
mod notebook;
mod services;
mod storage;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::Result;
use clap::Parser;

use app::AppConfig;
use app::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logger::init(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;
    cli::run(cli, config).await
}
