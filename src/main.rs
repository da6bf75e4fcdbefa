mod api;
mod app;
mod cli;
mod commands;
mod config;
mod db;
mod domain;
mod engine;
mod infrastructure;
mod page;
mod settings;
mod tasks;

use anyhow::Result;
use clap::Parser;
use infrastructure::{directories, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();

    let mut config = config::load_config()?;
    if let Some(profile) = cli.profile.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        config.profile = profile;
    }
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    match cli.command {
        Some(command) => {
            let (ok, output) = app::run_once(config, paths, command).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        None => {
            let (shutdown, _) = shutdown::Shutdown::new();
            shutdown::install_signal_handlers(shutdown.clone());

            let app = app::OvermodApp::initialize(config, paths, shutdown.clone()).await?;
            app.run().await
        }
    }
}
