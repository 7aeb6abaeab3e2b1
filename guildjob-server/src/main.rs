use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod commands;
mod config;

use cli::{Args, Mode};

/// Initialize tracing: stdout always, plus a log file when a directory is configured
fn initialize_tracing(log_dir: Option<&Path>) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,\
         guildjob_operator=debug,\
         guildjob_server=debug,\
         kube=info"
            .into()
    });

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "guildjob.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard stops file logging, so it lives for the whole process
            std::mem::forget(guard);

            Some(fmt::layer().with_writer(file_writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Offline subcommands need neither configuration nor a cluster
    match &args.mode {
        Mode::Crd => return commands::tools::print_crd(),
        Mode::JobName { interaction, action } => {
            commands::tools::print_job_name(interaction, action);
            return Ok(());
        }
        _ => {}
    }

    let config = config::Config::load()?;
    initialize_tracing(config.log_dir.as_deref())?;

    match args.mode {
        Mode::Run { serve } => commands::server::run_all(config, serve).await,
        Mode::Webhook { serve } => commands::server::run_webhook(config, serve).await,
        Mode::Controller => commands::server::run_controllers(config).await,
        Mode::Crd | Mode::JobName { .. } => Ok(()),
    }
}
