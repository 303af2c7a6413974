//! Artefact gateway entrypoint.
//!
//! Loads settings, installs the artefact (fatal on failure), then serves
//! traffic until interrupted. `fetch` stops after the install.

use artefact_gateway::cli::{Cli, Command};
use artefact_gateway::{Gateway, GatewayConfig, GatewayError, Secrets, blob_store};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level().as_str()))
        .init();
    if let Err(err) = run(&cli) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), GatewayError> {
    let config = GatewayConfig::load(&cli.config)?;
    let secrets = Secrets::from_env(&cli.env_prefix)?;
    let store = blob_store(&config, &secrets);
    let gateway = Gateway::build(&config, &secrets, store)?;

    gateway.boot()?;
    if cli.command() == Command::Fetch {
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|source| GatewayError::Serve {
        bind: config.server.bind.clone(),
        source,
    })?;
    runtime.block_on(gateway.serve(shutdown_signal()))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received; draining connections"),
        Err(err) => {
            warn!("cannot listen for interrupts: {err}; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
