use crate::app::App;
use crate::config::ServerConfig;
use crate::echo::echo_handler;
use crate::router::Router;
use crate::spec::{load_contract, PackageInfo};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

/// Command-line interface for mediagate
#[derive(Parser, Debug)]
#[command(name = "mediagate")]
#[command(about = "Contract-driven HTTP ingress for the media server", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the event channel
    Serve {
        /// YAML (or JSON) configuration file
        #[arg(short, long, env = "MEDIAGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the contract document path
        #[arg(long)]
        contract: Option<PathBuf>,

        /// Bind every operation to a handler that echoes its inputs
        #[arg(long, default_value_t = false)]
        echo: bool,
    },
    /// Load the contract, check it and print the route table
    Check {
        #[arg(long, default_value = "api.yml")]
        contract: PathBuf,
    },
}

/// Configuration for `serve`: file, then environment, then flags.
pub fn resolve_config(
    config: Option<&PathBuf>,
    port: Option<u16>,
    contract: Option<&PathBuf>,
) -> anyhow::Result<ServerConfig> {
    let mut cfg = match config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    cfg.apply_env()?;
    if let Some(port) = port {
        cfg.server_port = port;
    }
    if let Some(contract) = contract {
        cfg.contract_path.clone_from(contract);
    }
    Ok(cfg)
}

/// Route table lines for `check`, most specific first per method.
pub fn route_table(router: &Router) -> Vec<String> {
    let mut lines: Vec<String> = router
        .routes()
        .map(|r| format!("{:<7} {:<40} {}", r.method.as_str(), r.full_path(), r.handler_name))
        .collect();
    lines.sort();
    lines
}

fn check(contract: &Path) -> anyhow::Result<()> {
    let loaded = load_contract(contract, &PackageInfo::current())?;
    let router = Router::new(loaded.routes).context("routing table rejected")?;
    for line in route_table(&router) {
        println!("{line}");
    }
    println!("{} operations OK", router.len());
    Ok(())
}

fn serve(cfg: ServerConfig, echo: bool) -> anyhow::Result<()> {
    let contract = load_contract(&cfg.contract_path, &PackageInfo::current())?;
    let mut app = App::build(cfg, contract)?;
    if echo {
        let names: Vec<String> = app.router().routes().map(|r| r.handler_name.to_string()).collect();
        for name in names {
            if !app.dispatcher_mut().has_handler(&name) {
                // SAFETY: the runtime stack size was applied in main before any spawn.
                unsafe {
                    app.dispatcher_mut().register_handler(&name, echo_handler);
                }
            }
        }
    }

    let running = app.start()?;
    wait_for_shutdown();
    info!("Shutting down");
    running.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "Signal received");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers; running until killed");
            loop {
                std::thread::park();
            }
        }
    }
}

#[cfg(not(unix))]
fn wait_for_shutdown() {
    loop {
        std::thread::park();
    }
}

/// Parse the command line and run the selected command.
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            port,
            contract,
            echo,
        } => {
            let cfg = resolve_config(config.as_ref(), port, contract.as_ref())?;
            serve(cfg, echo)
        }
        Commands::Check { contract } => check(&contract),
    }
}
