use clap::Parser;
use mediagate::cli::{run_cli, Cli};
use mediagate::config::RuntimeConfig;
use mediagate::logging::{init_logging, LogConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // keep the guard so buffered log lines are flushed on exit
    let _log_guard = init_logging(&LogConfig::from_env())?;

    let runtime = RuntimeConfig::from_env();
    runtime.apply();
    tracing::debug!(stack_size = runtime.stack_size, "Coroutine runtime configured");

    run_cli(cli)
}
