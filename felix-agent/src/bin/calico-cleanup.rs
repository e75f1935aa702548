//! calico-cleanup: remove every chain and hook owned by the agent.
//!
//! Safe to run on a host where the agent never ran, and safe to run twice.

use std::process::ExitCode;

use clap::Parser;
use felix_agent::app::{self, ConfigSource};
use felix_agent::cli::CleanupCli;
use felix_agent::error::AgentError;
use felix_agent::output::{CleanupSummary, OutputWriter, print_error};
use felix_iptables::{CommandRunner, IptablesBackend};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CleanupCli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "calico-cleanup failed");
            print_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: CleanupCli) -> Result<(), AgentError> {
    let (config, source) =
        app::load_config_or_default(&cli.common.config, |c| cli.apply_to(c)).await?;
    felix_agent::logging::init_tracing(&config.general)?;
    if source == ConfigSource::Defaults {
        tracing::warn!(
            path = %cli.common.config.display(),
            "config file not found, using defaults"
        );
    }

    let backend = IptablesBackend::new(
        CommandRunner::from_config(&config.dataplane),
        config.tag()?,
        config.ip_versions(),
    );
    let report = app::cleanup(backend).await?;
    OutputWriter::new(cli.output).render(&CleanupSummary::from(&report))?;
    Ok(())
}
