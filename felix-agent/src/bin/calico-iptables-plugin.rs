//! calico-iptables-plugin: enforce policy with the iptables dataplane.

use std::process::ExitCode;

use clap::Parser;
use felix_agent::app;
use felix_agent::cli::IptablesPluginCli;
use felix_agent::enforcer::Enforcer;
use felix_agent::error::AgentError;
use felix_agent::output::{OutputWriter, print_error};
use felix_agent::pid::PidFile;
use felix_iptables::{CommandRunner, IptablesBackend};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = IptablesPluginCli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "calico-iptables-plugin failed");
            print_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: IptablesPluginCli) -> Result<(), AgentError> {
    let config = app::load_config(&cli.common.config, |c| cli.apply_to(c)).await?;
    let registry = app::builtin_registry();

    if cli.validate {
        felix_agent::logging::init_tracing(&config.general)?;
        let report = app::validate_policy(&config, &registry).await?;
        OutputWriter::new(cli.output).render(&report)?;
        return Ok(());
    }

    app::init_observability(&config)?;

    let _pid_file = if config.general.pid_file.is_empty() {
        None
    } else {
        Some(PidFile::acquire(&config.general.pid_file)?)
    };

    let backend = IptablesBackend::new(
        CommandRunner::from_config(&config.dataplane),
        config.tag()?,
        config.ip_versions(),
    );
    let mut enforcer = Enforcer::from_config(&config, &registry, backend)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        enforcer_id = %enforcer.id(),
        once = cli.once,
        "calico-iptables-plugin starting"
    );
    app::run_enforcer(&mut enforcer, cli.once).await?;

    let stats = enforcer.stats();
    tracing::info!(
        syncs = stats.syncs,
        applies = stats.applies,
        skipped = stats.skipped,
        generation_failures = stats.generation_failures,
        "calico-iptables-plugin stopped"
    );
    Ok(())
}
