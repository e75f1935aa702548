//! calico-dummydp-plugin: enforce policy against the recording dummy dataplane.
//!
//! Runs the same sync loop as the iptables plugin but never touches the host.

use std::process::ExitCode;

use clap::Parser;
use felix_agent::app;
use felix_agent::cli::DummyPluginCli;
use felix_agent::enforcer::Enforcer;
use felix_agent::error::AgentError;
use felix_agent::output::print_error;
use felix_iptables::DummyDataplane;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DummyPluginCli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "calico-dummydp-plugin failed");
            print_error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: DummyPluginCli) -> Result<(), AgentError> {
    let config = app::load_config(&cli.common.config, |c| cli.common.apply_to(c)).await?;
    app::init_observability(&config)?;

    let backend = DummyDataplane::new(config.tag()?);
    let handle = backend.handle();
    let registry = app::builtin_registry();
    let mut enforcer = Enforcer::from_config(&config, &registry, backend)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        enforcer_id = %enforcer.id(),
        once = cli.once,
        "calico-dummydp-plugin starting"
    );
    app::run_enforcer(&mut enforcer, cli.once).await?;

    tracing::info!(
        recorded_calls = handle.calls().await.len(),
        applies = handle.apply_count().await,
        "calico-dummydp-plugin stopped"
    );
    Ok(())
}
