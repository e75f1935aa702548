//! iptables command abstraction for testability.
//!
//! The [`IptablesRunner`] trait covers the two commands the backend needs:
//! reading a table with `iptables-save` and committing a transaction with
//! `iptables-restore --noflush`. Production code uses [`CommandRunner`], tests use
//! [`SimulatedIptables`](crate::sim::SimulatedIptables).
//!
//! ```text
//!   IptablesBackend
//!         │
//!         ▼
//!   IptablesRunner (trait)
//!     │          │
//!     ▼          ▼
//! CommandRunner  SimulatedIptables
//!     │
//!     ▼
//! iptables-save / iptables-restore (ip6tables-* for IPv6)
//! ```

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use felix_core::config::DataplaneConfig;
use felix_core::types::IpVersion;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunnerError;

/// Runs iptables-save and iptables-restore for one IP version.
///
/// The trait is `Send + Sync + 'static` so a backend holding a runner can be
/// moved into async tasks.
pub trait IptablesRunner: Send + Sync + 'static {
    /// Returns `iptables-save -t <table>` output.
    fn save(
        &self,
        ip_version: IpVersion,
        table: &str,
    ) -> impl Future<Output = Result<String, RunnerError>> + Send;

    /// Feeds `script` to `iptables-restore --noflush`.
    ///
    /// The script is committed atomically per table or not at all.
    fn restore(
        &self,
        ip_version: IpVersion,
        script: &str,
    ) -> impl Future<Output = Result<(), RunnerError>> + Send;
}

/// Binary names or paths of the iptables tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPaths {
    pub iptables_save: String,
    pub iptables_restore: String,
    pub ip6tables_save: String,
    pub ip6tables_restore: String,
}

impl CommandPaths {
    fn save(&self, ip_version: IpVersion) -> &str {
        match ip_version {
            IpVersion::V4 => &self.iptables_save,
            IpVersion::V6 => &self.ip6tables_save,
        }
    }

    fn restore(&self, ip_version: IpVersion) -> &str {
        match ip_version {
            IpVersion::V4 => &self.iptables_restore,
            IpVersion::V6 => &self.ip6tables_restore,
        }
    }
}

impl Default for CommandPaths {
    fn default() -> Self {
        Self::from(&DataplaneConfig::default())
    }
}

impl From<&DataplaneConfig> for CommandPaths {
    fn from(config: &DataplaneConfig) -> Self {
        Self {
            iptables_save: config.iptables_save.clone(),
            iptables_restore: config.iptables_restore.clone(),
            ip6tables_save: config.ip6tables_save.clone(),
            ip6tables_restore: config.ip6tables_restore.clone(),
        }
    }
}

/// Spawns the real iptables binaries through `tokio::process`.
///
/// Every command runs under a timeout; a timed out child is killed.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    paths: CommandPaths,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(paths: CommandPaths, timeout: Duration) -> Self {
        Self { paths, timeout }
    }

    /// Builds a runner from the `[dataplane]` config section.
    pub fn from_config(config: &DataplaneConfig) -> Self {
        Self::new(CommandPaths::from(config), config.command_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, RunnerError> {
        debug!(program, ?args, "running iptables command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                program: program.to_owned(),
                reason: e.to_string(),
            })?;

        let input = stdin.map(|s| s.as_bytes().to_vec());
        let mut pipe = child.stdin.take();
        let io = async move {
            if let (Some(pipe), Some(input)) = (pipe.as_mut(), input) {
                pipe.write_all(&input).await?;
                pipe.shutdown().await?;
            }
            drop(pipe);
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, io).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RunnerError::Spawn {
                    program: program.to_owned(),
                    reason: e.to_string(),
                });
            }
            Err(_elapsed) => {
                return Err(RunnerError::Timeout {
                    program: program.to_owned(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(RunnerError::Failed {
                program: program.to_owned(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| RunnerError::InvalidOutput {
            program: program.to_owned(),
        })
    }
}

impl IptablesRunner for CommandRunner {
    async fn save(&self, ip_version: IpVersion, table: &str) -> Result<String, RunnerError> {
        self.run(self.paths.save(ip_version), &["-t", table], None)
            .await
    }

    async fn restore(&self, ip_version: IpVersion, script: &str) -> Result<(), RunnerError> {
        self.run(self.paths.restore(ip_version), &["--noflush"], Some(script))
            .await
            .map(|_| ())
    }
}
