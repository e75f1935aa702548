//! Command-line argument definitions for the agent binaries.
//!
//! Every binary shares [`CommonArgs`]. CLI values take precedence over
//! environment variables, which take precedence over the config file.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use felix_core::config::{DEFAULT_CONFIG_PATH, FelixConfig};

/// Flags accepted by every agent binary.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty)
    #[arg(long)]
    pub log_format: Option<String>,
}

impl CommonArgs {
    /// Apply CLI overrides on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut FelixConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}

/// Output format for reports printed to stdout.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Enforce policy with the iptables dataplane
#[derive(Parser, Debug)]
#[command(name = "calico-iptables-plugin", version, about, long_about = None)]
pub struct IptablesPluginCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Generate rules from the policy model and exit without touching iptables
    #[arg(long, conflicts_with = "once")]
    pub validate: bool,

    /// Run a single sync cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Override PID file path
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Output format for --validate
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl IptablesPluginCli {
    pub fn apply_to(&self, config: &mut FelixConfig) {
        self.common.apply_to(config);
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}

/// Enforce policy with the recording dummy dataplane
#[derive(Parser, Debug)]
#[command(name = "calico-dummydp-plugin", version, about, long_about = None)]
pub struct DummyPluginCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Run a single sync cycle and exit
    #[arg(long)]
    pub once: bool,
}

/// Remove every chain and hook owned by the agent
#[derive(Parser, Debug)]
#[command(name = "calico-cleanup", version, about, long_about = None)]
pub struct CleanupCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Also clean up ip6tables
    #[arg(long, overrides_with = "no_ipv6")]
    pub ipv6: bool,

    /// Only clean up iptables (IPv4)
    #[arg(long, overrides_with = "ipv6")]
    pub no_ipv6: bool,

    /// Chain tag to remove (defaults to dataplane.chain_tag)
    #[arg(long)]
    pub tag: Option<String>,

    /// Output format for the cleanup report
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl CleanupCli {
    /// `Some(true)` for `--ipv6`, `Some(false)` for `--no-ipv6`, otherwise `None`.
    pub fn ipv6_override(&self) -> Option<bool> {
        match (self.ipv6, self.no_ipv6) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    pub fn apply_to(&self, config: &mut FelixConfig) {
        self.common.apply_to(config);
        if let Some(enabled) = self.ipv6_override() {
            config.dataplane.ipv6_enabled = enabled;
        }
        if let Some(tag) = &self.tag {
            config.dataplane.chain_tag.clone_from(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definitions_are_consistent() {
        IptablesPluginCli::command().debug_assert();
        DummyPluginCli::command().debug_assert();
        CleanupCli::command().debug_assert();
    }

    #[test]
    fn config_defaults_to_etc_calico() {
        let cli = DummyPluginCli::try_parse_from(["calico-dummydp-plugin"]).unwrap();
        assert_eq!(cli.common.config, PathBuf::from("/etc/calico/felix.toml"));
        assert!(!cli.once);
    }

    #[test]
    fn short_config_flag() {
        let cli =
            DummyPluginCli::try_parse_from(["calico-dummydp-plugin", "-c", "/tmp/f.toml", "--once"])
                .unwrap();
        assert_eq!(cli.common.config, PathBuf::from("/tmp/f.toml"));
        assert!(cli.once);
    }

    #[test]
    fn validate_conflicts_with_once() {
        let result = IptablesPluginCli::try_parse_from([
            "calico-iptables-plugin",
            "--validate",
            "--once",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn last_ipv6_flag_wins() {
        let cli =
            CleanupCli::try_parse_from(["calico-cleanup", "--ipv6", "--no-ipv6"]).unwrap();
        assert_eq!(cli.ipv6_override(), Some(false));

        let cli =
            CleanupCli::try_parse_from(["calico-cleanup", "--no-ipv6", "--ipv6"]).unwrap();
        assert_eq!(cli.ipv6_override(), Some(true));

        let cli = CleanupCli::try_parse_from(["calico-cleanup"]).unwrap();
        assert_eq!(cli.ipv6_override(), None);
    }

    #[test]
    fn cli_overrides_config_values() {
        let cli = CleanupCli::try_parse_from([
            "calico-cleanup",
            "--tag",
            "fx-",
            "--ipv6",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut config = FelixConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config.dataplane.chain_tag, "fx-");
        assert!(config.dataplane.ipv6_enabled);
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn pid_file_override() {
        let cli = IptablesPluginCli::try_parse_from([
            "calico-iptables-plugin",
            "--pid-file",
            "/run/felix.pid",
        ])
        .unwrap();
        let mut config = FelixConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config.general.pid_file, "/run/felix.pid");
        assert_eq!(cli.output, OutputFormat::Text);
    }
}
