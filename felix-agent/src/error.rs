//! Agent error type and exit code mapping

use felix_core::error::{
    ApplyError, ConfigError, FelixError, GenerationError, ModelLoadError, PluginError,
};

use crate::jitter::ZeroIntervalError;

/// Errors surfaced by the agent binaries.
///
/// Library errors are folded into a handful of categories so that each one
/// maps to a stable process exit code.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Configuration loading, validation or generator resolution failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// The policy model file could not be read or parsed.
    #[error("policy model error: {0}")]
    Model(#[from] ModelLoadError),

    /// The generator rejected the policy model.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// The dataplane backend failed to apply or remove rules.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Anything else (logging setup, metrics listener, PID file, signals).
    #[error("{0:#}")]
    Runtime(#[from] anyhow::Error),
}

impl AgentError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                         |
    /// |------|---------------------------------|
    /// | 0    | Success                         |
    /// | 1    | Apply or runtime failure        |
    /// | 2    | Configuration error             |
    /// | 3    | Policy model / generation error |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Model(_) | Self::Generation(_) => 3,
            Self::Apply(_) | Self::Runtime(_) => 1,
        }
    }
}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<PluginError> for AgentError {
    fn from(e: PluginError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<ZeroIntervalError> for AgentError {
    fn from(e: ZeroIntervalError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<FelixError> for AgentError {
    fn from(e: FelixError) -> Self {
        match e {
            FelixError::Config(e) => e.into(),
            FelixError::Plugin(e) => e.into(),
            FelixError::ModelLoad(e) => Self::Model(e),
            FelixError::Generation(e) => Self::Generation(e),
            FelixError::Apply(e) => Self::Apply(e),
            FelixError::Io(e) => Self::Runtime(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_exit_with_2() {
        let err: AgentError = ConfigError::InvalidValue {
            field: "dataplane.chain_tag".to_owned(),
            reason: "too long".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("dataplane.chain_tag"));
    }

    #[test]
    fn unresolved_generator_is_a_config_error() {
        let err: AgentError = PluginError::NotFound {
            namespace: "iptables_generator".to_owned(),
            name: "nope".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn generation_and_model_errors_exit_with_3() {
        let err: AgentError = GenerationError::malformed("policy 'web'", "duplicate name").into();
        assert_eq!(err.exit_code(), 3);

        let err: AgentError = ModelLoadError::Parse {
            path: "/etc/calico/policy.toml".to_owned(),
            reason: "expected table".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn apply_and_runtime_errors_exit_with_1() {
        let err: AgentError = ApplyError::PermissionDenied("iptables-restore".to_owned()).into();
        assert_eq!(err.exit_code(), 1);

        let err: AgentError = anyhow::anyhow!("failed to bind metrics listener").into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn felix_error_keeps_its_category() {
        let err: AgentError = FelixError::from(ConfigError::FileNotFound {
            path: "/etc/calico/felix.toml".to_owned(),
        })
        .into();
        assert!(matches!(err, AgentError::Config(_)));

        let err: AgentError = FelixError::from(std::io::Error::other("disk gone")).into();
        assert_eq!(err.exit_code(), 1);
    }
}
