use tracing::debug;

use crate::config::DeployConfig;
use crate::error::ConfigError;

/// Settings that must be present before anything touches the device.
pub const DEPLOY_REQUIREMENTS: &[&str] = &["target.host", "target.temp_path", "target.service"];

/// Checks required configuration before destructive or network-bound work.
pub struct EnvironmentGate<'a> {
    config: &'a DeployConfig,
}

impl<'a> EnvironmentGate<'a> {
    pub fn new(config: &'a DeployConfig) -> Self {
        Self { config }
    }

    /// Fails on the first required setting that is unknown, unset or blank.
    pub fn check(&self, required: &[&str]) -> Result<(), ConfigError> {
        for name in required {
            let present = self
                .config
                .setting(name)
                .is_some_and(|value| !value.trim().is_empty());
            if !present {
                return Err(ConfigError::MissingRequired((*name).to_string()));
            }
        }
        debug!(?required, "Environment gate passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_missing() {
        let config = DeployConfig::default();
        let err = EnvironmentGate::new(&config)
            .check(DEPLOY_REQUIREMENTS)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(name) if name == "target.host"));
    }

    #[test]
    fn blank_value_is_missing() {
        let mut config = DeployConfig::default();
        config.target.host = "10.0.0.2".into();
        config.target.service = "   ".into();
        let err = EnvironmentGate::new(&config)
            .check(DEPLOY_REQUIREMENTS)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(name) if name == "target.service"));
    }

    #[test]
    fn passes_when_all_present() {
        let mut config = DeployConfig::default();
        config.target.host = "vista.local".into();
        assert!(EnvironmentGate::new(&config).check(DEPLOY_REQUIREMENTS).is_ok());
        assert!(EnvironmentGate::new(&config).check(&[]).is_ok());
    }
}
