//! Configuration management for cibox
//!
//! This crate handles YAML build configuration parsing, validation,
//! and environment variable substitution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cibox_core::error::{Error, Result};
use cibox_docker::{ContainerSpec, PullPolicy, VolumeMount};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "cibox.yaml";

/// Starter configuration written by `cibox init`
pub const STARTER_CONFIG: &str = r#"# cibox build configuration
name: my-build
image: ubuntu:22.04
pull: if-not-present
working_dir: /workspace
env:
  CI: "true"
volumes:
  - source: .
    target: /workspace
steps:
  - name: info
    command: uname -a
  - name: build
    plugin: Script
    timeout: 600000
    script:
      - echo "building in $PWD"
      - ls -la
  - name: checks
    plugin: StepList
    steps:
      - name: lint
        command: echo lint
        continueOnFailure: true
      - name: test
        command: echo test
"#;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Build name, used for the root step list
    #[serde(default = "default_name")]
    pub name: String,

    /// Container image the build runs in
    pub image: String,

    /// When to pull the image
    #[serde(default)]
    pub pull: PullPolicy,

    /// Container environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Container working directory
    #[serde(default)]
    pub working_dir: Option<String>,

    /// User the container runs as
    #[serde(default)]
    pub user: Option<String>,

    /// Host directories mounted into the container
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,

    /// Retries for transient exec-creation failures
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Write the build output as JSON lines to this file
    #[serde(default)]
    pub transcript: Option<PathBuf>,

    /// Step declarations, handed to the step factory
    #[serde(default)]
    pub steps: Vec<Value>,
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Host path, relative to the configuration file
    pub source: PathBuf,

    /// Path inside the container
    pub target: String,

    #[serde(default)]
    pub read_only: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigError {
            message: format!("Failed to read config file {path:?}: {e}"),
        })?;

        let base_dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let config = Self::parse(&content, base_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text, resolving relative paths against `base_dir`
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError { message: format!("Failed to parse YAML: {e}") })?;

        config.expand_env_vars()?;
        config.resolve_paths(base_dir);

        Ok(config)
    }

    /// Expand environment variables in the image, env values and paths
    fn expand_env_vars(&mut self) -> Result<()> {
        self.image = expand_vars(&self.image)?;

        for value in self.env.values_mut() {
            *value = expand_vars(value)?;
        }

        for volume in &mut self.volumes {
            volume.source = PathBuf::from(expand_vars(&volume.source.to_string_lossy())?);
        }

        if let Some(transcript) = &self.transcript {
            self.transcript = Some(PathBuf::from(expand_vars(&transcript.to_string_lossy())?));
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for volume in &mut self.volumes {
            if volume.source.is_relative() {
                volume.source = base_dir.join(&volume.source);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::config("Docker image name cannot be empty"));
        }

        if self.steps.is_empty() {
            return Err(Error::config("At least one step must be declared"));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if !step.is_object() {
                return Err(Error::config(format!("Step {} must be a mapping", index + 1)));
            }
        }

        for volume in &self.volumes {
            if !volume.source.exists() {
                return Err(Error::config(format!(
                    "Volume source does not exist: {:?}",
                    volume.source
                )));
            }
            if !volume.target.starts_with('/') {
                return Err(Error::config(format!(
                    "Volume target must be an absolute path: {}",
                    volume.target
                )));
            }
        }

        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Container specification for the build container
    pub fn container_spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.image.clone());

        for (key, value) in &self.env {
            spec = spec.with_env(key.clone(), value.clone());
        }
        for volume in &self.volumes {
            spec = spec.with_volume(VolumeMount {
                host_path: volume.source.clone(),
                container_path: volume.target.clone(),
                read_only: volume.read_only,
            });
        }
        if let Some(dir) = &self.working_dir {
            spec = spec.with_working_dir(dir.clone());
        }
        if let Some(user) = &self.user {
            spec = spec.with_user(user.clone());
        }

        spec
    }
}

/// Expand `${VAR}` and `$VAR` references from the process environment
pub fn expand_vars(input: &str) -> Result<String> {
    let env_var_re = Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| Error::config(format!("Invalid variable pattern: {e}")))?;

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for cap in env_var_re.captures_iter(input) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1).or_else(|| cap.get(2))) else {
            continue;
        };
        let value = std::env::var(name.as_str()).map_err(|_| Error::ConfigError {
            message: format!("Environment variable not found: {}", name.as_str()),
        })?;

        result.push_str(&input[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}

fn default_name() -> String {
    "build".to_string()
}

fn default_retries() -> u32 {
    cibox_docker::DEFAULT_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    cibox_docker::DEFAULT_RETRY_DELAY.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::env;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_expand_vars() {
        env::set_var("CIBOX_TEST_ROOT", "/test/path");

        assert_eq!(expand_vars("${CIBOX_TEST_ROOT}/sub").unwrap(), "/test/path/sub");
        assert_eq!(expand_vars("$CIBOX_TEST_ROOT/sub").unwrap(), "/test/path/sub");
        assert_eq!(expand_vars("plain").unwrap(), "plain");
        assert!(expand_vars("${CIBOX_TEST_SURELY_UNSET}").is_err());
    }

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse(
            "image: alpine:3\nsteps:\n  - command: echo hi\n",
            Path::new("/tmp"),
        )
        .unwrap();

        assert_eq!(config.name, "build");
        assert_eq!(config.pull, PullPolicy::IfNotPresent);
        assert_eq!(config.retries, cibox_docker::DEFAULT_RETRIES);
        assert_eq!(config.retry_delay(), cibox_docker::DEFAULT_RETRY_DELAY);
        assert!(config.transcript.is_none());
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0]["command"], "echo hi");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_steps_keep_json_shape() {
        let config = Config::parse(
            "image: alpine\nsteps:\n  - name: slow\n    timeout: 1500\n    optional: true\n",
            Path::new("."),
        )
        .unwrap();

        assert_eq!(config.steps[0]["timeout"], 1500);
        assert_eq!(config.steps[0]["optional"], true);
    }

    #[test]
    fn test_validation_errors() {
        let base = Path::new("/tmp");

        let config = Config::parse("image: ''\nsteps:\n  - command: x\n", base).unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("image: alpine\n", base).unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("image: alpine\nsteps:\n  - echo\n", base).unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse(
            "image: alpine\nsteps:\n  - command: x\nvolumes:\n  - source: /definitely/not/here\n    target: /w\n",
            base,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_resolves_volumes() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("src")).unwrap();
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "image: alpine:3\nvolumes:\n  - source: src\n    target: /src\n    read_only: true\nsteps:\n  - command: ls /src\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.volumes[0].source, temp_dir.path().join("src"));

        let spec = config.container_spec();
        assert_eq!(spec.image, "alpine:3");
        assert!(spec.volumes[0].read_only);
        assert_eq!(spec.volumes[0].container_path, "/src");
    }

    #[test]
    fn test_starter_config_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, STARTER_CONFIG).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.name, "my-build");
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.container_spec().environment.get("CI").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/cibox.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
