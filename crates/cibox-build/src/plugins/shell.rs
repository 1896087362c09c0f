//! Run a command through `bash -c`

use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;

use super::{bool_option, env_option, lines_option, string_option};
use crate::error::Result;
use crate::script::Script;
use crate::step::{Step, StepCore};

pub const SHELL_PLUGIN: &str = "Shell";

/// Runs `command` (one line or several) as a `bash -c` argument
///
/// Options: `command`, `env`, `cwd`, `errexit` (default `true`) and
/// `trace` (default `false`).
pub struct ShellStep {
    core: StepCore,
    script: Script,
}

impl ShellStep {
    pub fn new(core: StepCore, script: Script) -> Self {
        Self { core, script }
    }

    pub fn from_options(options: &Value) -> Result<Self> {
        let core = StepCore::from_options(SHELL_PLUGIN, options)?;
        let script = Script::new(lines_option(options, "command")?)
            .with_env(env_option(options)?)
            .with_cwd(string_option(options, "cwd")?)
            .with_errexit(bool_option(options, "errexit", true)?)
            .with_xtrace(bool_option(options, "trace", false)?);

        Ok(Self::new(core, script))
    }

    pub fn script(&self) -> &Script {
        &self.script
    }
}

#[async_trait]
impl Step for ShellStep {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn build_command(&self) -> Result<Vec<String>> {
        Ok(vec!["bash".to_string(), "-c".to_string(), self.script.render()])
    }

    fn description(&self) -> String {
        self.script.lines().first().cloned().unwrap_or_default()
    }
}
