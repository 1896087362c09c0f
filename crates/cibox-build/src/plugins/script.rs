//! Feed a script to a shell over stdin

use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;

use super::{bool_option, env_option, lines_option, string_option};
use crate::error::Result;
use crate::script::Script;
use crate::step::{Step, StepCore};

pub const SCRIPT_PLUGIN: &str = "Script";

/// Runs `script` by piping it into `<shell> -s`
///
/// Suited to long scripts that would not fit an argument list. Accepts the
/// same options as the shell plugin plus `shell` (default `bash`).
pub struct ScriptStep {
    core: StepCore,
    shell: String,
    script: Script,
}

impl ScriptStep {
    pub fn new(core: StepCore, shell: impl Into<String>, script: Script) -> Self {
        Self { core, shell: shell.into(), script }
    }

    pub fn from_options(options: &Value) -> Result<Self> {
        let core = StepCore::from_options(SCRIPT_PLUGIN, options)?;
        let shell = string_option(options, "shell")?.unwrap_or_else(|| "bash".to_string());
        let script = Script::new(lines_option(options, "script")?)
            .with_env(env_option(options)?)
            .with_cwd(string_option(options, "cwd")?)
            .with_errexit(bool_option(options, "errexit", true)?)
            .with_xtrace(bool_option(options, "trace", false)?);

        Ok(Self::new(core, shell, script))
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn script(&self) -> &Script {
        &self.script
    }
}

#[async_trait]
impl Step for ScriptStep {
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
        Ok(vec![self.shell.clone(), "-s".to_string()])
    }

    fn description(&self) -> String {
        format!("{} line script", self.script.lines().len())
    }

    fn stdin(&self) -> Option<Vec<u8>> {
        Some(self.script.render_for_stdin().into_bytes())
    }
}
