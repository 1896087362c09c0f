//! Step factory: turn declarations into step objects

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{BuildError, Result};
use crate::plugins::script::SCRIPT_PLUGIN;
use crate::plugins::shell::SHELL_PLUGIN;
use crate::plugins::{ScriptStep, ShellStep};
use crate::step::Step;
use crate::step_list::{StepList, STEP_LIST_PLUGIN};

/// Plugin used when a declaration names none
pub const DEFAULT_PLUGIN: &str = SHELL_PLUGIN;

/// Constructor registered for a plugin name
///
/// The factory is passed along so composite steps can build their children.
pub type StepConstructor = fn(&Value, &StepFactory) -> Result<Box<dyn Step>>;

/// Registry of step plugins by name
#[derive(Clone)]
pub struct StepFactory {
    plugins: HashMap<String, StepConstructor>,
}

impl StepFactory {
    /// Create a factory without any plugins
    pub fn empty() -> Self {
        Self { plugins: HashMap::new() }
    }

    /// Create a factory with the built-in plugins registered
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(SHELL_PLUGIN, |options, _| Ok(Box::new(ShellStep::from_options(options)?)));
        factory.register(SCRIPT_PLUGIN, |options, _| Ok(Box::new(ScriptStep::from_options(options)?)));
        factory.register(STEP_LIST_PLUGIN, build_step_list);
        factory
    }

    /// Register or replace a plugin
    pub fn register(&mut self, name: impl Into<String>, constructor: StepConstructor) {
        self.plugins.insert(name.into(), constructor);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered plugin names, sorted
    pub fn plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct one step
    ///
    /// The plugin is read from `plugin`, then the legacy `type` key, and
    /// defaults to the shell plugin.
    pub fn create(&self, declaration: &Value) -> Result<Box<dyn Step>> {
        let plugin = plugin_name(declaration)?;
        let constructor =
            self.plugins.get(plugin).ok_or_else(|| BuildError::UnknownPlugin(plugin.to_string()))?;

        debug!(plugin = %plugin, "Creating step");
        constructor(declaration, self)
    }

    /// Construct steps in declaration order
    pub fn create_all(&self, declarations: &[Value]) -> Result<Vec<Box<dyn Step>>> {
        declarations.iter().map(|declaration| self.create(declaration)).collect()
    }

    /// Wrap a list of declarations in a root step list
    pub fn create_list(&self, name: &str, declarations: &[Value]) -> Result<StepList> {
        let steps = self.create_all(declarations)?;
        StepList::from_options(&serde_json::json!({ "name": name }), steps)
    }
}

impl Default for StepFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StepFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepFactory").field("plugins", &self.plugins()).finish()
    }
}

fn plugin_name(declaration: &Value) -> Result<&str> {
    if !declaration.is_object() {
        return Err(BuildError::invalid("step declarations must be mappings"));
    }

    for key in ["plugin", "type"] {
        match declaration.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(name)) => return Ok(name),
            Some(other) => {
                return Err(BuildError::invalid(format!("{key} must be a string, got {other}")))
            }
        }
    }

    Ok(DEFAULT_PLUGIN)
}

fn build_step_list(options: &Value, factory: &StepFactory) -> Result<Box<dyn Step>> {
    let children = match options.get("steps") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(declarations)) => factory.create_all(declarations)?,
        Some(other) => {
            return Err(BuildError::invalid(format!("steps must be a list, got {other}")))
        }
    };

    Ok(Box::new(StepList::from_options(options, children)?))
}
