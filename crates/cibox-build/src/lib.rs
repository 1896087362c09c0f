//! Build execution engine for cibox
//!
//! A [`Build`] runs a tree of [`Step`]s inside one container. Leaf steps
//! exec a command; a [`StepList`] runs its children in order. Output from
//! every step is merged into a single build stream, and lifecycle events and
//! status updates bubble up through enclosing lists to the build.

pub mod build;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod factory;
pub mod plugins;
pub mod progress_ui;
pub mod script;
pub mod step;
pub mod step_list;

pub use build::Build;
pub use cibox_docker::ExecResult;
pub use context::{Relay, StepContext};
pub use error::{BuildError, Result, StepFailure};
pub use events::{StatusChange, StepEvent, StepSnapshot};
pub use executor::{exec_in_container, ExecSettings};
pub use factory::{StepConstructor, StepFactory, DEFAULT_PLUGIN};
pub use plugins::{ScriptStep, ShellStep};
pub use progress_ui::{
    spawn_reporter, IndicatifProgressUI, NoOpProgressUI, ProgressUI, ProgressUIFactory,
};
pub use script::Script;
pub use step::{parse_timeout, run_step, Step, StepCore, DEFAULT_TIMEOUT, JSON_ATTRIBUTES};
pub use step_list::{StepList, STEP_LIST_PLUGIN};
