//! CLI command implementations

pub mod init;
pub mod run;
pub mod validate;

pub use init::InitCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;
