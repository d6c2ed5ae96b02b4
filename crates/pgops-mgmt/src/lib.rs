//! pgops operator surface: CLI, runtime settings, configuration
//! reconciliation, and system requirement checks.

pub mod check;
pub mod cli;
pub mod reconcile;
pub mod settings;

pub use cli::Cli;
pub use settings::Settings;
