//! CLI command implementations

pub mod config;
pub mod run;
pub mod serve;

pub use config::execute as config;
pub use run::execute as run;
pub use serve::execute as serve;
