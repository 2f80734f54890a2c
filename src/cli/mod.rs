pub mod args;
pub mod commands;
pub mod logging;

pub use args::{Cli, Commands, JobArgs};
pub use commands::run;
