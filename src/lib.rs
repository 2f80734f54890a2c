pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod monitoring;
pub mod processors;
pub mod readers;
pub mod utils;
pub mod writers;

pub use config::JobConfig;
pub use error::{ProcessingError, Result};
pub use processors::JobOrchestrator;
