pub mod deriver;
pub mod orchestrator;
pub mod parallel_processor;
pub mod pseudonymizer;
pub mod run_slot;
pub mod validator;

pub use deriver::{celsius_to_fahrenheit, quality_score, ColumnDeriver};
pub use orchestrator::JobOrchestrator;
pub use parallel_processor::{ParallelProcessor, PartitionOutcome};
pub use pseudonymizer::Pseudonymizer;
pub use run_slot::{LeaseInfo, RunSlot, RunSlotGuard};
pub use validator::SchemaValidator;
