pub mod outcome;
pub mod run;
pub mod sensor;
pub mod weather;

pub use outcome::{RejectReason, ValidationOutcome};
pub use run::{
    Invocation, PartitionSummary, RunContext, RunReport, RunStatus, RunWindow, StreamCounts,
    StreamKind,
};
pub use sensor::{CuratedSensorRecord, QualityScore, RawSensorRecord};
pub use weather::{CuratedWeatherRecord, RawWeatherRecord};
