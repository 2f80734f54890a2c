pub mod cancel;
pub mod constants;
pub mod progress;
pub mod retry;
pub mod timestamp;

pub use cancel::CancellationFlag;
pub use constants::*;
pub use progress::ProgressReporter;
pub use retry::RetryPolicy;
pub use timestamp::{parse_timestamp, partition_dir_name};
