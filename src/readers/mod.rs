pub mod raw_reader;
pub mod raw_store;

pub use raw_reader::{ingestion_time, RawEvent, RawEvents, RawObject, RawReader};
pub use raw_store::{LocalRawStore, ObjectMeta, RawStore};
