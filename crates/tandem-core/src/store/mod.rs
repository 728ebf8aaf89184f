//! Local store for Tandem records

mod connection;
mod migrations;
mod records;

pub use connection::{LocalStore, StoreBatch};
pub use records::{NewConflict, RecordRepository, SqliteRecordRepository, StateCounts};
