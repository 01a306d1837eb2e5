use crate::error::Result;
use crate::models::{InsertOutcome, Record, RecordFilter};
use crate::storage::database::Database;

/// Persistent collection of canonical records, as seen by the duplicate engine.
///
/// `insert` must enforce the unique-id and normalized-title constraints
/// itself and report [`InsertOutcome::Conflict`] when they would be
/// violated, regardless of what the caller looked up beforehand.
pub trait RecordStore: Send + Sync {
    fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Record>>;
    fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Option<Record>>;
    fn all_records(&self) -> Result<Vec<Record>>;
    fn insert(&self, record: &Record) -> Result<InsertOutcome>;
    fn delete_by(&self, filter: &RecordFilter) -> Result<usize>;
}

impl RecordStore for Database {
    fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Record>> {
        Database::find_by_unique_id(self, unique_id)
    }

    fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Option<Record>> {
        Database::find_by_normalized_title(self, normalized_title)
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        self.list_all()
    }

    fn insert(&self, record: &Record) -> Result<InsertOutcome> {
        self.insert_record(record)
    }

    fn delete_by(&self, filter: &RecordFilter) -> Result<usize> {
        Database::delete_by(self, filter)
    }
}
