mod connection;
mod migrations;
mod schema;

pub use connection::ConnectionPool;
pub use migrations::{Migration, get_applied_versions, run_migrations};
pub use schema::{SCHEMA_VERSION, init_schema};

use std::path::Path;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{InsertOutcome, Record, RecordFilter, RecordStats};

use super::queries::RecordStatsQuery;
use super::repositories::{RecordRepository, SqliteRecordRepository};

pub fn open_database(path: &Path) -> Result<ConnectionPool> {
    let pool = ConnectionPool::open(path)?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = ConnectionPool::open_in_memory()?;
    {
        let conn = pool.get_connection();
        migrations::run_migrations(&conn)?;
    }
    Ok(pool)
}

/// SQLite-backed record store.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = open_database(path)?;
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let pool = open_in_memory()?;
        Ok(Self { pool })
    }

    pub fn path(&self) -> Option<&str> {
        self.pool.path()
    }

    pub fn schema_versions(&self) -> Result<Vec<u32>> {
        get_applied_versions(&self.pool.get_connection())
    }

    pub fn get_record(&self, id: &Uuid) -> Result<Option<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection()).find_by_id(id)
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection()).find_by_unique_id(unique_id)
    }

    pub fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Option<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection())
            .find_by_normalized_title(normalized_title)
    }

    pub fn list_all(&self) -> Result<Vec<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection()).list_all()
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection()).list_recent(limit)
    }

    /// Newest records filed under `topic`.
    pub fn list_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Record>> {
        SqliteRecordRepository::new(self.pool.get_connection()).list_by_topic(topic, limit)
    }

    pub fn count_records(&self) -> Result<usize> {
        SqliteRecordRepository::new(self.pool.get_connection()).count()
    }

    pub fn insert_record(&self, record: &Record) -> Result<InsertOutcome> {
        SqliteRecordRepository::new(self.pool.get_connection()).insert(record)
    }

    pub fn delete_by(&self, filter: &RecordFilter) -> Result<usize> {
        SqliteRecordRepository::new(self.pool.get_connection()).delete_by(filter)
    }

    pub fn stats(&self) -> Result<RecordStats> {
        RecordStatsQuery::new(self.pool.get_connection()).get_stats()
    }
}
