use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::sync::MutexGuard;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{InsertOutcome, Record, RecordFilter};

const RECORD_COLUMNS: &str = "id, type, title, normalized_title, authors, year, source, unique_id,
     search_topic, added_by, added_at, embedding";

pub trait RecordRepository {
    fn find_by_id(&self, id: &Uuid) -> Result<Option<Record>>;
    fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Record>>;
    fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Option<Record>>;
    fn list_all(&self) -> Result<Vec<Record>>;
    fn list_recent(&self, limit: usize) -> Result<Vec<Record>>;
    fn list_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Record>>;
    fn count(&self) -> Result<usize>;
    fn insert(&self, record: &Record) -> Result<InsertOutcome>;
    fn delete_by(&self, filter: &RecordFilter) -> Result<usize>;
}

pub struct SqliteRecordRepository<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> SqliteRecordRepository<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let id_str: String = row.get(0)?;
        let authors_str: String = row.get(4)?;
        let added_at_str: String = row.get(10)?;
        let embedding: Option<Vec<u8>> = row.get(11)?;

        let id = Uuid::parse_str(&id_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        let added_at = DateTime::parse_from_rfc3339(&added_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

        Ok(Record {
            id,
            kind: row.get(1)?,
            title: row.get(2)?,
            normalized_title: row.get(3)?,
            authors: serde_json::from_str(&authors_str).unwrap_or_default(),
            year: row.get(5)?,
            source: row.get(6)?,
            unique_id: row.get(7)?,
            search_topic: row.get(8)?,
            added_by: row.get(9)?,
            added_at,
            embedding: embedding.as_deref().and_then(blob_to_embedding),
        })
    }

    fn query_one(&self, filter_sql: &str, value: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE {filter_sql} LIMIT 1");
        let record = self
            .conn
            .query_row(&sql, params![value], Self::row_to_record)
            .optional()?;
        Ok(record)
    }
}

impl<'a> RecordRepository for SqliteRecordRepository<'a> {
    fn find_by_id(&self, id: &Uuid) -> Result<Option<Record>> {
        self.query_one("id = ?1", &id.to_string())
    }

    fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Record>> {
        self.query_one("unique_id = ?1", unique_id)
    }

    fn find_by_normalized_title(&self, normalized_title: &str) -> Result<Option<Record>> {
        self.query_one("normalized_title = ?1", normalized_title)
    }

    fn list_all(&self) -> Result<Vec<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY added_at ASC, rowid ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY added_at DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE search_topic = ?1
             ORDER BY added_at DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![topic, limit as i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert(&self, record: &Record) -> Result<InsertOutcome> {
        let authors_json = serde_json::to_string(&record.authors)?;
        let embedding = record.embedding.as_deref().map(embedding_to_blob);

        let result = self.conn.execute(
            "INSERT INTO records
                (id, type, title, normalized_title, authors, year, source, unique_id,
                 search_topic, added_by, added_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.to_string(),
                record.kind,
                record.title,
                record.normalized_title,
                authors_json,
                record.year,
                record.source,
                record.unique_id,
                record.search_topic,
                record.added_by,
                record.added_at.to_rfc3339(),
                embedding,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_by(&self, filter: &RecordFilter) -> Result<usize> {
        let deleted = match filter {
            RecordFilter::All => self.conn.execute("DELETE FROM records", [])?,
            RecordFilter::AddedBy(name) => self
                .conn
                .execute("DELETE FROM records WHERE added_by = ?1", params![name])?,
        };
        Ok(deleted)
    }
}

// ─── Embedding blobs ───────────────────────────────────────

/// Little-endian `f32` sequence.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// `None` for a truncated blob or one holding a non-finite component.
pub(crate) fn blob_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let embedding: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if embedding.iter().any(|value| !value.is_finite()) {
        tracing::warn!(dims = embedding.len(), "ignoring stored embedding with non-finite values");
        return None;
    }
    Some(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;
    use crate::storage::database::ConnectionPool;
    use crate::storage::database::run_migrations;

    fn pool() -> ConnectionPool {
        let pool = ConnectionPool::open_in_memory().unwrap();
        run_migrations(&pool.get_connection()).unwrap();
        pool
    }

    fn record(title: &str, unique_id: Option<&str>) -> Record {
        let mut candidate = Candidate::new(title, "alice");
        if let Some(id) = unique_id {
            candidate = candidate.with_unique_id(id);
        }
        candidate.into_record(Utc::now())
    }

    #[test]
    fn insert_and_lookup_by_keys() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        let mut r = record("Deep Learning", Some("isbn-1"));
        r.authors = vec!["Ian Goodfellow".to_string()];
        r.embedding = Some(vec![0.25, -1.5, 3.0]);
        assert_eq!(repo.insert(&r).unwrap(), InsertOutcome::Inserted);

        let by_id = repo.find_by_unique_id("isbn-1").unwrap().unwrap();
        assert_eq!(by_id.id, r.id);
        assert_eq!(by_id.authors, r.authors);
        assert_eq!(by_id.embedding, Some(vec![0.25, -1.5, 3.0]));

        let by_title = repo.find_by_normalized_title("deeplearning").unwrap().unwrap();
        assert_eq!(by_title.id, r.id);
        assert!(repo.find_by_normalized_title("other").unwrap().is_none());
        assert!(repo.find_by_id(&r.id).unwrap().is_some());
    }

    #[test]
    fn insert_reports_conflicts_instead_of_erroring() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        assert_eq!(repo.insert(&record("First", Some("id-1"))).unwrap(), InsertOutcome::Inserted);
        assert_eq!(repo.insert(&record("Second", Some("id-1"))).unwrap(), InsertOutcome::Conflict);
        assert_eq!(repo.insert(&record("First!", None)).unwrap(), InsertOutcome::Conflict);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn records_without_unique_id_coexist() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        assert_eq!(repo.insert(&record("Alpha", None)).unwrap(), InsertOutcome::Inserted);
        assert_eq!(repo.insert(&record("Beta", None)).unwrap(), InsertOutcome::Inserted);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn delete_by_contributor_and_all() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        let mut bob = record("Bob's Book", None);
        bob.added_by = "bob".to_string();
        repo.insert(&record("Alice One", None)).unwrap();
        repo.insert(&record("Alice Two", None)).unwrap();
        repo.insert(&bob).unwrap();

        assert_eq!(repo.delete_by(&RecordFilter::AddedBy("alice".to_string())).unwrap(), 2);
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.delete_by(&RecordFilter::All).unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn list_recent_is_newest_first() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        let mut old = record("Old", None);
        old.added_at = Utc::now() - chrono::Duration::days(1);
        let new = record("New", None);
        repo.insert(&old).unwrap();
        repo.insert(&new).unwrap();

        let recent = repo.list_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "New");

        let all = repo.list_all().unwrap();
        assert_eq!(all[0].title, "Old");
    }

    #[test]
    fn list_by_topic_filters_and_orders() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        let mut older = record("Neural Networks", None);
        older.search_topic = Some("machine learning".to_string());
        older.added_at = Utc::now() - chrono::Duration::days(1);
        let mut newer = record("Deep Learning", None);
        newer.search_topic = Some("machine learning".to_string());
        let mut other = record("Bread Baking", None);
        other.search_topic = Some("cooking".to_string());
        for r in [&older, &newer, &other] {
            repo.insert(r).unwrap();
        }

        let titles: Vec<String> = repo
            .list_by_topic("machine learning", 10)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Deep Learning", "Neural Networks"]);
        assert_eq!(repo.list_by_topic("machine learning", 1).unwrap().len(), 1);
        assert!(repo.list_by_topic("history", 10).unwrap().is_empty());
    }

    #[test]
    fn malformed_blob_is_ignored() {
        assert_eq!(blob_to_embedding(&[1, 2, 3]), None);
        assert_eq!(blob_to_embedding(&[]), None);
        let blob = embedding_to_blob(&[0.5, 2.0]);
        assert_eq!(blob_to_embedding(&blob), Some(vec![0.5, 2.0]));
    }

    #[test]
    fn non_finite_stored_embedding_reads_back_as_none() {
        let pool = pool();
        let repo = SqliteRecordRepository::new(pool.get_connection());

        let mut r = record("Poison", None);
        r.embedding = Some(vec![f32::INFINITY, 1.0]);
        repo.insert(&r).unwrap();

        let loaded = repo.find_by_id(&r.id).unwrap().unwrap();
        assert_eq!(loaded.embedding, None);
        assert_eq!(blob_to_embedding(&embedding_to_blob(&[f32::NAN])), None);
    }
}
