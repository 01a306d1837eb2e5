use rusqlite::Connection;
use std::sync::MutexGuard;

use crate::error::Result;
use crate::models::RecordStats;

const TOP_TOPICS: usize = 10;

pub struct RecordStatsQuery<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl<'a> RecordStatsQuery<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    pub fn get_stats(&self) -> Result<RecordStats> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| {
                row.get::<_, i64>(0).map(|n| n as usize)
            })?;

        let with_embedding: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE embedding IS NOT NULL",
            [],
            |row| row.get::<_, i64>(0).map(|n| n as usize),
        )?;

        Ok(RecordStats {
            total,
            with_embedding,
            by_contributor: self.grouped(
                "SELECT added_by, COUNT(*) FROM records
                 GROUP BY added_by ORDER BY COUNT(*) DESC, added_by ASC",
            )?,
            by_type: self.grouped(
                "SELECT type, COUNT(*) FROM records
                 GROUP BY type ORDER BY COUNT(*) DESC, type ASC",
            )?,
            top_topics: self.grouped(&format!(
                "SELECT search_topic, COUNT(*) FROM records
                 WHERE search_topic IS NOT NULL
                 GROUP BY search_topic ORDER BY COUNT(*) DESC, search_topic ASC
                 LIMIT {TOP_TOPICS}"
            ))?,
        })
    }

    fn grouped(&self, sql: &str) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
