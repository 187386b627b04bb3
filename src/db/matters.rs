use rusqlite::{params, OptionalExtension, Row};
use unicode_normalization::UnicodeNormalization;

use super::*;
use crate::types::matter_id;

fn matter_from_row(row: &Row<'_>) -> rusqlite::Result<MatterRow> {
    Ok(MatterRow {
        id: row.get(0)?,
        banana: row.get(1)?,
        matter_number: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
    })
}

/// NFKC-normalize, then collapse whitespace runs and trim. Vendor titles
/// arrive with layout artifacts (`"ORDINANCE   2025-19\n  Amending…"`) and
/// fullwidth or ligature characters pasted straight out of PDFs.
pub fn normalize_matter_title(raw: &str) -> String {
    raw.nfkc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Store {
    // =========================================================================
    // Matters
    // =========================================================================

    /// Upsert a matter by `(banana, matter_number)`. The first title seen
    /// wins; later appearances only bump `updated_at`.
    pub fn upsert_matter(
        &self,
        banana: &str,
        matter_number: &str,
        title: &str,
    ) -> Result<String, DbError> {
        let id = matter_id(banana, matter_number);
        let now = now_str();
        self.conn.execute(
            "INSERT INTO city_matters (id, banana, matter_number, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(banana, matter_number) DO UPDATE SET updated_at = excluded.updated_at",
            params![id, banana, matter_number, normalize_matter_title(title), now],
        )?;
        Ok(id)
    }

    pub fn get_matter(&self, id: &str) -> Result<Option<MatterRow>, DbError> {
        self.conn
            .query_row(
                "SELECT id, banana, matter_number, title, summary FROM city_matters WHERE id = ?1",
                params![id],
                matter_from_row,
            )
            .optional()
            .map_err(DbError::Sqlite)
    }

    /// Link a matter to the agenda item it appeared on. Idempotent.
    pub fn record_matter_appearance(
        &self,
        matter_id_val: &str,
        meeting_id_val: &str,
        item_id_val: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO matter_appearances (matter_id, meeting_id, item_id)
             VALUES (?1, ?2, ?3)",
            params![matter_id_val, meeting_id_val, item_id_val],
        )?;
        Ok(())
    }

    pub fn record_matter_summary(&self, id: &str, summary: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE city_matters SET summary = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, summary, now_str()],
        )?;
        Ok(())
    }

    /// Item ids a matter has appeared on, across meetings.
    pub fn matter_item_ids(&self, matter_id_val: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id FROM matter_appearances WHERE matter_id = ?1 ORDER BY item_id",
        )?;
        let rows = stmt.query_map(params![matter_id_val], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
