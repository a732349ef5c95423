use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_datetime, parse_file_type, to_i64, to_u64},
    models::ContentIndex,
    Database,
};

const INDEX_COLUMNS: &str = "id, file_path, project_path, relative_path, file_name, file_extension, content, content_hash, line_count, file_size, file_type, language, last_modified, last_indexed, is_stale, indexing_failed, failure_reason";

fn row_to_entry(row: &Row) -> Result<ContentIndex> {
    let line_count: i64 = row.get("line_count")?;
    let file_size: i64 = row.get("file_size")?;
    let file_type: String = row.get("file_type")?;
    let last_modified: String = row.get("last_modified")?;
    let last_indexed: String = row.get("last_indexed")?;
    let is_stale: i64 = row.get("is_stale")?;
    let indexing_failed: i64 = row.get("indexing_failed")?;

    Ok(ContentIndex {
        id: row.get("id")?,
        file_path: row.get("file_path")?,
        project_path: row.get("project_path")?,
        relative_path: row.get("relative_path")?,
        file_name: row.get("file_name")?,
        file_extension: row.get("file_extension")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        line_count: to_u64(line_count, "line_count")?,
        file_size: to_u64(file_size, "file_size")?,
        file_type: parse_file_type(&file_type)?,
        language: row.get("language")?,
        last_modified: parse_datetime(&last_modified, "last_modified")?,
        last_indexed: parse_datetime(&last_indexed, "last_indexed")?,
        is_stale: is_stale != 0,
        indexing_failed: indexing_failed != 0,
        failure_reason: row.get("failure_reason")?,
    })
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl Database {
    pub async fn get_content_index(&self, file_path: &str) -> Result<Option<ContentIndex>> {
        let file_path = file_path.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {INDEX_COLUMNS} FROM content_index WHERE file_path = ?1");
            let entry = conn
                .query_row(&sql, params![file_path], |row| Ok(row_to_entry(row)))
                .optional()?
                .transpose()?;
            Ok(entry)
        })
        .await
    }

    /// Inserts the entry, or updates the row already holding its path. The
    /// stored id is kept on update so a path keeps one identity.
    pub async fn upsert_content_index(&self, entry: &ContentIndex) -> Result<()> {
        let record = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO content_index (id, file_path, project_path, relative_path, file_name, file_extension, content, content_hash, line_count, file_size, file_type, language, last_modified, last_indexed, is_stale, indexing_failed, failure_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(file_path) DO UPDATE SET
                     project_path = excluded.project_path,
                     relative_path = excluded.relative_path,
                     file_name = excluded.file_name,
                     file_extension = excluded.file_extension,
                     content = excluded.content,
                     content_hash = excluded.content_hash,
                     line_count = excluded.line_count,
                     file_size = excluded.file_size,
                     file_type = excluded.file_type,
                     language = excluded.language,
                     last_modified = excluded.last_modified,
                     last_indexed = excluded.last_indexed,
                     is_stale = excluded.is_stale,
                     indexing_failed = excluded.indexing_failed,
                     failure_reason = excluded.failure_reason",
                params![
                    record.id,
                    record.file_path,
                    record.project_path,
                    record.relative_path,
                    record.file_name,
                    record.file_extension,
                    record.content,
                    record.content_hash,
                    to_i64(record.line_count)?,
                    to_i64(record.file_size)?,
                    record.file_type.as_str(),
                    record.language,
                    record.last_modified.to_rfc3339(),
                    record.last_indexed.to_rfc3339(),
                    record.is_stale as i64,
                    record.indexing_failed as i64,
                    record.failure_reason,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Flags an existing entry as failed without touching its content.
    pub async fn mark_index_failure(&self, file_path: &str, reason: &str) -> Result<bool> {
        let file_path = file_path.to_string();
        let reason = reason.to_string();
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE content_index
                 SET indexing_failed = 1,
                     failure_reason = ?1
                 WHERE file_path = ?2",
                params![reason, file_path],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    pub async fn mark_content_stale(&self, file_path: &str) -> Result<bool> {
        let file_path = file_path.to_string();
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE content_index SET is_stale = 1 WHERE file_path = ?1",
                params![file_path],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// Marks every entry of `project_path` whose file was not seen in the
    /// latest scan as stale. Returns how many entries changed.
    pub async fn mark_unseen_stale(
        &self,
        project_path: &str,
        seen_paths: HashSet<String>,
    ) -> Result<u64> {
        let project_path = project_path.to_string();
        self.execute(move |conn| {
            let known: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT file_path FROM content_index
                     WHERE project_path = ?1 AND is_stale = 0",
                )?;
                let rows = stmt
                    .query_map(params![project_path], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let tx = conn.transaction()?;
            let mut changed = 0u64;
            for path in known.iter().filter(|path| !seen_paths.contains(*path)) {
                changed += tx.execute(
                    "UPDATE content_index SET is_stale = 1 WHERE file_path = ?1",
                    params![path],
                )? as u64;
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    pub async fn list_content_index(&self, project_path: Option<&str>) -> Result<Vec<ContentIndex>> {
        let project_path = project_path.map(str::to_string);
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {INDEX_COLUMNS} FROM content_index
                 WHERE (?1 IS NULL OR project_path = ?1)
                 ORDER BY project_path ASC, relative_path ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![project_path])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    /// Case-insensitive substring search over file name, relative path and
    /// content. Name and path matches rank first.
    pub async fn search_content_index(&self, query: &str, limit: usize) -> Result<Vec<ContentIndex>> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let limit = limit as i64;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {INDEX_COLUMNS} FROM content_index
                 WHERE file_name LIKE ?1 ESCAPE '\\'
                    OR relative_path LIKE ?1 ESCAPE '\\'
                    OR content LIKE ?1 ESCAPE '\\'
                 ORDER BY
                    CASE WHEN file_name LIKE ?1 ESCAPE '\\' THEN 0
                         WHEN relative_path LIKE ?1 ESCAPE '\\' THEN 1
                         ELSE 2 END,
                    last_modified DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![pattern, limit])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    /// Number of successfully indexed files per project in `[start, end)`.
    pub async fn count_indexed_by_project(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, u64)>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT project_path, COUNT(*) FROM content_index
                 WHERE last_indexed >= ?1 AND last_indexed < ?2 AND indexing_failed = 0
                 GROUP BY project_path
                 ORDER BY COUNT(*) DESC, project_path ASC",
            )?;
            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                let project: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                counts.push((project, to_u64(count, "count")?));
            }
            Ok(counts)
        })
        .await
    }
}
