use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_optional_u64},
    models::{Activity, AppSession},
    Database,
};

const SESSION_COLUMNS: &str =
    "id, app_bundle_id, app_name, start_time, end_time, total_duration_ms, is_active";

fn row_to_session(row: &Row) -> Result<AppSession> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let total_duration_ms: Option<i64> = row.get("total_duration_ms")?;
    let is_active: i64 = row.get("is_active")?;

    Ok(AppSession {
        id: row.get("id")?,
        app_bundle_id: row.get("app_bundle_id")?,
        app_name: row.get("app_name")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        total_duration_ms: to_optional_u64(total_duration_ms, "total_duration_ms")?,
        is_active: is_active != 0,
        activity_ids: Vec::new(),
    })
}

fn row_to_activity(row: &Row) -> Result<Activity> {
    let timestamp: String = row.get("timestamp")?;
    Ok(Activity {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        window_title: row.get("window_title")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
    })
}

fn upsert_session(tx: &Transaction<'_>, session: &AppSession, now: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO app_sessions (id, app_bundle_id, app_name, start_time, end_time, total_duration_ms, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
             end_time = excluded.end_time,
             total_duration_ms = excluded.total_duration_ms,
             is_active = excluded.is_active,
             updated_at = excluded.updated_at",
        params![
            session.id,
            session.app_bundle_id,
            session.app_name,
            session.start_time.to_rfc3339(),
            session.end_time.as_ref().map(|dt| dt.to_rfc3339()),
            session.total_duration_ms.map(to_i64).transpose()?,
            session.is_active as i64,
            now,
        ],
    )?;
    Ok(())
}

fn load_activity_ids(conn: &Connection, session: &mut AppSession) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id FROM activities WHERE session_id = ?1 ORDER BY timestamp ASC",
    )?;
    session.activity_ids = stmt
        .query_map(params![session.id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

impl Database {
    /// Writes a batch of session and activity changes in one transaction.
    /// Sessions are upserted by id so a close that failed earlier is
    /// reconciled by the next successful write; closed sessions must come
    /// before the newly opened one to keep the single-active constraint.
    pub async fn save_tracking_changes(
        &self,
        sessions: Vec<AppSession>,
        activities: Vec<Activity>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            for session in sessions.iter().filter(|s| !s.is_active) {
                upsert_session(&tx, session, &now)?;
            }
            for session in sessions.iter().filter(|s| s.is_active) {
                upsert_session(&tx, session, &now)?;
            }
            for activity in &activities {
                tx.execute(
                    "INSERT OR IGNORE INTO activities (id, session_id, window_title, timestamp)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        activity.id,
                        activity.session_id,
                        activity.window_title,
                        activity.timestamp.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_app_session(&self, session_id: &str) -> Result<Option<AppSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM app_sessions WHERE id = ?1");
            let session = conn
                .query_row(&sql, params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            match session {
                Some(mut session) => {
                    load_activity_ids(conn, &mut session)?;
                    Ok(Some(session))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Sessions overlapping `[start, end)`, oldest first. Open sessions are
    /// included when they started before `end`.
    pub async fn list_app_sessions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM app_sessions
                 WHERE start_time < ?2 AND (end_time IS NULL OR end_time > ?1)
                 ORDER BY start_time ASC"
            );
            let mut sessions = Vec::new();
            {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
                while let Some(row) = rows.next()? {
                    sessions.push(row_to_session(row)?);
                }
            }
            for session in &mut sessions {
                load_activity_ids(conn, session)?;
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn list_activities_for_session(&self, session_id: &str) -> Result<Vec<Activity>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, window_title, timestamp
                 FROM activities
                 WHERE session_id = ?1
                 ORDER BY timestamp ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut activities = Vec::new();
            while let Some(row) = rows.next()? {
                activities.push(row_to_activity(row)?);
            }
            Ok(activities)
        })
        .await
    }

    pub async fn count_activities_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM activities WHERE timestamp >= ?1 AND timestamp < ?2",
                params![start.to_rfc3339(), end.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Deletes a session together with every activity it owns.
    /// Returns false when no such session exists.
    pub async fn delete_app_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM activities WHERE session_id = ?1",
                params![session_id],
            )?;
            let rows_affected =
                tx.execute("DELETE FROM app_sessions WHERE id = ?1", params![session_id])?;

            tx.commit()?;
            Ok(rows_affected > 0)
        })
        .await
    }

    /// Closes sessions left open by a previous run. Each one ends at its last
    /// recorded activity, or at its start when it has none.
    pub async fn close_orphaned_sessions(&self) -> Result<Vec<AppSession>> {
        self.execute(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM app_sessions WHERE is_active = 1");
            let mut orphans = Vec::new();
            {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    orphans.push(row_to_session(row)?);
                }
            }

            if orphans.is_empty() {
                return Ok(orphans);
            }

            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            for session in &mut orphans {
                let last_activity: Option<String> = tx.query_row(
                    "SELECT MAX(timestamp) FROM activities WHERE session_id = ?1",
                    params![session.id],
                    |row| row.get(0),
                )?;
                let end = match last_activity {
                    Some(raw) => parse_datetime(&raw, "timestamp")?,
                    None => session.start_time,
                };
                warn!(
                    "Recovered open session {} ({}); closing at {}",
                    session.id, session.app_bundle_id, end
                );
                session.close(end);
                upsert_session(&tx, session, &now)?;
            }
            tx.commit()?;
            Ok(orphans)
        })
        .await
    }

    pub async fn get_active_app_session(&self) -> Result<Option<AppSession>> {
        self.execute(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM app_sessions WHERE is_active = 1");
            let session = conn
                .query_row(&sql, [], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn switch_is_persisted_atomically() {
        let db = Database::in_memory().unwrap();
        let safari = AppSession::open("com.apple.Safari", "Safari", t(0));
        db.save_tracking_changes(vec![safari.clone()], vec![])
            .await
            .unwrap();

        let mut closed = safari.clone();
        closed.close(t(5));
        let chrome = AppSession::open("com.google.Chrome", "Chrome", t(5));
        // Open session listed first on purpose; the repository orders them.
        db.save_tracking_changes(vec![chrome.clone(), closed.clone()], vec![])
            .await
            .unwrap();

        let stored = db.get_app_session(&safari.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.total_duration_ms, Some(5_000));
        assert_eq!(stored.end_time, Some(t(5)));

        let active = db.get_active_app_session().await.unwrap().unwrap();
        assert_eq!(active.id, chrome.id);
    }

    #[tokio::test]
    async fn second_active_session_is_rejected() {
        let db = Database::in_memory().unwrap();
        let first = AppSession::open("a", "A", t(0));
        let second = AppSession::open("b", "B", t(1));
        db.save_tracking_changes(vec![first], vec![]).await.unwrap();
        assert!(db.save_tracking_changes(vec![second], vec![]).await.is_err());
    }

    #[tokio::test]
    async fn delete_cascades_to_activities() {
        let db = Database::in_memory().unwrap();
        let mut session = AppSession::open("com.apple.Safari", "Safari", t(0));
        let first = Activity::new(&session.id, Some("Inbox".into()), t(1));
        let second = Activity::new(&session.id, Some("Docs".into()), t(2));
        session.close(t(3));
        db.save_tracking_changes(vec![session.clone()], vec![first.clone(), second])
            .await
            .unwrap();

        let stored = db.get_app_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.activity_ids.len(), 2);
        assert_eq!(stored.activity_ids[0], first.id);

        assert!(db.delete_app_session(&session.id).await.unwrap());
        assert!(db.get_app_session(&session.id).await.unwrap().is_none());
        assert!(db
            .list_activities_for_session(&session.id)
            .await
            .unwrap()
            .is_empty());
        let orphans: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM activities", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        assert!(!db.delete_app_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn orphaned_sessions_close_at_last_activity() {
        let db = Database::in_memory().unwrap();
        let session = AppSession::open("com.apple.Safari", "Safari", t(0));
        let activity = Activity::new(&session.id, Some("Inbox".into()), t(40));
        db.save_tracking_changes(vec![session.clone()], vec![activity])
            .await
            .unwrap();

        let recovered = db.close_orphaned_sessions().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].end_time, Some(t(40)));
        assert_eq!(recovered[0].total_duration_ms, Some(40_000));
        assert!(db.get_active_app_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_sessions_overlapping_window() {
        let db = Database::in_memory().unwrap();
        let mut early = AppSession::open("a", "A", t(0));
        early.close(t(10));
        let mut inside = AppSession::open("b", "B", t(20));
        inside.close(t(30));
        let open = AppSession::open("c", "C", t(40));
        db.save_tracking_changes(vec![early, inside.clone(), open.clone()], vec![])
            .await
            .unwrap();

        let found = db.list_app_sessions_between(t(15), t(100)).await.unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![inside.id, open.id]);
    }
}
