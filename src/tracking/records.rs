use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{models::TrackingRecord, Database};

fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

struct RawRecord {
    id: String,
    user_id: String,
    exercise_id: String,
    exercise_name: String,
    date: String,
    sets_data: String,
}

fn row_to_raw(row: &Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        exercise_id: row.get("exercise_id")?,
        exercise_name: row.get("exercise_name")?,
        date: row.get("date")?,
        sets_data: row.get("sets_data")?,
    })
}

fn into_record(raw: RawRecord) -> Result<TrackingRecord> {
    Ok(TrackingRecord {
        date: parse_datetime(&raw.date, "date")?,
        id: raw.id,
        user_id: raw.user_id,
        exercise_id: raw.exercise_id,
        exercise_name: raw.exercise_name,
        sets_data: raw.sets_data,
    })
}

impl Database {
    pub async fn insert_tracking_record(&self, record: &TrackingRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO tracking_records (id, user_id, exercise_id, exercise_name, date, sets_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.user_id,
                    record.exercise_id,
                    record.exercise_name,
                    record.date.to_rfc3339(),
                    record.sets_data,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert tracking record {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_tracking_record(&self, id: &str) -> Result<Option<TrackingRecord>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, user_id, exercise_id, exercise_name, date, sets_data
                     FROM tracking_records
                     WHERE id = ?1",
                    params![id],
                    row_to_raw,
                )
                .optional()?;
            raw.map(into_record).transpose()
        })
        .await
    }

    /// Records of one user, newest first.
    pub async fn list_tracking_records(&self, user_id: &str) -> Result<Vec<TrackingRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, exercise_id, exercise_name, date, sets_data
                 FROM tracking_records
                 WHERE user_id = ?1
                 ORDER BY date DESC",
            )?;

            let rows = stmt.query_map(params![user_id], row_to_raw)?;

            let mut records = Vec::new();
            for raw in rows {
                records.push(into_record(raw?)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn delete_tracking_record(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM tracking_records WHERE id = ?1", params![id])?;
            if rows_affected == 0 {
                return Err(anyhow!("Tracking record not found"));
            }
            Ok(())
        })
        .await
    }
}
