//! Progress persistence
//!
//! The sync service talks to storage through the [`ProgressStore`] seam so the
//! optimistic write stays a plain compare-and-swap and tests can substitute
//! doubles. The SQLite implementation commits each accepted write, its history
//! entry and any conflict entry in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::db::DeviceRepository;
use crate::error::{AppError, Result};
use crate::sync::types::{
    ContentType, DeviceInfo, DeviceRecord, LessonProgress, SyncConflict, SyncHistoryEntry,
};

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Stored record for a (user, lesson) pair
    async fn load(&self, user_id: &str, lesson_id: &str) -> Result<Option<LessonProgress>>;

    /// Insert a first record along with its seed history entry
    ///
    /// Returns false when a concurrent create won the race.
    async fn insert_new(&self, record: &LessonProgress, history: &SyncHistoryEntry)
        -> Result<bool>;

    /// Replace the record only while the stored version still matches
    /// `expected_version`
    ///
    /// History and conflict entries commit atomically with the replacement.
    /// Returns false when the compare-and-swap lost.
    async fn replace_if_version(
        &self,
        record: &LessonProgress,
        expected_version: i64,
        history: &SyncHistoryEntry,
        conflict: Option<&SyncConflict>,
    ) -> Result<bool>;

    /// Number of accepted writes for a record
    async fn total_syncs(&self, user_id: &str, lesson_id: &str) -> Result<i64>;

    /// Conflict log for a record, oldest first
    async fn conflict_history(&self, user_id: &str, lesson_id: &str) -> Result<Vec<SyncConflict>>;

    /// Insert or refresh the submitting device
    async fn touch_device(&self, user_id: &str, device: &DeviceInfo) -> Result<()>;

    /// All devices registered for a user, most recently seen first
    async fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>>;
}

pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn append_history(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
        lesson_id: &str,
        entry: &SyncHistoryEntry,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (id, user_id, lesson_id, device_id, sync_version, conflict_resolved, changes, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(lesson_id)
        .bind(&entry.device_id)
        .bind(entry.sync_version)
        .bind(entry.conflict_resolved)
        .bind(serde_json::to_string(&entry.changes)?)
        .bind(entry.synced_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn append_conflict(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
        lesson_id: &str,
        conflict: &SyncConflict,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_conflicts (id, user_id, lesson_id, existing_version, incoming_version, resolved_version, devices, resolution, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(lesson_id)
        .bind(conflict.existing_version)
        .bind(conflict.incoming_version)
        .bind(conflict.resolved_version)
        .bind(serde_json::to_string(&conflict.devices)?)
        .bind(&conflict.resolution)
        .bind(conflict.occurred_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn load(&self, user_id: &str, lesson_id: &str) -> Result<Option<LessonProgress>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT user_id, lesson_id, course_id, content_type, completion_percentage,
                   time_spent, last_position, is_completed, sync_version, device_id,
                   content_progress, created_at, updated_at
            FROM lesson_progress
            WHERE user_id = ? AND lesson_id = ?
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProgressRow::into_record).transpose()
    }

    async fn insert_new(
        &self,
        record: &LessonProgress,
        history: &SyncHistoryEntry,
    ) -> Result<bool> {
        let content = record
            .content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO lesson_progress
                (user_id, lesson_id, course_id, content_type, completion_percentage,
                 time_spent, last_position, is_completed, sync_version, device_id,
                 content_progress, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.lesson_id)
        .bind(&record.course_id)
        .bind(record.content_type.as_str())
        .bind(record.completion_percentage)
        .bind(record.time_spent)
        .bind(record.last_position)
        .bind(record.is_completed)
        .bind(record.sync_version)
        .bind(&record.device_id)
        .bind(content)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::append_history(&mut tx, &record.user_id, &record.lesson_id, history).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn replace_if_version(
        &self,
        record: &LessonProgress,
        expected_version: i64,
        history: &SyncHistoryEntry,
        conflict: Option<&SyncConflict>,
    ) -> Result<bool> {
        let content = record
            .content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE lesson_progress
            SET course_id = ?, content_type = ?, completion_percentage = ?,
                time_spent = ?, last_position = ?, is_completed = ?,
                sync_version = ?, device_id = ?, content_progress = ?, updated_at = ?
            WHERE user_id = ? AND lesson_id = ? AND sync_version = ?
            "#,
        )
        .bind(&record.course_id)
        .bind(record.content_type.as_str())
        .bind(record.completion_percentage)
        .bind(record.time_spent)
        .bind(record.last_position)
        .bind(record.is_completed)
        .bind(record.sync_version)
        .bind(&record.device_id)
        .bind(content)
        .bind(record.updated_at.to_rfc3339())
        .bind(&record.user_id)
        .bind(&record.lesson_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::append_history(&mut tx, &record.user_id, &record.lesson_id, history).await?;
        if let Some(conflict) = conflict {
            Self::append_conflict(&mut tx, &record.user_id, &record.lesson_id, conflict).await?;
        }
        tx.commit().await?;

        Ok(true)
    }

    async fn total_syncs(&self, user_id: &str, lesson_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_history WHERE user_id = ? AND lesson_id = ?")
                .bind(user_id)
                .bind(lesson_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn conflict_history(&self, user_id: &str, lesson_id: &str) -> Result<Vec<SyncConflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT existing_version, incoming_version, resolved_version, devices, resolution, occurred_at
            FROM sync_conflicts
            WHERE user_id = ? AND lesson_id = ?
            ORDER BY occurred_at, resolved_version
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    async fn touch_device(&self, user_id: &str, device: &DeviceInfo) -> Result<()> {
        DeviceRepository::new(&self.pool).upsert(user_id, device).await
    }

    async fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        DeviceRepository::new(&self.pool).list(user_id).await
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    user_id: String,
    lesson_id: String,
    course_id: String,
    content_type: String,
    completion_percentage: f64,
    time_spent: i64,
    last_position: f64,
    is_completed: i64,
    sync_version: i64,
    device_id: String,
    content_progress: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProgressRow {
    fn into_record(self) -> Result<LessonProgress> {
        let content_type = ContentType::parse(&self.content_type).ok_or_else(|| {
            AppError::Internal(format!("unknown content type in store: {}", self.content_type))
        })?;
        let content = self
            .content_progress
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(LessonProgress {
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            course_id: self.course_id,
            content_type,
            completion_percentage: self.completion_percentage,
            time_spent: self.time_spent,
            last_position: self.last_position,
            is_completed: self.is_completed != 0,
            sync_version: self.sync_version,
            device_id: self.device_id,
            content,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    existing_version: i64,
    incoming_version: i64,
    resolved_version: i64,
    devices: String,
    resolution: String,
    occurred_at: String,
}

impl ConflictRow {
    fn into_conflict(self) -> Result<SyncConflict> {
        Ok(SyncConflict {
            devices: serde_json::from_str(&self.devices)?,
            existing_version: self.existing_version,
            incoming_version: self.incoming_version,
            resolved_version: self.resolved_version,
            resolution: self.resolution,
            occurred_at: parse_timestamp(&self.occurred_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
