//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Users table (authoritative role assignment plus the claims mirror)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT,
    role TEXT NOT NULL DEFAULT 'student',
    university_id TEXT,
    department_id TEXT,
    claims_role TEXT,
    claims_university_id TEXT,
    claims_department_id TEXT,
    claims_permissions TEXT,
    claims_updated_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_users_claims_updated ON users(claims_updated_at);

-- Access tokens (SHA-256 digests, never the raw token)
CREATE TABLE IF NOT EXISTS access_tokens (
    token_hash TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    issued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_access_tokens_user ON access_tokens(user_id);

-- Lesson progress, one row per (user, lesson)
CREATE TABLE IF NOT EXISTS lesson_progress (
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    completion_percentage REAL NOT NULL DEFAULT 0,
    time_spent INTEGER NOT NULL DEFAULT 0,
    last_position REAL NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    sync_version INTEGER NOT NULL DEFAULT 1,
    device_id TEXT NOT NULL,
    content_progress TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, lesson_id)
);

CREATE INDEX IF NOT EXISTS idx_lesson_progress_course ON lesson_progress(user_id, course_id);

-- Append-only sync history, one entry per accepted write
CREATE TABLE IF NOT EXISTS sync_history (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    sync_version INTEGER NOT NULL,
    conflict_resolved INTEGER NOT NULL DEFAULT 0,
    changes TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_history_record ON sync_history(user_id, lesson_id);

-- Conflict log, one entry per conflict resolution
CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    existing_version INTEGER NOT NULL,
    incoming_version INTEGER NOT NULL,
    resolved_version INTEGER NOT NULL,
    devices TEXT NOT NULL,
    resolution TEXT NOT NULL DEFAULT 'merged',
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(user_id, lesson_id);

-- Device registry, one row per (user, device)
CREATE TABLE IF NOT EXISTS devices (
    user_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    name TEXT NOT NULL,
    device_type TEXT NOT NULL,
    browser TEXT NOT NULL,
    os TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    location TEXT,

    PRIMARY KEY (user_id, device_id)
);

CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(user_id, last_seen);

-- Claims audit log
CREATE TABLE IF NOT EXISTS claims_audit_log (
    id TEXT PRIMARY KEY,
    target_user_id TEXT NOT NULL,
    action TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    details TEXT,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_claims_audit_target ON claims_audit_log(target_user_id, occurred_at);
"#;
