//! Device registry queries

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::sync::types::{DeviceInfo, DeviceRecord, DeviceType};

/// Devices with no sync activity for this long are flagged inactive
pub const DEVICE_STALE_HOURS: i64 = 24;

/// Repository for per-user device records
pub struct DeviceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DeviceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a device, marking it active and stamping last_seen
    pub async fn upsert(&self, user_id: &str, info: &DeviceInfo) -> Result<()> {
        let location = info
            .location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO devices (user_id, device_id, name, device_type, browser, os, last_seen, is_active, location)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(user_id, device_id) DO UPDATE SET
                name = excluded.name,
                device_type = excluded.device_type,
                browser = excluded.browser,
                os = excluded.os,
                last_seen = excluded.last_seen,
                is_active = 1,
                location = excluded.location
            "#,
        )
        .bind(user_id)
        .bind(&info.id)
        .bind(&info.name)
        .bind(info.device_type.as_str())
        .bind(&info.browser)
        .bind(&info.os)
        .bind(Utc::now().to_rfc3339())
        .bind(location)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// All devices for a user, most recently seen first
    pub async fn list(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, name, device_type, browser, os, last_seen, is_active, location
            FROM devices
            WHERE user_id = ?
            ORDER BY last_seen DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }

    /// Flag devices not seen since `cutoff` as inactive, returning how many
    pub async fn deactivate_stale(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET is_active = 0
            WHERE user_id = ? AND is_active = 1 AND last_seen < ?
            "#,
        )
        .bind(user_id)
        .bind(cutoff.to_rfc3339())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete a device registration; succeeds whether or not it existed
    pub async fn remove(&self, user_id: &str, device_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM devices WHERE user_id = ? AND device_id = ?")
            .bind(user_id)
            .bind(device_id)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    name: String,
    device_type: String,
    browser: String,
    os: String,
    last_seen: String,
    is_active: i64,
    location: Option<String>,
}

impl DeviceRow {
    fn into_record(self) -> Result<DeviceRecord> {
        let device_type = DeviceType::parse(&self.device_type).ok_or_else(|| {
            AppError::Internal(format!("unknown device type '{}'", self.device_type))
        })?;
        let location = match self.location {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(DeviceRecord {
            id: self.device_id,
            name: self.name,
            device_type,
            browser: self.browser,
            os: self.os,
            last_seen: DateTime::parse_from_rfc3339(&self.last_seen)?.with_timezone(&Utc),
            is_active: self.is_active != 0,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::sync::types::DeviceLocation;
    use chrono::Duration;

    fn device_info(id: &str, name: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
            device_type: DeviceType::Desktop,
            browser: "Firefox".to_string(),
            os: "Linux".to_string(),
            last_seen: Utc::now(),
            is_active: true,
            location: None,
        }
    }

    async fn backdate(pool: &SqlitePool, device_id: &str, hours: i64) {
        let past = Utc::now() - Duration::hours(hours);
        sqlx::query("UPDATE devices SET last_seen = ? WHERE device_id = ?")
            .bind(past.to_rfc3339())
            .bind(device_id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        repo.upsert("user-1", &device_info("device-1", "Old name"))
            .await
            .unwrap();
        repo.upsert("user-1", &device_info("device-1", "New name"))
            .await
            .unwrap();

        let devices = repo.list("user-1").await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "New name");
        assert!(devices[0].is_active);
    }

    #[tokio::test]
    async fn test_list_orders_by_last_seen_desc() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        repo.upsert("user-1", &device_info("older", "Older"))
            .await
            .unwrap();
        repo.upsert("user-1", &device_info("newer", "Newer"))
            .await
            .unwrap();
        backdate(&pool, "older", 2).await;

        let devices = repo.list("user-1").await.unwrap();
        assert_eq!(devices[0].id, "newer");
        assert_eq!(devices[1].id, "older");
    }

    #[tokio::test]
    async fn test_deactivate_stale_flags_only_old_devices() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        repo.upsert("user-1", &device_info("stale", "Stale"))
            .await
            .unwrap();
        repo.upsert("user-1", &device_info("fresh", "Fresh"))
            .await
            .unwrap();
        backdate(&pool, "stale", 25).await;

        let cutoff = Utc::now() - Duration::hours(DEVICE_STALE_HOURS);
        let flagged = repo.deactivate_stale("user-1", cutoff).await.unwrap();
        assert_eq!(flagged, 1);

        let devices = repo.list("user-1").await.unwrap();
        let stale = devices.iter().find(|d| d.id == "stale").unwrap();
        let fresh = devices.iter().find(|d| d.id == "fresh").unwrap();
        assert!(!stale.is_active);
        assert!(fresh.is_active);

        // Already flagged devices are not counted again
        let flagged = repo.deactivate_stale("user-1", cutoff).await.unwrap();
        assert_eq!(flagged, 0);
    }

    #[tokio::test]
    async fn test_reactivation_on_upsert() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        repo.upsert("user-1", &device_info("device-1", "Laptop"))
            .await
            .unwrap();
        backdate(&pool, "device-1", 48).await;
        let cutoff = Utc::now() - Duration::hours(DEVICE_STALE_HOURS);
        repo.deactivate_stale("user-1", cutoff).await.unwrap();

        repo.upsert("user-1", &device_info("device-1", "Laptop"))
            .await
            .unwrap();

        let devices = repo.list("user-1").await.unwrap();
        assert!(devices[0].is_active);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        repo.upsert("user-1", &device_info("device-1", "Laptop"))
            .await
            .unwrap();

        repo.remove("user-1", "device-1").await.unwrap();
        repo.remove("user-1", "device-1").await.unwrap();

        assert!(repo.list("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_location_round_trips_as_json() {
        let pool = test_pool().await;
        let repo = DeviceRepository::new(&pool);

        let mut info = device_info("device-1", "Phone");
        info.location = Some(DeviceLocation {
            country: Some("AR".to_string()),
            city: Some("Córdoba".to_string()),
        });
        repo.upsert("user-1", &info).await.unwrap();

        let devices = repo.list("user-1").await.unwrap();
        let location = devices[0].location.as_ref().unwrap();
        assert_eq!(location.country.as_deref(), Some("AR"));
        assert_eq!(location.city.as_deref(), Some("Córdoba"));
    }
}
