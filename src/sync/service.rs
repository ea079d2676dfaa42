//! Sync orchestration
//!
//! Ownership enforcement, payload validation, the optimistic write loop and
//! the read-side assembly of progress, devices and sync bookkeeping.

use std::sync::Arc;

use chrono::Utc;

use crate::auth::CallerIdentity;
use crate::error::{AppError, Result};
use crate::sync::conflict;
use crate::sync::store::ProgressStore;
use crate::sync::types::{
    ReadProgressResponse, SyncHistoryEntry, SyncInfo, SyncRequest, SyncResponse,
};

pub struct SyncService {
    store: Arc<dyn ProgressStore>,
    max_write_attempts: u32,
}

impl SyncService {
    pub fn new(store: Arc<dyn ProgressStore>, max_write_attempts: u32) -> Self {
        Self {
            store,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    /// Apply one device's progress payload
    ///
    /// Ownership is checked before the store is touched at all. Each attempt
    /// re-reads the stored record and writes with a version guard, so a
    /// concurrent writer costs a retry rather than lost progress.
    pub async fn sync(&self, caller: &CallerIdentity, request: SyncRequest) -> Result<SyncResponse> {
        if request.user_id != caller.user_id {
            return Err(AppError::PermissionDenied(
                "progress can only be synced for the caller's own account".into(),
            ));
        }
        request.validate()?;

        for _ in 0..self.max_write_attempts {
            let now = Utc::now();
            let applied = match self.store.load(&request.user_id, &request.lesson_id).await? {
                None => {
                    let record = request.clone().into_record(now, now);
                    let history = SyncHistoryEntry {
                        device_id: request.device_id.clone(),
                        sync_version: record.sync_version,
                        conflict_resolved: false,
                        changes: request.changed_fields(),
                        synced_at: now,
                    };
                    self.store.insert_new(&record, &history).await?
                }
                Some(existing) if existing.sync_version >= request.sync_version => {
                    let incoming = request.clone().into_record(existing.created_at, now);
                    let resolved = conflict::resolve(&existing, &incoming, now);
                    tracing::debug!(
                        "Sync conflict for user {} lesson {}: stored v{} vs incoming v{}, resolved to v{}",
                        request.user_id,
                        request.lesson_id,
                        existing.sync_version,
                        request.sync_version,
                        resolved.record.sync_version
                    );
                    let history = SyncHistoryEntry {
                        device_id: request.device_id.clone(),
                        sync_version: resolved.record.sync_version,
                        conflict_resolved: true,
                        changes: request.changed_fields(),
                        synced_at: now,
                    };
                    self.store
                        .replace_if_version(
                            &resolved.record,
                            existing.sync_version,
                            &history,
                            Some(&resolved.conflict),
                        )
                        .await?
                }
                Some(existing) => {
                    // Incoming is strictly ahead of the stored version, so it
                    // already saw the stored state; write it through as-is.
                    let record = request.clone().into_record(existing.created_at, now);
                    let history = SyncHistoryEntry {
                        device_id: request.device_id.clone(),
                        sync_version: record.sync_version,
                        conflict_resolved: false,
                        changes: request.changed_fields(),
                        synced_at: now,
                    };
                    self.store
                        .replace_if_version(&record, existing.sync_version, &history, None)
                        .await?
                }
            };

            if applied {
                self.store
                    .touch_device(&caller.user_id, &request.device_info)
                    .await?;
                return Ok(SyncResponse {
                    success: true,
                    message: "Sync successful".to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        Err(AppError::Internal(format!(
            "progress write for lesson {} stayed contended past {} attempts",
            request.lesson_id, self.max_write_attempts
        )))
    }

    /// Read a lesson's progress with the caller's devices and sync bookkeeping
    ///
    /// A lesson that was never synced still answers with an empty, well-formed
    /// response instead of an error.
    pub async fn read(&self, caller: &CallerIdentity, lesson_id: &str) -> Result<ReadProgressResponse> {
        if lesson_id.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "lessonId must not be empty".into(),
            ));
        }

        let Some(progress) = self.store.load(&caller.user_id, lesson_id).await? else {
            return Ok(ReadProgressResponse {
                success: true,
                progress: None,
                devices: vec![],
                sync_info: SyncInfo {
                    last_sync_version: 0,
                    last_sync_device: None,
                    last_sync_time: None,
                    total_syncs: 0,
                    conflict_history: vec![],
                },
            });
        };

        let devices = self.store.list_devices(&caller.user_id).await?;
        let total_syncs = self.store.total_syncs(&caller.user_id, lesson_id).await?;
        let conflict_history = self.store.conflict_history(&caller.user_id, lesson_id).await?;

        let sync_info = SyncInfo {
            last_sync_version: progress.sync_version,
            last_sync_device: Some(progress.device_id.clone()),
            last_sync_time: Some(progress.updated_at),
            total_syncs,
            conflict_history,
        };

        Ok(ReadProgressResponse {
            success: true,
            progress: Some(progress),
            devices,
            sync_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sqlx::SqlitePool;

    use crate::auth::Role;
    use crate::db::test_pool;
    use crate::sync::store::SqliteProgressStore;
    use crate::sync::types::{
        ContentType, DeviceInfo, DeviceRecord, DeviceType, LessonProgress, SyncConflict,
    };

    fn caller(user_id: &str) -> CallerIdentity {
        CallerIdentity {
            user_id: user_id.to_string(),
            role: Role::Student,
            university_id: None,
            department_id: None,
        }
    }

    fn make_request(user_id: &str, device_id: &str, version: i64, completion: f64) -> SyncRequest {
        SyncRequest {
            user_id: user_id.to_string(),
            lesson_id: "lesson-1".to_string(),
            course_id: "course-1".to_string(),
            content_type: ContentType::Video,
            completion_percentage: completion,
            time_spent: 300,
            last_position: 90.0,
            is_completed: false,
            device_id: device_id.to_string(),
            device_info: DeviceInfo {
                id: device_id.to_string(),
                name: format!("Device {device_id}"),
                device_type: DeviceType::Desktop,
                browser: "Firefox".to_string(),
                os: "Linux".to_string(),
                last_seen: Utc::now(),
                is_active: true,
                location: None,
            },
            sync_version: version,
            video_progress: None,
            reading_progress: None,
            quiz_progress: None,
        }
    }

    fn sqlite_service(pool: &SqlitePool) -> SyncService {
        SyncService::new(Arc::new(SqliteProgressStore::new(pool.clone())), 3)
    }

    /// Store double that counts every call and answers with empty defaults
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
        failed_inserts: AtomicUsize,
    }

    #[async_trait]
    impl ProgressStore for CountingStore {
        async fn load(&self, _: &str, _: &str) -> Result<Option<LessonProgress>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn insert_new(&self, _: &LessonProgress, _: &SyncHistoryEntry) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.failed_inserts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn replace_if_version(
            &self,
            _: &LessonProgress,
            _: i64,
            _: &SyncHistoryEntry,
            _: Option<&SyncConflict>,
        ) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn total_syncs(&self, _: &str, _: &str) -> Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn conflict_history(&self, _: &str, _: &str) -> Result<Vec<SyncConflict>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn touch_device(&self, _: &str, _: &DeviceInfo) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_devices(&self, _: &str) -> Result<Vec<DeviceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_ownership_is_enforced_before_any_store_access() {
        let store = Arc::new(CountingStore::default());
        let service = SyncService::new(store.clone(), 3);

        let err = service
            .sync(&caller("somebody-else"), make_request("user-1", "laptop", 1, 50.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PermissionDenied(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_before_any_store_access() {
        let store = Arc::new(CountingStore::default());
        let service = SyncService::new(store.clone(), 3);

        let err = service
            .sync(&caller("user-1"), make_request("user-1", "laptop", 1, 250.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_contended_writes_give_up_after_the_attempt_budget() {
        let store = Arc::new(CountingStore::default());
        let service = SyncService::new(store.clone(), 3);

        let err = service
            .sync(&caller("user-1"), make_request("user-1", "laptop", 1, 50.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(store.failed_inserts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_sync_creates_the_record() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);
        let caller = caller("user-1");

        let response = service
            .sync(&caller, make_request("user-1", "laptop", 1, 30.0))
            .await
            .unwrap();
        assert!(response.success);

        let read = service.read(&caller, "lesson-1").await.unwrap();
        let progress = read.progress.unwrap();
        assert_eq!(progress.sync_version, 1);
        assert_eq!(progress.completion_percentage, 30.0);
        assert_eq!(read.sync_info.total_syncs, 1);
        assert_eq!(read.sync_info.last_sync_device.as_deref(), Some("laptop"));
        assert!(read.sync_info.conflict_history.is_empty());
        assert_eq!(read.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_same_version_writes_resolve_into_a_merge() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);
        let caller = caller("user-1");

        service
            .sync(&caller, make_request("user-1", "laptop", 1, 30.0))
            .await
            .unwrap();
        service
            .sync(&caller, make_request("user-1", "phone", 1, 60.0))
            .await
            .unwrap();

        let read = service.read(&caller, "lesson-1").await.unwrap();
        let progress = read.progress.unwrap();
        assert_eq!(progress.sync_version, 2);
        assert_eq!(progress.completion_percentage, 60.0);

        assert_eq!(read.sync_info.conflict_history.len(), 1);
        let conflict = &read.sync_info.conflict_history[0];
        assert_eq!(conflict.devices, vec!["laptop", "phone"]);
        assert_eq!(conflict.existing_version, 1);
        assert_eq!(conflict.resolved_version, 2);
        assert_eq!(read.sync_info.total_syncs, 2);
        assert_eq!(read.devices.len(), 2);
    }

    #[tokio::test]
    async fn test_completion_never_regresses_under_conflicting_writes() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);
        let caller = caller("user-1");

        let mut high_water = 0.0f64;
        for (device, completion) in [("a", 30.0), ("b", 60.0), ("a", 45.0), ("b", 10.0)] {
            service
                .sync(&caller, make_request("user-1", device, 1, completion))
                .await
                .unwrap();
            high_water = high_water.max(completion);

            let read = service.read(&caller, "lesson-1").await.unwrap();
            let stored = read.progress.unwrap().completion_percentage;
            assert_eq!(stored, high_water);
        }
    }

    #[tokio::test]
    async fn test_version_ahead_of_stored_writes_through() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);
        let caller = caller("user-1");

        service
            .sync(&caller, make_request("user-1", "laptop", 1, 30.0))
            .await
            .unwrap();
        service
            .sync(&caller, make_request("user-1", "laptop", 5, 80.0))
            .await
            .unwrap();

        let read = service.read(&caller, "lesson-1").await.unwrap();
        let progress = read.progress.unwrap();
        assert_eq!(progress.sync_version, 5);
        assert_eq!(progress.completion_percentage, 80.0);
        assert!(read.sync_info.conflict_history.is_empty());
    }

    #[tokio::test]
    async fn test_every_sync_refreshes_the_device_registry() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);
        let caller = caller("user-1");

        service
            .sync(&caller, make_request("user-1", "laptop", 1, 30.0))
            .await
            .unwrap();
        service
            .sync(&caller, make_request("user-1", "phone", 1, 40.0))
            .await
            .unwrap();

        let read = service.read(&caller, "lesson-1").await.unwrap();
        let mut ids: Vec<_> = read.devices.iter().map(|d| d.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["laptop", "phone"]);
    }

    #[tokio::test]
    async fn test_read_of_unsynced_lesson_answers_empty() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);

        let read = service.read(&caller("user-1"), "never-synced").await.unwrap();
        assert!(read.success);
        assert!(read.progress.is_none());
        assert!(read.devices.is_empty());
        assert_eq!(read.sync_info.last_sync_version, 0);
        assert_eq!(read.sync_info.last_sync_device, None);
        assert_eq!(read.sync_info.last_sync_time, None);
        assert_eq!(read.sync_info.total_syncs, 0);
        assert!(read.sync_info.conflict_history.is_empty());
    }

    #[tokio::test]
    async fn test_read_rejects_blank_lesson_id() {
        let pool = test_pool().await;
        let service = sqlite_service(&pool);

        let err = service.read(&caller("user-1"), "  ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }
}
