//! Device registry API endpoints

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Serialize;

use crate::auth::CallerIdentity;
use crate::db::{DeviceRepository, DEVICE_STALE_HOURS};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::types::DeviceRecord;

/// Create the devices router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_devices))
        .route("/:device_id", delete(remove_device))
}

/// Aggregate counts returned with a device listing
#[derive(Debug, Serialize)]
pub struct DeviceStats {
    #[serde(rename = "totalDevices")]
    pub total_devices: usize,
    #[serde(rename = "activeDevices")]
    pub active_devices: usize,
    #[serde(rename = "deviceTypes")]
    pub device_types: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub success: bool,
    pub devices: Vec<DeviceRecord>,
    pub stats: DeviceStats,
}

#[derive(Debug, Serialize)]
pub struct RemoveDeviceResponse {
    pub success: bool,
    pub message: String,
}

/// List the caller's devices
///
/// Devices quiet for more than [`DEVICE_STALE_HOURS`] are flagged inactive
/// right before the listing, so the staleness sweep needs no scheduler.
async fn list_devices(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<DeviceListResponse>> {
    let repo = DeviceRepository::new(state.db());

    let cutoff = Utc::now() - Duration::hours(DEVICE_STALE_HOURS);
    let flagged = repo.deactivate_stale(&caller.user_id, cutoff).await?;
    if flagged > 0 {
        tracing::debug!("Flagged {} stale devices for user {}", flagged, caller.user_id);
    }

    let devices = repo.list(&caller.user_id).await?;

    let mut device_types = BTreeMap::new();
    for device in &devices {
        *device_types
            .entry(device.device_type.as_str().to_string())
            .or_insert(0) += 1;
    }
    let stats = DeviceStats {
        total_devices: devices.len(),
        active_devices: devices.iter().filter(|d| d.is_active).count(),
        device_types,
    };

    Ok(Json(DeviceListResponse {
        success: true,
        devices,
        stats,
    }))
}

/// Forget a device registration
///
/// Removing a device that does not exist is not an error.
async fn remove_device(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(device_id): Path<String>,
) -> Result<Json<RemoveDeviceResponse>> {
    if device_id.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "deviceId must not be empty".into(),
        ));
    }

    DeviceRepository::new(state.db())
        .remove(&caller.user_id, &device_id)
        .await?;

    Ok(Json(RemoveDeviceResponse {
        success: true,
        message: "Device removed".to_string(),
    }))
}
