//! Progress sync API endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::auth::CallerIdentity;
use crate::error::Result;
use crate::state::AppState;
use crate::sync::types::{ReadProgressResponse, SyncRequest, SyncResponse};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(sync_progress))
        .route("/:lesson_id", get(read_progress))
}

/// Apply one device's progress payload
async fn sync_progress(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let response = state.sync_service().sync(&caller, request).await?;
    Ok(Json(response))
}

/// Read the caller's progress for a lesson, with devices and sync bookkeeping
async fn read_progress(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(lesson_id): Path<String>,
) -> Result<Json<ReadProgressResponse>> {
    let response = state.sync_service().read(&caller, &lesson_id).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::auth::{Role, TokenVerifier};
    use crate::config::Config;
    use crate::db::{test_pool, NewUser, UserRepository};
    use crate::state::AppState;

    async fn server_with_token() -> (TestServer, String) {
        let pool = test_pool().await;
        let users = UserRepository::new(&pool);
        users
            .create(&NewUser {
                id: "user-1".to_string(),
                email: "learner@example.com".to_string(),
                display_name: None,
                role: Role::Student,
                university_id: None,
                department_id: None,
            })
            .await
            .unwrap();
        let token = users.issue_token("user-1").await.unwrap();

        let verifier = Arc::new(TokenVerifier::new(pool.clone()));
        let state = AppState::new(Config::default(), pool, verifier);
        let app = axum::Router::new()
            .nest("/api/v1/sync", super::router())
            .with_state(state);

        (TestServer::new(app).unwrap(), token)
    }

    fn bearer(token: &str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        )
    }

    fn payload(user_id: &str, completion: f64) -> Value {
        json!({
            "userId": user_id,
            "lessonId": "lesson-1",
            "courseId": "course-1",
            "contentType": "video",
            "completionPercentage": completion,
            "timeSpent": 120,
            "lastPosition": 45.0,
            "isCompleted": false,
            "deviceId": "laptop",
            "deviceInfo": {
                "id": "laptop",
                "name": "Work laptop",
                "type": "desktop",
                "browser": "Firefox",
                "os": "Linux",
                "lastSeen": "2024-01-01T00:00:00Z",
                "isActive": true
            },
            "syncVersion": 1
        })
    }

    #[tokio::test]
    async fn test_sync_requires_a_bearer_token() {
        let (server, _token) = server_with_token().await;

        let response = server.post("/api/v1/sync").json(&payload("user-1", 30.0)).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sync_rejects_another_users_payload() {
        let (server, token) = server_with_token().await;
        let (name, value) = bearer(&token);

        let response = server
            .post("/api/v1/sync")
            .add_header(name, value)
            .json(&payload("somebody-else", 30.0))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_sync_then_read_round_trip() {
        let (server, token) = server_with_token().await;

        let (name, value) = bearer(&token);
        let response = server
            .post("/api/v1/sync")
            .add_header(name, value)
            .json(&payload("user-1", 55.0))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["success"], true);

        let (name, value) = bearer(&token);
        let read = server
            .get("/api/v1/sync/lesson-1")
            .add_header(name, value)
            .await;
        assert_eq!(read.status_code(), StatusCode::OK);

        let body = read.json::<Value>();
        assert_eq!(body["progress"]["completionPercentage"], 55.0);
        assert_eq!(body["syncInfo"]["lastSyncVersion"], 1);
        assert_eq!(body["devices"][0]["id"], "laptop");
    }

    #[tokio::test]
    async fn test_read_of_unknown_lesson_is_empty_not_an_error() {
        let (server, token) = server_with_token().await;
        let (name, value) = bearer(&token);

        let response = server
            .get("/api/v1/sync/never-synced")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body = response.json::<Value>();
        assert_eq!(body["success"], true);
        assert!(body["progress"].is_null());
        assert_eq!(body["syncInfo"]["totalSyncs"], 0);
    }
}
