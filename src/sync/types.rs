//! Progress sync data types
//!
//! Defines the per-lesson progress record, its content-specific sub-states,
//! the device registry records, and the request/response DTOs for the sync
//! endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Kind of lesson content a progress record tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Text,
    Quiz,
    Pdf,
    Audio,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Text => "text",
            ContentType::Quiz => "quiz",
            ContentType::Pdf => "pdf",
            ContentType::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(ContentType::Video),
            "text" => Some(ContentType::Text),
            "quiz" => Some(ContentType::Quiz),
            "pdf" => Some(ContentType::Pdf),
            "audio" => Some(ContentType::Audio),
            _ => None,
        }
    }

    /// Wire key of the content section this type carries
    pub fn content_key(&self) -> &'static str {
        match self {
            ContentType::Video | ContentType::Audio => "videoProgress",
            ContentType::Text | ContentType::Pdf => "readingProgress",
            ContentType::Quiz => "quizProgress",
        }
    }
}

/// A per-user-per-lesson progress record
///
/// The content sub-state is flattened so the wire shape keeps the historical
/// `videoProgress` / `readingProgress` / `quizProgress` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonProgress {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    #[serde(rename = "courseId")]
    pub course_id: String,
    #[serde(rename = "contentType")]
    pub content_type: ContentType,
    /// Overall completion, 0 to 100
    #[serde(rename = "completionPercentage")]
    pub completion_percentage: f64,
    /// Accumulated seconds spent on the lesson
    #[serde(rename = "timeSpent")]
    pub time_spent: i64,
    /// Last playback/scroll offset
    #[serde(rename = "lastPosition")]
    pub last_position: f64,
    #[serde(rename = "isCompleted")]
    pub is_completed: bool,
    /// Monotonically increasing version, bumped on every conflict resolution
    #[serde(rename = "syncVersion")]
    pub sync_version: i64,
    /// Device that last wrote this record
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(flatten)]
    pub content: Option<ContentProgress>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Content-type-specific progress, at most one variant per record
///
/// Externally tagged so each variant keeps its own wire key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContentProgress {
    #[serde(rename = "videoProgress")]
    Video(VideoProgress),
    #[serde(rename = "readingProgress")]
    Reading(ReadingProgress),
    #[serde(rename = "quizProgress")]
    Quiz(QuizProgress),
}

/// Playback progress for video and audio lessons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProgress {
    /// Furthest playback position, seconds
    #[serde(rename = "currentTime")]
    pub current_time: f64,
    pub duration: f64,
    #[serde(rename = "playbackRate")]
    pub playback_rate: f64,
    pub volume: f64,
    #[serde(rename = "qualityLevel")]
    pub quality_level: String,
    #[serde(rename = "subtitleTrack", skip_serializing_if = "Option::is_none")]
    pub subtitle_track: Option<String>,
    pub chapters: Vec<ChapterProgress>,
    pub bookmarks: Vec<VideoBookmark>,
    pub notes: Vec<VideoNote>,
}

/// Per-chapter completion state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub id: String,
    pub completed: bool,
    #[serde(rename = "timeSpent")]
    pub time_spent: i64,
}

/// A bookmark pinned to a playback position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoBookmark {
    pub id: String,
    /// Playback position, seconds; zero means the client did not set one
    pub timestamp: f64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A note pinned to a playback position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoNote {
    pub id: String,
    /// Playback position, seconds; zero means the client did not set one
    pub timestamp: f64,
    pub content: String,
    pub title: String,
}

/// Reading progress for text and PDF lessons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    #[serde(rename = "scrollPercentage")]
    pub scroll_percentage: f64,
    /// Accumulated reading seconds
    #[serde(rename = "readingTime")]
    pub reading_time: i64,
    #[serde(rename = "wordsRead")]
    pub words_read: i64,
    #[serde(rename = "sectionsCompleted")]
    pub sections_completed: Vec<String>,
    pub highlights: Vec<Highlight>,
    pub notes: Vec<ReadingNote>,
}

/// A highlighted text range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub text: String,
    pub position: f64,
    pub color: String,
}

/// A note anchored to a reading position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingNote {
    pub id: String,
    pub content: String,
    pub position: f64,
}

/// Quiz attempt progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizProgress {
    #[serde(rename = "currentQuestionIndex")]
    pub current_question_index: i64,
    /// Question id to submitted answer
    pub answers: serde_json::Map<String, serde_json::Value>,
    pub attempts: i64,
    #[serde(rename = "timeSpent")]
    pub time_spent: i64,
    #[serde(rename = "hintsUsed")]
    pub hints_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub completed: bool,
    pub mistakes: Vec<QuizMistake>,
}

/// An incorrectly answered question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizMistake {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "incorrectAnswer")]
    pub incorrect_answer: serde_json::Value,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: serde_json::Value,
}

/// Device classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(DeviceType::Desktop),
            "mobile" => Some(DeviceType::Mobile),
            "tablet" => Some(DeviceType::Tablet),
            _ => None,
        }
    }
}

/// Coarse device location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Device metadata submitted with every sync call
///
/// `lastSeen` and `isActive` are accepted for wire compatibility but the
/// server always stores its own clock and `true` on upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<DeviceLocation>,
}

/// A device as stored in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<DeviceLocation>,
}

/// One accepted write in the append-only sync history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "syncVersion")]
    pub sync_version: i64,
    #[serde(rename = "conflictResolved")]
    pub conflict_resolved: bool,
    /// Top-level payload field names present in the write
    pub changes: Vec<String>,
    #[serde(rename = "syncedAt")]
    pub synced_at: DateTime<Utc>,
}

/// One resolved conflict in the conflict log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Stored-record writer first, submitting device second
    pub devices: Vec<String>,
    #[serde(rename = "existingVersion")]
    pub existing_version: i64,
    #[serde(rename = "incomingVersion")]
    pub incoming_version: i64,
    #[serde(rename = "resolvedVersion")]
    pub resolved_version: i64,
    pub resolution: String,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

/// Full sync payload submitted by a client
///
/// The three content sections stay separate optional keys here so a present
/// but malformed section fails deserialization instead of being dropped;
/// [`SyncRequest::validate`] enforces that at most one is populated and that
/// it matches `contentType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    #[serde(rename = "courseId")]
    pub course_id: String,
    #[serde(rename = "contentType")]
    pub content_type: ContentType,
    #[serde(rename = "completionPercentage")]
    pub completion_percentage: f64,
    #[serde(rename = "timeSpent")]
    pub time_spent: i64,
    #[serde(rename = "lastPosition")]
    pub last_position: f64,
    #[serde(rename = "isCompleted")]
    pub is_completed: bool,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "deviceInfo")]
    pub device_info: DeviceInfo,
    #[serde(rename = "syncVersion")]
    pub sync_version: i64,
    #[serde(rename = "videoProgress", skip_serializing_if = "Option::is_none")]
    pub video_progress: Option<VideoProgress>,
    #[serde(rename = "readingProgress", skip_serializing_if = "Option::is_none")]
    pub reading_progress: Option<ReadingProgress>,
    #[serde(rename = "quizProgress", skip_serializing_if = "Option::is_none")]
    pub quiz_progress: Option<QuizProgress>,
}

impl SyncRequest {
    /// Schema and range validation, applied before any store access
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(AppError::InvalidArgument("userId must not be empty".into()));
        }
        if self.lesson_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "lessonId must not be empty".into(),
            ));
        }
        if self.course_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "courseId must not be empty".into(),
            ));
        }
        if self.device_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "deviceId must not be empty".into(),
            ));
        }
        if self.device_info.id.is_empty() {
            return Err(AppError::InvalidArgument(
                "deviceInfo.id must not be empty".into(),
            ));
        }
        if !self.completion_percentage.is_finite()
            || !(0.0..=100.0).contains(&self.completion_percentage)
        {
            return Err(AppError::InvalidArgument(
                "completionPercentage must be between 0 and 100".into(),
            ));
        }
        if self.time_spent < 0 {
            return Err(AppError::InvalidArgument(
                "timeSpent must not be negative".into(),
            ));
        }
        if !self.last_position.is_finite() || self.last_position < 0.0 {
            return Err(AppError::InvalidArgument(
                "lastPosition must not be negative".into(),
            ));
        }
        if self.sync_version < 1 {
            return Err(AppError::InvalidArgument(
                "syncVersion must be at least 1".into(),
            ));
        }

        let present = self.present_content_keys();
        if present.len() > 1 {
            return Err(AppError::InvalidArgument(format!(
                "at most one content section may be set, got {}",
                present.join(" and ")
            )));
        }
        if let Some(key) = present.first() {
            if *key != self.content_type.content_key() {
                return Err(AppError::InvalidArgument(format!(
                    "{} does not match contentType '{}'",
                    key,
                    self.content_type.as_str()
                )));
            }
        }

        Ok(())
    }

    fn present_content_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.video_progress.is_some() {
            keys.push("videoProgress");
        }
        if self.reading_progress.is_some() {
            keys.push("readingProgress");
        }
        if self.quiz_progress.is_some() {
            keys.push("quizProgress");
        }
        keys
    }

    /// Top-level payload field names, recorded in the sync history
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = [
            "userId",
            "lessonId",
            "courseId",
            "contentType",
            "completionPercentage",
            "timeSpent",
            "lastPosition",
            "isCompleted",
            "deviceId",
            "deviceInfo",
            "syncVersion",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        fields.extend(self.present_content_keys().iter().map(|k| k.to_string()));
        fields
    }

    /// Convert the payload into a storable record
    pub fn into_record(
        self,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> LessonProgress {
        let content = match (self.video_progress, self.reading_progress, self.quiz_progress) {
            (Some(video), _, _) => Some(ContentProgress::Video(video)),
            (_, Some(reading), _) => Some(ContentProgress::Reading(reading)),
            (_, _, Some(quiz)) => Some(ContentProgress::Quiz(quiz)),
            (None, None, None) => None,
        };

        LessonProgress {
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            course_id: self.course_id,
            content_type: self.content_type,
            completion_percentage: self.completion_percentage,
            time_spent: self.time_spent,
            last_position: self.last_position,
            is_completed: self.is_completed,
            sync_version: self.sync_version,
            device_id: self.device_id,
            content,
            created_at,
            updated_at,
        }
    }
}

/// Response to a sync call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Sync bookkeeping returned alongside a progress read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncInfo {
    #[serde(rename = "lastSyncVersion")]
    pub last_sync_version: i64,
    #[serde(rename = "lastSyncDevice")]
    pub last_sync_device: Option<String>,
    #[serde(rename = "lastSyncTime")]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(rename = "totalSyncs")]
    pub total_syncs: i64,
    #[serde(rename = "conflictHistory")]
    pub conflict_history: Vec<SyncConflict>,
}

/// Response to a progress read call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadProgressResponse {
    pub success: bool,
    pub progress: Option<LessonProgress>,
    pub devices: Vec<DeviceRecord>,
    #[serde(rename = "syncInfo")]
    pub sync_info: SyncInfo,
}
