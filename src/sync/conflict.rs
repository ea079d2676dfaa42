//! Most-progress-wins conflict resolution
//!
//! Pure merge logic over two progress records, with no store access. The
//! resolver never loses learner work: scalar progress only moves forward,
//! collections are unioned, and ties keep the stored state.

use chrono::{DateTime, Utc};

use crate::sync::types::{
    ChapterProgress, ContentProgress, Highlight, LessonProgress, QuizProgress, ReadingNote,
    ReadingProgress, SyncConflict, VideoBookmark, VideoNote, VideoProgress,
};

/// Outcome of resolving a version conflict
#[derive(Debug, Clone)]
pub struct ResolvedProgress {
    pub record: LessonProgress,
    pub conflict: SyncConflict,
}

/// Merge `incoming` into `existing` when the stored version is not behind
///
/// Rules:
/// - completion, last position and the completed flag move together, and
///   only when the incoming write shows a higher completion percentage
/// - time spent takes the larger accumulator
/// - content sub-state merges field by field when both sides carry the same
///   variant, adopts the populated side when only one does, and keeps the
///   stored variant when they disagree
/// - the resolved version is one past the larger of the two versions
///
/// The stored record's device stays the owner of the resolved record; the
/// submitting device is only recorded in the conflict entry.
pub fn resolve(
    existing: &LessonProgress,
    incoming: &LessonProgress,
    now: DateTime<Utc>,
) -> ResolvedProgress {
    let mut record = existing.clone();

    if incoming.completion_percentage > existing.completion_percentage {
        record.completion_percentage = incoming.completion_percentage;
        record.last_position = incoming.last_position;
        record.is_completed = incoming.is_completed;
    }
    record.time_spent = existing.time_spent.max(incoming.time_spent);

    record.content = match (&existing.content, &incoming.content) {
        (Some(ContentProgress::Video(a)), Some(ContentProgress::Video(b))) => {
            Some(ContentProgress::Video(merge_video(a, b)))
        }
        (Some(ContentProgress::Reading(a)), Some(ContentProgress::Reading(b))) => {
            Some(ContentProgress::Reading(merge_reading(a, b)))
        }
        (Some(ContentProgress::Quiz(a)), Some(ContentProgress::Quiz(b))) => {
            Some(ContentProgress::Quiz(merge_quiz(a, b)))
        }
        (None, Some(content)) => Some(content.clone()),
        (existing_content, _) => existing_content.clone(),
    };

    let resolved_version = existing.sync_version.max(incoming.sync_version) + 1;
    record.sync_version = resolved_version;
    record.updated_at = now;

    let conflict = SyncConflict {
        devices: vec![existing.device_id.clone(), incoming.device_id.clone()],
        existing_version: existing.sync_version,
        incoming_version: incoming.sync_version,
        resolved_version,
        resolution: "merged".to_string(),
        occurred_at: now,
    };

    ResolvedProgress { record, conflict }
}

/// An item mergeable into an id-keyed collection
///
/// Collections union in stored order: items keep their original position and
/// new items append in incoming order. On an id collision the incoming item
/// replaces the stored one.
trait MergeById: Clone {
    fn id(&self) -> &str;

    fn merged_with(&self, incoming: &Self) -> Self {
        incoming.clone()
    }
}

impl MergeById for VideoBookmark {
    fn id(&self) -> &str {
        &self.id
    }

    // A zero timestamp means the client never set one, so keep the stored
    // position in that case.
    fn merged_with(&self, incoming: &Self) -> Self {
        let mut merged = incoming.clone();
        if merged.timestamp == 0.0 {
            merged.timestamp = self.timestamp;
        }
        merged
    }
}

impl MergeById for VideoNote {
    fn id(&self) -> &str {
        &self.id
    }

    fn merged_with(&self, incoming: &Self) -> Self {
        let mut merged = incoming.clone();
        if merged.timestamp == 0.0 {
            merged.timestamp = self.timestamp;
        }
        merged
    }
}

impl MergeById for Highlight {
    fn id(&self) -> &str {
        &self.id
    }
}

impl MergeById for ReadingNote {
    fn id(&self) -> &str {
        &self.id
    }
}

fn merge_by_id<T: MergeById>(existing: &[T], incoming: &[T]) -> Vec<T> {
    let mut merged = existing.to_vec();
    for item in incoming {
        match merged.iter().position(|m| m.id() == item.id()) {
            Some(index) => merged[index] = merged[index].merged_with(item),
            None => merged.push(item.clone()),
        }
    }
    merged
}

fn merge_chapters(existing: &[ChapterProgress], incoming: &[ChapterProgress]) -> Vec<ChapterProgress> {
    let mut merged = existing.to_vec();
    for chapter in incoming {
        match merged.iter().position(|m| m.id == chapter.id) {
            Some(index) => {
                merged[index].completed = merged[index].completed || chapter.completed;
                merged[index].time_spent = merged[index].time_spent.max(chapter.time_spent);
            }
            None => merged.push(chapter.clone()),
        }
    }
    merged
}

fn merge_sections(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for section in incoming {
        if !merged.contains(section) {
            merged.push(section.clone());
        }
    }
    merged
}

/// Incoming playback settings win, furthest position wins, collections union
fn merge_video(existing: &VideoProgress, incoming: &VideoProgress) -> VideoProgress {
    let mut merged = incoming.clone();
    merged.current_time = existing.current_time.max(incoming.current_time);
    merged.chapters = merge_chapters(&existing.chapters, &incoming.chapters);
    merged.bookmarks = merge_by_id(&existing.bookmarks, &incoming.bookmarks);
    merged.notes = merge_by_id(&existing.notes, &incoming.notes);
    merged
}

/// Reading accumulators max out, sections and annotations union
fn merge_reading(existing: &ReadingProgress, incoming: &ReadingProgress) -> ReadingProgress {
    let mut merged = incoming.clone();
    merged.scroll_percentage = existing.scroll_percentage.max(incoming.scroll_percentage);
    merged.reading_time = existing.reading_time.max(incoming.reading_time);
    merged.words_read = existing.words_read.max(incoming.words_read);
    merged.sections_completed =
        merge_sections(&existing.sections_completed, &incoming.sections_completed);
    merged.highlights = merge_by_id(&existing.highlights, &incoming.highlights);
    merged.notes = merge_by_id(&existing.notes, &incoming.notes);
    merged
}

/// The higher-scoring attempt wins whole; an absent score counts as zero.
/// On a score tie the attempt further into the quiz wins, and a full tie
/// keeps the stored attempt.
fn merge_quiz(existing: &QuizProgress, incoming: &QuizProgress) -> QuizProgress {
    let existing_score = existing.score.unwrap_or(0.0);
    let incoming_score = incoming.score.unwrap_or(0.0);

    if incoming_score > existing_score {
        return incoming.clone();
    }
    if existing_score > incoming_score {
        return existing.clone();
    }
    if incoming.current_question_index > existing.current_question_index {
        incoming.clone()
    } else {
        existing.clone()
    }
}
