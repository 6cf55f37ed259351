//! Per-(student, course) progress rows.

use crate::error::Result;
use crate::models::{Lesson, Progress, UserId};
use crate::store::Repo;

/// The stored row, or an empty placeholder when the student has none yet.
pub async fn get_or_init<R: Repo>(repo: &mut R, student_id: UserId, course_id: &str) -> Result<Progress> {
    Ok(repo
        .progress(student_id, course_id)
        .await?
        .unwrap_or_else(|| Progress::empty(student_id, course_id)))
}

/// Creates the course row from a single lesson's state, when no row exists yet.
///
/// Safe to race: whoever comes second gets the first row back.
pub async fn materialize<R: Repo>(repo: &mut R, lesson: &Lesson, student_id: UserId) -> Result<Progress> {
    repo.lock_student_course(student_id, &lesson.course_id).await?;
    if let Some(row) = repo.lock_progress(student_id, &lesson.course_id).await? {
        return Ok(row);
    }
    // re-read under the lock; a writer may have committed since the caller looked
    let unlocked = repo
        .student_lesson(student_id, &lesson.id)
        .await?
        .map_or(false, |sl| sl.is_unlocked);

    let mut seed = Progress::new(student_id, &lesson.course_id);
    if unlocked {
        seed.add_unlocked(&lesson.id);
        seed.current_lesson_id = Some(lesson.id.clone());
    }
    let stored = repo.ensure_progress(&seed).await?;
    if stored.id == seed.id {
        tracing::info!(student=%student_id, course=%lesson.course_id, "progress materialised from lesson state");
    }
    Ok(stored)
}
