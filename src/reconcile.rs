//! Keeps per-lesson flags and the per-course progress sets in agreement.
//!
//! For every student and lesson, `StudentLesson.is_unlocked` holds exactly when
//! the lesson id is in the matching `Progress.unlocked_lesson_ids`. Both
//! functions here write both sides inside the caller's transaction.
//!
//! Lock order: [`Repo::lock_student_course`] first, then the per-lesson row,
//! then the progress row. Every writer follows it, so concurrent updates for
//! lessons of the same course queue up instead of deadlocking or losing
//! each other's entries.

use chrono::Utc;

use crate::error::Result;
use crate::models::{Lesson, Progress, StudentLesson, UserId};
use crate::store::Repo;

/// Sets the unlock flag of (student, lesson), creating the row if needed.
pub async fn set_unlocked<R: Repo>(
    repo: &mut R,
    lesson: &Lesson,
    student_id: UserId,
    unlocked: bool,
) -> Result<StudentLesson> {
    repo.lock_student_course(student_id, &lesson.course_id).await?;
    let mut sl = repo.get_or_create_student_lesson(student_id, &lesson.id).await?;
    sl.is_unlocked = unlocked;
    repo.save_student_lesson(&sl).await?;

    let mut progress = match repo.lock_progress(sl.student_id, &lesson.course_id).await? {
        Some(p) => p,
        None if unlocked => {
            let mut seed = Progress::new(sl.student_id, &lesson.course_id);
            seed.add_unlocked(&lesson.id);
            seed.current_lesson_id = Some(lesson.id.clone());
            repo.ensure_progress(&seed).await?
        }
        // nothing to remove from
        None => return Ok(sl),
    };

    let changed = if unlocked {
        progress.add_unlocked(&lesson.id)
    } else {
        progress.remove_unlocked(&lesson.id)
    };
    if changed {
        repo.save_progress(&progress).await?;
    }
    tracing::info!(student=%sl.student_id, lesson=%lesson.id, unlocked, "lesson unlock state set");
    Ok(sl)
}

/// Completion implies unlocked, on both sides.
pub async fn mark_completed<R: Repo>(repo: &mut R, lesson: &Lesson, student_id: UserId) -> Result<StudentLesson> {
    repo.lock_student_course(student_id, &lesson.course_id).await?;
    let mut sl = repo.get_or_create_student_lesson(student_id, &lesson.id).await?;
    sl.is_completed = true;
    sl.is_unlocked = true;
    sl.completed_at = Some(Utc::now());
    repo.save_student_lesson(&sl).await?;

    let mut progress = match repo.lock_progress(sl.student_id, &lesson.course_id).await? {
        Some(p) => p,
        None => {
            let mut seed = Progress::new(sl.student_id, &lesson.course_id);
            seed.add_completed(&lesson.id);
            seed.add_unlocked(&lesson.id);
            seed.current_lesson_id = Some(lesson.id.clone());
            repo.ensure_progress(&seed).await?
        }
    };

    let mut changed = progress.add_completed(&lesson.id);
    changed |= progress.add_unlocked(&lesson.id);
    if progress.current_lesson_id.as_deref() != Some(lesson.id.as_str()) {
        progress.current_lesson_id = Some(lesson.id.clone());
        changed = true;
    }
    if changed {
        repo.save_progress(&progress).await?;
    }
    tracing::info!(student=%sl.student_id, lesson=%lesson.id, "lesson completed");
    Ok(sl)
}
