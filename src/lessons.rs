//! Lesson graph: ordered lessons per course and the lock predicate.

use crate::error::{AcademyError, Result};
use crate::evaluator;
use crate::models::{Identity, Lesson, LessonView};
use crate::progress;
use crate::store::Repo;

/// Whether `lesson` is locked for `who`.
///
/// Rules, first match wins:
/// 1. anonymous callers get the lesson's static flag;
/// 2. the first lesson of a course is always open;
/// 3. with a progress row: open if listed as unlocked, otherwise open only when
///    the previous lesson is completed (static flag if there is no previous one);
/// 4. with only a per-lesson row: a progress row is materialised from its
///    unlock flag and rule 3 is applied to it, so the next call, which takes
///    rule 3 directly, gives the same answer;
/// 5. otherwise locked.
///
/// Repeated calls without intervening writes give the same answer and write
/// nothing after the first.
pub async fn is_locked<R: Repo>(repo: &mut R, lesson: &Lesson, who: Option<&Identity>) -> Result<bool> {
    let Some(who) = who else {
        return Ok(lesson.is_locked);
    };
    if lesson.is_first() {
        return Ok(false);
    }
    let student_id = who.user_id;

    let row = match repo.progress(student_id, &lesson.course_id).await? {
        Some(row) => row,
        None => {
            if repo.student_lesson(student_id, &lesson.id).await?.is_none() {
                return Ok(true);
            }
            progress::materialize(repo, lesson, student_id).await?
        }
    };

    if row.is_unlocked(&lesson.id) {
        return Ok(false);
    }
    let previous = match lesson.order.checked_sub(1) {
        Some(order) => repo.lesson_at(&lesson.course_id, order).await?,
        None => None,
    };
    match previous {
        None => Ok(lesson.is_locked),
        Some(prev) => Ok(!row.is_completed(&prev.id)),
    }
}

pub async fn find<R: Repo>(repo: &mut R, lesson_id: &str) -> Result<Lesson> {
    repo.lesson(lesson_id)
        .await?
        .ok_or_else(|| AcademyError::not_found("lesson", lesson_id))
}

pub async fn view<R: Repo>(repo: &mut R, lesson: Lesson, who: Option<&Identity>) -> Result<LessonView> {
    let locked = is_locked(repo, &lesson, who).await?;
    let challenge = evaluator::active_challenge(repo, who.map(|w| w.user_id), &lesson.id).await?;
    Ok(LessonView::new(lesson, locked, challenge))
}

/// All lessons of a course in order, as seen by `who`.
pub async fn course_view<R: Repo>(repo: &mut R, course_id: &str, who: Option<&Identity>) -> Result<Vec<LessonView>> {
    if repo.course(course_id).await?.is_none() {
        return Err(AcademyError::not_found("course", course_id));
    }
    let mut out = Vec::new();
    for lesson in repo.course_lessons(course_id).await? {
        out.push(view(repo, lesson, who).await?);
    }
    Ok(out)
}
