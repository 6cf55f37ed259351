use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::{Staff, Viewer};
use crate::error::{AcademyError, Result};
use crate::extract::{Body, Id, Params};
use crate::models::*;
use crate::service::Academy;
use crate::store::Store;

pub fn router<S: Store>(academy: Academy<S>) -> Router {
    Router::new()
        // catalogue
        .route("/api/courses", get(list_courses::<S>).post(create_course::<S>))
        .route("/api/courses/:course_id/lessons", get(course_lessons::<S>))
        .route("/api/lessons", post(create_lesson::<S>))
        .route("/api/lessons/:lesson_id", get(lesson::<S>))
        .route("/api/lessons/:lesson_id/lock", get(lock_state::<S>))
        .route(
            "/api/student-challenges",
            get(list_student_challenges::<S>).put(put_student_challenge::<S>),
        )
        // progress
        .route("/api/check-code", post(check_code::<S>))
        .route("/api/student-lessons", get(list_student_lessons::<S>))
        .route("/api/student-lessons/unlock", post(set_unlocked::<S>))
        .route("/api/student-lessons/complete", post(complete_lesson::<S>))
        .route("/api/progress", get(progress::<S>))
        // review
        .route("/api/submissions", get(list_submissions::<S>))
        .route("/api/submissions/:id", get(submission::<S>))
        .route("/api/submissions/:id/approve", post(approve::<S>))
        .route("/api/submissions/:id/reject", post(reject::<S>))
        .with_state(academy)
}

async fn list_courses<S: Store>(State(academy): State<Academy<S>>) -> Result<Json<Vec<CourseSummary>>> {
    Ok(Json(academy.list_courses().await?))
}

async fn create_course<S: Store>(
    State(academy): State<Academy<S>>,
    Staff(_): Staff,
    Body(req): Body<CreateCourseReq>,
) -> Result<(StatusCode, Json<Course>)> {
    Ok((StatusCode::CREATED, Json(academy.create_course(req).await?)))
}

async fn course_lessons<S: Store>(
    State(academy): State<Academy<S>>,
    Viewer(who): Viewer,
    Id(course_id): Id<String>,
) -> Result<Json<Vec<LessonView>>> {
    Ok(Json(academy.course_lessons(&course_id, who.as_ref()).await?))
}

async fn create_lesson<S: Store>(
    State(academy): State<Academy<S>>,
    Staff(_): Staff,
    Body(req): Body<CreateLessonReq>,
) -> Result<(StatusCode, Json<LessonView>)> {
    Ok((StatusCode::CREATED, Json(academy.create_lesson(req).await?)))
}

async fn lesson<S: Store>(
    State(academy): State<Academy<S>>,
    Viewer(who): Viewer,
    Id(lesson_id): Id<String>,
) -> Result<Json<LessonView>> {
    Ok(Json(academy.lesson(&lesson_id, who.as_ref()).await?))
}

async fn lock_state<S: Store>(
    State(academy): State<Academy<S>>,
    Viewer(who): Viewer,
    Id(lesson_id): Id<String>,
) -> Result<Json<LockState>> {
    let is_locked = academy.lesson_lock_state(&lesson_id, who.as_ref()).await?;
    Ok(Json(LockState { lesson_id, is_locked }))
}

async fn put_student_challenge<S: Store>(
    State(academy): State<Academy<S>>,
    Staff(_): Staff,
    Body(req): Body<StudentChallengeReq>,
) -> Result<Json<StudentChallenge>> {
    Ok(Json(academy.put_student_challenge(req).await?))
}

async fn check_code<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Body(req): Body<CheckCodeReq>,
) -> Result<Json<CheckCodeResp>> {
    Ok(Json(academy.submit_result(&who, req).await?))
}

async fn list_student_lessons<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Params(q): Params<StudentRecordQuery>,
) -> Result<Json<Vec<StudentLesson>>> {
    Ok(Json(academy.list_student_lessons(&who, q).await?))
}

async fn list_student_challenges<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Params(q): Params<StudentRecordQuery>,
) -> Result<Json<Vec<StudentChallenge>>> {
    Ok(Json(academy.list_student_challenges(&who, q).await?))
}

async fn set_unlocked<S: Store>(
    State(academy): State<Academy<S>>,
    Staff(_): Staff,
    Body(req): Body<SetUnlockedReq>,
) -> Result<Json<StudentLesson>> {
    Ok(Json(academy.set_lesson_unlocked(req).await?))
}

async fn complete_lesson<S: Store>(
    State(academy): State<Academy<S>>,
    Staff(_): Staff,
    Body(req): Body<CompleteLessonReq>,
) -> Result<Json<StudentLesson>> {
    Ok(Json(academy.mark_lesson_completed(req).await?))
}

async fn progress<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Params(q): Params<ProgressQuery>,
) -> Result<Json<Progress>> {
    // students default to, and are limited to, their own progress
    let user_id = match q.user_id {
        Some(id) if id != who.user_id && !who.role.can_review() => {
            return Err(AcademyError::Forbidden("students may only read their own progress"));
        }
        Some(id) => Some(id),
        None if who.role.can_review() => None,
        None => Some(who.user_id),
    };
    Ok(Json(academy.get_or_init_progress(user_id, q.course_id).await?))
}

async fn list_submissions<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Params(q): Params<SubmissionQuery>,
) -> Result<Json<Vec<Submission>>> {
    Ok(Json(academy.list_submissions(&who, q).await?))
}

async fn submission<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Id(id): Id<Uuid>,
) -> Result<Json<Submission>> {
    Ok(Json(academy.submission(&who, id).await?))
}

async fn approve<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Id(id): Id<Uuid>,
    body: Option<Json<ReviewReq>>,
) -> Result<Json<Submission>> {
    let comment = body.and_then(|Json(r)| r.admin_comment);
    Ok(Json(academy.approve_submission(id, &who, comment).await?))
}

async fn reject<S: Store>(
    State(academy): State<Academy<S>>,
    who: Identity,
    Id(id): Id<Uuid>,
    body: Option<Json<ReviewReq>>,
) -> Result<Json<Submission>> {
    let comment = body.and_then(|Json(r)| r.admin_comment);
    Ok(Json(academy.reject_submission(id, &who, comment).await?))
}
