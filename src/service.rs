//! Caller-facing operations. Each one runs in a single transaction: it either
//! commits all of its writes or none of them.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{required, AcademyError, Result};
use crate::evaluator::{self, Verdict};
use crate::lessons;
use crate::models::*;
use crate::progress;
use crate::reconcile;
use crate::store::{Repo, Store};
use crate::workflow::{self, Decision};

#[derive(Clone)]
pub struct Academy<S> {
    store: S,
}

impl<S: Store> Academy<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity> {
        let mut tx = self.store.begin().await?;
        tx.identity_for_token(token)
            .await?
            .ok_or(AcademyError::Unauthorized)
    }

    /// Judges reported execution output and, on a pass, records it for review.
    pub async fn submit_result(&self, who: &Identity, req: CheckCodeReq) -> Result<CheckCodeResp> {
        let lesson_id = required(req.lesson_id, "lesson_id")?;
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, &lesson_id).await?;
        let challenge = evaluator::active_challenge(&mut tx, Some(who.user_id), &lesson.id).await?;

        let verdict = evaluator::judge(challenge.as_ref(), &req.output, req.error.as_deref());
        tracing::debug!(student=%who.user_id, lesson=%lesson.id, ?verdict, "output judged");

        let mut resp = CheckCodeResp {
            passed: verdict.passed(),
            message: verdict.message().to_string(),
            expected: verdict.expected().map(str::to_string),
            actual: Some(req.output.clone()),
            error: None,
            submission_id: None,
        };
        match verdict {
            Verdict::ExecutionError(err) => resp.error = Some(err),
            Verdict::Mismatch { .. } => {}
            Verdict::Unchecked | Verdict::Matched { .. } => {
                let submission = workflow::record_attempt(
                    &mut tx,
                    Attempt {
                        student_id: who.user_id,
                        lesson_id: lesson.id.clone(),
                        code: req.code,
                        output: req.output,
                        error: req.error.filter(|e| !e.is_empty()),
                    },
                )
                .await?;
                tx.commit().await?;
                resp.submission_id = Some(submission.id);
            }
        }
        Ok(resp)
    }

    pub async fn set_lesson_unlocked(&self, req: SetUnlockedReq) -> Result<StudentLesson> {
        let student_id = required(req.student_id, "student_id")?;
        let lesson_id = required(req.lesson_id, "lesson_id")?;
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, &lesson_id).await?;
        let sl = reconcile::set_unlocked(&mut tx, &lesson, student_id, req.unlocked).await?;
        tx.commit().await?;
        Ok(sl)
    }

    pub async fn mark_lesson_completed(&self, req: CompleteLessonReq) -> Result<StudentLesson> {
        let student_id = required(req.student_id, "student_id")?;
        let lesson_id = required(req.lesson_id, "lesson_id")?;
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, &lesson_id).await?;
        let sl = reconcile::mark_completed(&mut tx, &lesson, student_id).await?;
        tx.commit().await?;
        Ok(sl)
    }

    pub async fn approve_submission(
        &self,
        submission_id: Uuid,
        reviewer: &Identity,
        comment: Option<String>,
    ) -> Result<Submission> {
        self.review(submission_id, reviewer, Decision::Approve, comment).await
    }

    pub async fn reject_submission(
        &self,
        submission_id: Uuid,
        reviewer: &Identity,
        comment: Option<String>,
    ) -> Result<Submission> {
        self.review(submission_id, reviewer, Decision::Reject, comment).await
    }

    async fn review(
        &self,
        submission_id: Uuid,
        reviewer: &Identity,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Submission> {
        let mut tx = self.store.begin().await?;
        let sub = workflow::review(&mut tx, submission_id, reviewer, decision, comment).await?;
        tx.commit().await?;
        Ok(sub)
    }

    pub async fn lesson_lock_state(&self, lesson_id: &str, who: Option<&Identity>) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, lesson_id).await?;
        let locked = lessons::is_locked(&mut tx, &lesson, who).await?;
        // may have materialised a progress row
        tx.commit().await?;
        Ok(locked)
    }

    pub async fn get_or_init_progress(&self, student_id: Option<UserId>, course_id: Option<String>) -> Result<Progress> {
        let student_id = required(student_id, "user_id")?;
        let course_id = required(course_id, "course_id")?;
        let mut tx = self.store.begin().await?;
        progress::get_or_init(&mut tx, student_id, &course_id).await
    }

    // --- catalogue ---

    pub async fn create_course(&self, req: CreateCourseReq) -> Result<Course> {
        let course = Course {
            id: required(req.id, "id")?,
            title: required(req.title, "title")?,
            description: req.description,
            created_at: Utc::now(),
        };
        let mut tx = self.store.begin().await?;
        if !tx.insert_course(&course).await? {
            return Err(AcademyError::validation(format!("course {} already exists", course.id)));
        }
        tx.commit().await?;
        tracing::info!(course=%course.id, "course created");
        Ok(course)
    }

    pub async fn list_courses(&self) -> Result<Vec<CourseSummary>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_courses().await?)
    }

    pub async fn create_lesson(&self, req: CreateLessonReq) -> Result<LessonView> {
        let lesson = Lesson {
            id: required(req.id, "id")?,
            course_id: required(req.course_id, "course_id")?,
            title: required(req.title, "title")?,
            description: req.description,
            content: req.content,
            order: required(req.order, "order")?,
            is_locked: req.is_locked,
            created_at: Utc::now(),
        };
        if lesson.order < 1 {
            return Err(AcademyError::validation("order must be 1 or greater"));
        }
        let mut tx = self.store.begin().await?;
        if tx.course(&lesson.course_id).await?.is_none() {
            return Err(AcademyError::not_found("course", &lesson.course_id));
        }
        if !tx.insert_lesson(&lesson).await? {
            return Err(AcademyError::validation(format!(
                "lesson id {} or order {} is already used in course {}",
                lesson.id, lesson.order, lesson.course_id
            )));
        }
        let challenge = req.challenge.map(|c| Challenge {
            lesson_id: lesson.id.clone(),
            instructions: c.instructions,
            initial_code: c.initial_code,
            expected_output: c.expected_output,
            hints: c.hints,
        });
        if let Some(challenge) = &challenge {
            tx.put_challenge(challenge).await?;
        }
        tx.commit().await?;
        tracing::info!(lesson=%lesson.id, course=%lesson.course_id, order=lesson.order, "lesson created");
        let locked = lesson.is_locked;
        Ok(LessonView::new(lesson, locked, challenge))
    }

    pub async fn course_lessons(&self, course_id: &str, who: Option<&Identity>) -> Result<Vec<LessonView>> {
        let mut tx = self.store.begin().await?;
        let views = lessons::course_view(&mut tx, course_id, who).await?;
        tx.commit().await?;
        Ok(views)
    }

    pub async fn lesson(&self, lesson_id: &str, who: Option<&Identity>) -> Result<LessonView> {
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, lesson_id).await?;
        let view = lessons::view(&mut tx, lesson, who).await?;
        tx.commit().await?;
        Ok(view)
    }

    pub async fn put_student_challenge(&self, req: StudentChallengeReq) -> Result<StudentChallenge> {
        let student_id = required(req.student_id, "student_id")?;
        let lesson_id = required(req.lesson_id, "lesson_id")?;
        let mut tx = self.store.begin().await?;
        let lesson = lessons::find(&mut tx, &lesson_id).await?;
        let now = Utc::now();
        let stored = tx
            .put_student_challenge(&StudentChallenge {
                id: Uuid::new_v4(),
                student_id,
                lesson_id: lesson.id,
                instructions: req.challenge.instructions,
                initial_code: req.challenge.initial_code,
                expected_output: req.challenge.expected_output,
                hints: req.challenge.hints,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tx.commit().await?;
        Ok(stored)
    }

    // --- submissions ---

    /// Students only ever see their own submissions.
    pub async fn list_submissions(&self, who: &Identity, query: SubmissionQuery) -> Result<Vec<Submission>> {
        let status = match query.status.as_deref() {
            None | Some("") => None,
            Some(s) => Some(
                SubmissionStatus::parse(s)
                    .ok_or_else(|| AcademyError::validation(format!("unknown status {s:?}")))?,
            ),
        };
        let student_id = if who.role.can_review() {
            query.student
        } else {
            Some(who.user_id)
        };
        let filter = SubmissionFilter {
            student_id,
            lesson_id: query.lesson,
            status,
        };
        let mut tx = self.store.begin().await?;
        Ok(tx.list_submissions(&filter).await?)
    }

    pub async fn submission(&self, who: &Identity, id: Uuid) -> Result<Submission> {
        let mut tx = self.store.begin().await?;
        match tx.submission(id).await? {
            Some(sub) if who.role.can_review() || sub.student_id == who.user_id => Ok(sub),
            _ => Err(AcademyError::not_found("submission", id)),
        }
    }

    // --- per-student rows ---

    pub async fn list_student_lessons(&self, who: &Identity, query: StudentRecordQuery) -> Result<Vec<StudentLesson>> {
        let filter = own_rows(who, query);
        let mut tx = self.store.begin().await?;
        Ok(tx.list_student_lessons(&filter).await?)
    }

    pub async fn list_student_challenges(
        &self,
        who: &Identity,
        query: StudentRecordQuery,
    ) -> Result<Vec<StudentChallenge>> {
        let filter = own_rows(who, query);
        let mut tx = self.store.begin().await?;
        Ok(tx.list_student_challenges(&filter).await?)
    }
}

/// Staff may filter by any student; students are pinned to themselves.
fn own_rows(who: &Identity, query: StudentRecordQuery) -> StudentRecordFilter {
    StudentRecordFilter {
        student_id: if who.role.can_review() {
            query.student
        } else {
            Some(who.user_id)
        },
        lesson_id: query.lesson,
    }
}
