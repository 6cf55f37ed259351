//! Submission review workflow.
//!
//! ```text
//!            passing attempt             approve
//!   (none) ----------------> pending ---------------> approved
//!                             |  ^                       |
//!                      reject |  +--- passing attempt ---+
//!                             v
//!                          rejected   (kept as history; the next
//!                                      passing attempt opens a new row)
//! ```

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AcademyError, Result};
use crate::lessons;
use crate::models::{Attempt, Identity, Submission, SubmissionStatus};
use crate::reconcile;
use crate::store::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn status(self) -> SubmissionStatus {
        match self {
            Decision::Approve => SubmissionStatus::Approved,
            Decision::Reject => SubmissionStatus::Rejected,
        }
    }
}

/// Records a passing attempt: overwrites the active submission for the
/// (student, lesson) pair or opens a new one.
pub async fn record_attempt<R: Repo>(repo: &mut R, attempt: Attempt) -> Result<Submission> {
    loop {
        if let Some(mut active) = repo.active_submission(attempt.student_id, &attempt.lesson_id).await? {
            overwrite(&mut active, &attempt);
            repo.save_submission(&active).await?;
            tracing::info!(submission=%active.id, student=%active.student_id, lesson=%active.lesson_id, "submission updated");
            return Ok(active);
        }
        let fresh = attempt.clone().into_submission();
        if repo.insert_active_submission(&fresh).await? {
            tracing::info!(submission=%fresh.id, student=%fresh.student_id, lesson=%fresh.lesson_id, "submission created");
            return Ok(fresh);
        }
        // a concurrent attempt created the active row first; go round and update it
    }
}

fn overwrite(sub: &mut Submission, attempt: &Attempt) {
    sub.code = attempt.code.clone();
    sub.output = attempt.output.clone();
    sub.error = attempt.error.clone();
    sub.passed_auto_check = true;
    if sub.status == SubmissionStatus::Approved {
        // new work needs a fresh review
        sub.status = SubmissionStatus::Pending;
        sub.reviewed_by = None;
        sub.reviewed_at = None;
        sub.admin_comment = None;
    }
}

/// Approves or rejects a submission. Approval unlocks the next lesson and
/// completes the submitted one, all in the caller's transaction.
pub async fn review<R: Repo>(
    repo: &mut R,
    submission_id: Uuid,
    reviewer: &Identity,
    decision: Decision,
    comment: Option<String>,
) -> Result<Submission> {
    if !reviewer.role.can_review() {
        tracing::warn!(user=%reviewer.user_id, submission=%submission_id, ?decision, "review refused");
        return Err(AcademyError::Forbidden("only admins or teachers may review submissions"));
    }

    let mut sub = repo
        .lock_submission(submission_id)
        .await?
        .ok_or_else(|| AcademyError::not_found("submission", submission_id))?;

    // reviving a rejected row must not create a second active one
    if decision == Decision::Approve && sub.status == SubmissionStatus::Rejected {
        if let Some(active) = repo.active_submission(sub.student_id, &sub.lesson_id).await? {
            if active.id != sub.id {
                return Err(AcademyError::validation(
                    "a newer attempt for this lesson is awaiting review",
                ));
            }
        }
    }

    sub.status = decision.status();
    sub.admin_comment = Some(comment.unwrap_or_default());
    sub.reviewed_by = Some(reviewer.user_id);
    sub.reviewed_at = Some(Utc::now());
    repo.save_submission(&sub).await?;
    tracing::info!(submission=%sub.id, reviewer=%reviewer.user_id, status=%sub.status, "submission reviewed");

    if decision == Decision::Approve {
        cascade(repo, &sub).await?;
    }
    Ok(sub)
}

async fn cascade<R: Repo>(repo: &mut R, sub: &Submission) -> Result<()> {
    let lesson = lessons::find(repo, &sub.lesson_id).await?;

    let next = match lesson.order.checked_add(1) {
        Some(order) => repo.lesson_at(&lesson.course_id, order).await?,
        None => None,
    };
    if let Some(next) = next {
        reconcile::set_unlocked(repo, &next, sub.student_id, true).await?;
    }
    reconcile::mark_completed(repo, &lesson, sub.student_id).await?;
    Ok(())
}
