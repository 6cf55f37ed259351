//! Persistence collaborator.
//!
//! A [`Store`] hands out transactions; a [`Repo`] is one open transaction.
//! Work done through a `Repo` becomes visible only after [`Repo::commit`];
//! dropping it rolls everything back. Every get-or-create below resolves
//! uniqueness races by re-reading the winning row, so callers never see a
//! constraint violation.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Challenge, Course, CourseSummary, Identity, Lesson, Progress, StudentChallenge,
    StudentLesson, StudentRecordFilter, Submission, SubmissionFilter, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Repo;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

#[async_trait]
pub trait Repo: Send {
    async fn commit(self) -> Result<(), StoreError>;

    async fn identity_for_token(&mut self, token: &str) -> Result<Option<Identity>, StoreError>;

    // catalogue

    /// Returns false when a course with this id already exists.
    async fn insert_course(&mut self, course: &Course) -> Result<bool, StoreError>;
    async fn course(&mut self, id: &str) -> Result<Option<Course>, StoreError>;
    async fn list_courses(&mut self) -> Result<Vec<CourseSummary>, StoreError>;

    /// Returns false when the id or the (course, order) slot is taken.
    async fn insert_lesson(&mut self, lesson: &Lesson) -> Result<bool, StoreError>;
    async fn lesson(&mut self, id: &str) -> Result<Option<Lesson>, StoreError>;
    async fn lesson_at(&mut self, course_id: &str, order: i32) -> Result<Option<Lesson>, StoreError>;
    /// Ordered by `order`.
    async fn course_lessons(&mut self, course_id: &str) -> Result<Vec<Lesson>, StoreError>;

    async fn put_challenge(&mut self, challenge: &Challenge) -> Result<(), StoreError>;
    async fn challenge(&mut self, lesson_id: &str) -> Result<Option<Challenge>, StoreError>;
    /// Upsert keyed by (student, lesson); returns the stored row.
    async fn put_student_challenge(&mut self, sc: &StudentChallenge) -> Result<StudentChallenge, StoreError>;
    async fn student_challenge(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentChallenge>, StoreError>;
    async fn list_student_challenges(
        &mut self,
        filter: &StudentRecordFilter,
    ) -> Result<Vec<StudentChallenge>, StoreError>;

    // per-lesson state

    /// Serialises every writer of one student's unlock state in one course
    /// until commit. Must be taken before any `student_lessons` or `progress`
    /// row of that pair is locked or created.
    async fn lock_student_course(&mut self, student_id: UserId, course_id: &str) -> Result<(), StoreError>;

    async fn student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentLesson>, StoreError>;
    /// Fetches the row, inserting a locked/incomplete one first if absent. The row is locked.
    async fn get_or_create_student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<StudentLesson, StoreError>;
    async fn save_student_lesson(&mut self, sl: &StudentLesson) -> Result<(), StoreError>;
    async fn list_student_lessons(&mut self, filter: &StudentRecordFilter) -> Result<Vec<StudentLesson>, StoreError>;

    // per-course progress

    async fn progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError>;
    /// Like [`Repo::progress`] but holds the row until commit.
    async fn lock_progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError>;
    /// Inserts `seed` unless a row for its (student, course) exists; returns the stored row, locked.
    async fn ensure_progress(&mut self, seed: &Progress) -> Result<Progress, StoreError>;
    async fn save_progress(&mut self, progress: &Progress) -> Result<(), StoreError>;

    // submissions

    async fn submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError>;
    async fn lock_submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError>;
    /// Latest non-rejected submission for the pair, locked.
    async fn active_submission(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<Submission>, StoreError>;
    /// Returns false, writing nothing, when the pair already has an active submission.
    async fn insert_active_submission(&mut self, submission: &Submission) -> Result<bool, StoreError>;
    async fn save_submission(&mut self, submission: &Submission) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_submissions(&mut self, filter: &SubmissionFilter) -> Result<Vec<Submission>, StoreError>;
}
