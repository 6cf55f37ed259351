use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Repo, Store, StoreError};
use crate::models::{
    Challenge, Course, CourseSummary, Identity, Lesson, Progress, StudentChallenge,
    StudentLesson, StudentRecordFilter, Submission, SubmissionFilter, UserId,
};

/// Full contents of a [`MemoryStore`]. Also what [`MemoryStore::snapshot`] returns.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub tokens: HashMap<String, Identity>,
    pub courses: HashMap<String, Course>,
    pub lessons: HashMap<String, Lesson>,
    pub challenges: HashMap<String, Challenge>,
    pub student_challenges: HashMap<(UserId, String), StudentChallenge>,
    pub student_lessons: HashMap<(UserId, String), StudentLesson>,
    pub progress: HashMap<(UserId, String), Progress>,
    pub submissions: HashMap<Uuid, Submission>,
}

/// Process-local store for development and tests.
///
/// Transactions are serialised on one lock and work on a private copy of the
/// tables, published on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bearer token for `identity`, standing in for the identity service.
    pub async fn issue_token(&self, identity: Identity) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tables.lock().await.tokens.insert(token.clone(), identity);
        token
    }

    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx { guard, work })
    }
}

fn key(student_id: UserId, id: &str) -> (UserId, String) {
    (student_id, id.to_string())
}

fn matches(filter: &StudentRecordFilter, student_id: UserId, lesson_id: &str) -> bool {
    filter.student_id.map_or(true, |id| id == student_id)
        && filter.lesson_id.as_deref().map_or(true, |id| id == lesson_id)
}

#[async_trait]
impl Repo for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { mut guard, work } = self;
        *guard = work;
        Ok(())
    }

    async fn identity_for_token(&mut self, token: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.work.tokens.get(token).copied())
    }

    async fn insert_course(&mut self, course: &Course) -> Result<bool, StoreError> {
        if self.work.courses.contains_key(&course.id) {
            return Ok(false);
        }
        self.work.courses.insert(course.id.clone(), course.clone());
        Ok(true)
    }

    async fn course(&mut self, id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.work.courses.get(id).cloned())
    }

    async fn list_courses(&mut self) -> Result<Vec<CourseSummary>, StoreError> {
        let mut out: Vec<CourseSummary> = self
            .work
            .courses
            .values()
            .map(|c| CourseSummary {
                course: c.clone(),
                lessons_count: self.work.lessons.values().filter(|l| l.course_id == c.id).count() as i64,
            })
            .collect();
        out.sort_by(|a, b| a.course.title.cmp(&b.course.title));
        Ok(out)
    }

    async fn insert_lesson(&mut self, lesson: &Lesson) -> Result<bool, StoreError> {
        let taken = self.work.lessons.contains_key(&lesson.id)
            || self
                .work
                .lessons
                .values()
                .any(|l| l.course_id == lesson.course_id && l.order == lesson.order);
        if taken {
            return Ok(false);
        }
        self.work.lessons.insert(lesson.id.clone(), lesson.clone());
        Ok(true)
    }

    async fn lesson(&mut self, id: &str) -> Result<Option<Lesson>, StoreError> {
        Ok(self.work.lessons.get(id).cloned())
    }

    async fn lesson_at(&mut self, course_id: &str, order: i32) -> Result<Option<Lesson>, StoreError> {
        Ok(self
            .work
            .lessons
            .values()
            .find(|l| l.course_id == course_id && l.order == order)
            .cloned())
    }

    async fn course_lessons(&mut self, course_id: &str) -> Result<Vec<Lesson>, StoreError> {
        let mut lessons: Vec<Lesson> = self
            .work
            .lessons
            .values()
            .filter(|l| l.course_id == course_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.order);
        Ok(lessons)
    }

    async fn put_challenge(&mut self, challenge: &Challenge) -> Result<(), StoreError> {
        self.work
            .challenges
            .insert(challenge.lesson_id.clone(), challenge.clone());
        Ok(())
    }

    async fn challenge(&mut self, lesson_id: &str) -> Result<Option<Challenge>, StoreError> {
        Ok(self.work.challenges.get(lesson_id).cloned())
    }

    async fn put_student_challenge(&mut self, sc: &StudentChallenge) -> Result<StudentChallenge, StoreError> {
        let k = key(sc.student_id, &sc.lesson_id);
        let stored = match self.work.student_challenges.get(&k) {
            Some(existing) => StudentChallenge {
                id: existing.id,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..sc.clone()
            },
            None => sc.clone(),
        };
        self.work.student_challenges.insert(k, stored.clone());
        Ok(stored)
    }

    async fn student_challenge(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentChallenge>, StoreError> {
        Ok(self.work.student_challenges.get(&key(student_id, lesson_id)).cloned())
    }

    async fn list_student_challenges(
        &mut self,
        filter: &StudentRecordFilter,
    ) -> Result<Vec<StudentChallenge>, StoreError> {
        let mut out: Vec<StudentChallenge> = self
            .work
            .student_challenges
            .values()
            .filter(|sc| matches(filter, sc.student_id, &sc.lesson_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn lock_student_course(&mut self, _student_id: UserId, _course_id: &str) -> Result<(), StoreError> {
        // the whole transaction already holds the store lock
        Ok(())
    }

    async fn student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentLesson>, StoreError> {
        Ok(self.work.student_lessons.get(&key(student_id, lesson_id)).cloned())
    }

    async fn get_or_create_student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<StudentLesson, StoreError> {
        Ok(self
            .work
            .student_lessons
            .entry(key(student_id, lesson_id))
            .or_insert_with(|| StudentLesson::new(student_id, lesson_id))
            .clone())
    }

    async fn save_student_lesson(&mut self, sl: &StudentLesson) -> Result<(), StoreError> {
        let mut row = sl.clone();
        row.updated_at = Utc::now();
        self.work
            .student_lessons
            .insert(key(sl.student_id, &sl.lesson_id), row);
        Ok(())
    }

    async fn list_student_lessons(&mut self, filter: &StudentRecordFilter) -> Result<Vec<StudentLesson>, StoreError> {
        let mut out: Vec<StudentLesson> = self
            .work
            .student_lessons
            .values()
            .filter(|sl| matches(filter, sl.student_id, &sl.lesson_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError> {
        Ok(self.work.progress.get(&key(student_id, course_id)).cloned())
    }

    async fn lock_progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError> {
        self.progress(student_id, course_id).await
    }

    async fn ensure_progress(&mut self, seed: &Progress) -> Result<Progress, StoreError> {
        Ok(self
            .work
            .progress
            .entry(key(seed.student_id, &seed.course_id))
            .or_insert_with(|| seed.clone())
            .clone())
    }

    async fn save_progress(&mut self, progress: &Progress) -> Result<(), StoreError> {
        let mut row = progress.clone();
        row.updated_at = Utc::now();
        self.work
            .progress
            .insert(key(progress.student_id, &progress.course_id), row);
        Ok(())
    }

    async fn submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(self.work.submissions.get(&id).cloned())
    }

    async fn lock_submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        self.submission(id).await
    }

    async fn active_submission(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        Ok(self
            .work
            .submissions
            .values()
            .filter(|s| s.student_id == student_id && s.lesson_id == lesson_id && s.status.is_active())
            .max_by_key(|s| s.submitted_at)
            .cloned())
    }

    async fn insert_active_submission(&mut self, submission: &Submission) -> Result<bool, StoreError> {
        let exists = self
            .active_submission(submission.student_id, &submission.lesson_id)
            .await?
            .is_some();
        if exists {
            return Ok(false);
        }
        self.work.submissions.insert(submission.id, submission.clone());
        Ok(true)
    }

    async fn save_submission(&mut self, submission: &Submission) -> Result<(), StoreError> {
        let mut row = submission.clone();
        row.updated_at = Utc::now();
        self.work.submissions.insert(submission.id, row);
        Ok(())
    }

    async fn list_submissions(&mut self, filter: &SubmissionFilter) -> Result<Vec<Submission>, StoreError> {
        let mut out: Vec<Submission> = self
            .work
            .submissions
            .values()
            .filter(|s| filter.student_id.map_or(true, |id| s.student_id == id))
            .filter(|s| filter.lesson_id.as_deref().map_or(true, |id| s.lesson_id == id))
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(out)
    }
}
