use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, types::Json, Postgres, Transaction};
use uuid::Uuid;

use super::{Repo, Store, StoreError};
use crate::db::Db;
use crate::models::{
    Challenge, Course, CourseSummary, Identity, Lesson, Progress, Role, StudentChallenge,
    StudentLesson, StudentRecordFilter, Submission, SubmissionFilter, UserId,
};

#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
        })
    }
}

const SELECT_LESSON: &str = r#"
    SELECT id, course_id, title, description, content, lesson_order, is_locked, created_at
    FROM lessons
"#;

const STUDENT_LESSON_COLUMNS: &str =
    "id, student_id, lesson_id, is_unlocked, is_completed, completed_at, created_at, updated_at";

const SELECT_STUDENT_LESSON: &str = r#"
    SELECT id, student_id, lesson_id, is_unlocked, is_completed, completed_at, created_at, updated_at
    FROM student_lessons
    WHERE student_id = $1 AND lesson_id = $2
"#;

const STUDENT_CHALLENGE_COLUMNS: &str =
    "id, student_id, lesson_id, instructions, initial_code, expected_output, hints, created_at, updated_at";

const PAIR_FILTER: &str = "WHERE ($1::uuid IS NULL OR student_id = $1) AND ($2::text IS NULL OR lesson_id = $2)";

const SELECT_PROGRESS: &str = r#"
    SELECT id, student_id, course_id, completed_lesson_ids, unlocked_lesson_ids, current_lesson_id, updated_at
    FROM progress
    WHERE student_id = $1 AND course_id = $2
"#;

const SELECT_SUBMISSION: &str = r#"
    SELECT id, student_id, lesson_id, code, output, error, passed_auto_check, status,
           admin_comment, reviewed_by, reviewed_at, submitted_at, updated_at
    FROM submissions
"#;

#[async_trait]
impl Repo for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn identity_for_token(&mut self, token: &str) -> Result<Option<Identity>, StoreError> {
        let row: Option<(Uuid, Role)> = query_as(
            r#"
            SELECT u.id, u.role
            FROM auth_tokens t JOIN users u ON u.id = t.user_id
            WHERE t.key = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(user_id, role)| Identity::new(user_id, role)))
    }

    async fn insert_course(&mut self, course: &Course) -> Result<bool, StoreError> {
        let res = query(
            r#"
            INSERT INTO courses (id, title, description, created_at)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn course(&mut self, id: &str) -> Result<Option<Course>, StoreError> {
        Ok(
            query_as("SELECT id, title, description, created_at FROM courses WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn list_courses(&mut self) -> Result<Vec<CourseSummary>, StoreError> {
        let rows: Vec<(String, String, String, DateTime<Utc>, i64)> = query_as(
            r#"
            SELECT c.id, c.title, c.description, c.created_at, COUNT(l.id)
            FROM courses c LEFT JOIN lessons l ON l.course_id = c.id
            GROUP BY c.id
            ORDER BY c.title
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, description, created_at, lessons_count)| CourseSummary {
                course: Course {
                    id,
                    title,
                    description,
                    created_at,
                },
                lessons_count,
            })
            .collect())
    }

    async fn insert_lesson(&mut self, lesson: &Lesson) -> Result<bool, StoreError> {
        // no conflict target: a clash on the id or on (course_id, lesson_order) both skip
        let res = query(
            r#"
            INSERT INTO lessons (id, course_id, title, description, content, lesson_order, is_locked, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&lesson.id)
        .bind(&lesson.course_id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.content)
        .bind(lesson.order)
        .bind(lesson.is_locked)
        .bind(lesson.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn lesson(&mut self, id: &str) -> Result<Option<Lesson>, StoreError> {
        Ok(query_as(&format!("{SELECT_LESSON} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn lesson_at(&mut self, course_id: &str, order: i32) -> Result<Option<Lesson>, StoreError> {
        Ok(
            query_as(&format!("{SELECT_LESSON} WHERE course_id = $1 AND lesson_order = $2"))
                .bind(course_id)
                .bind(order)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn course_lessons(&mut self, course_id: &str) -> Result<Vec<Lesson>, StoreError> {
        Ok(
            query_as(&format!("{SELECT_LESSON} WHERE course_id = $1 ORDER BY lesson_order"))
                .bind(course_id)
                .fetch_all(&mut *self.tx)
                .await?,
        )
    }

    async fn put_challenge(&mut self, challenge: &Challenge) -> Result<(), StoreError> {
        query(
            r#"
            INSERT INTO challenges (lesson_id, instructions, initial_code, expected_output, hints)
            VALUES ($1,$2,$3,$4,$5)
            ON CONFLICT (lesson_id)
            DO UPDATE SET instructions=EXCLUDED.instructions, initial_code=EXCLUDED.initial_code,
                          expected_output=EXCLUDED.expected_output, hints=EXCLUDED.hints
            "#,
        )
        .bind(&challenge.lesson_id)
        .bind(&challenge.instructions)
        .bind(&challenge.initial_code)
        .bind(&challenge.expected_output)
        .bind(&challenge.hints)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn challenge(&mut self, lesson_id: &str) -> Result<Option<Challenge>, StoreError> {
        Ok(query_as(
            "SELECT lesson_id, instructions, initial_code, expected_output, hints FROM challenges WHERE lesson_id = $1",
        )
        .bind(lesson_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn put_student_challenge(&mut self, sc: &StudentChallenge) -> Result<StudentChallenge, StoreError> {
        Ok(query_as(
            r#"
            INSERT INTO student_challenges
                (id, student_id, lesson_id, instructions, initial_code, expected_output, hints, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (student_id, lesson_id)
            DO UPDATE SET instructions=EXCLUDED.instructions, initial_code=EXCLUDED.initial_code,
                          expected_output=EXCLUDED.expected_output, hints=EXCLUDED.hints, updated_at=now()
            RETURNING id, student_id, lesson_id, instructions, initial_code, expected_output, hints, created_at, updated_at
            "#,
        )
        .bind(sc.id)
        .bind(sc.student_id)
        .bind(&sc.lesson_id)
        .bind(&sc.instructions)
        .bind(&sc.initial_code)
        .bind(&sc.expected_output)
        .bind(&sc.hints)
        .bind(sc.created_at)
        .bind(sc.updated_at)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn student_challenge(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentChallenge>, StoreError> {
        Ok(query_as(&format!(
            "SELECT {STUDENT_CHALLENGE_COLUMNS} FROM student_challenges WHERE student_id = $1 AND lesson_id = $2"
        ))
        .bind(student_id)
        .bind(lesson_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn list_student_challenges(
        &mut self,
        filter: &StudentRecordFilter,
    ) -> Result<Vec<StudentChallenge>, StoreError> {
        Ok(query_as(&format!(
            "SELECT {STUDENT_CHALLENGE_COLUMNS} FROM student_challenges {PAIR_FILTER} ORDER BY created_at"
        ))
        .bind(filter.student_id)
        .bind(&filter.lesson_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn lock_student_course(&mut self, student_id: UserId, course_id: &str) -> Result<(), StoreError> {
        // transaction-scoped; released on commit or rollback
        query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{student_id}:{course_id}"))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<StudentLesson>, StoreError> {
        Ok(query_as(SELECT_STUDENT_LESSON)
            .bind(student_id)
            .bind(lesson_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn get_or_create_student_lesson(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<StudentLesson, StoreError> {
        let fresh = StudentLesson::new(student_id, lesson_id);
        // a concurrent creator makes this a no-op; the select below then sees its row
        query(
            r#"
            INSERT INTO student_lessons (id, student_id, lesson_id, is_unlocked, is_completed, created_at, updated_at)
            VALUES ($1,$2,$3,false,false,$4,$4)
            ON CONFLICT (student_id, lesson_id) DO NOTHING
            "#,
        )
        .bind(fresh.id)
        .bind(student_id)
        .bind(lesson_id)
        .bind(fresh.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(query_as(&format!("{SELECT_STUDENT_LESSON} FOR UPDATE"))
            .bind(student_id)
            .bind(lesson_id)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn save_student_lesson(&mut self, sl: &StudentLesson) -> Result<(), StoreError> {
        query(
            r#"
            UPDATE student_lessons
            SET is_unlocked=$2, is_completed=$3, completed_at=$4, updated_at=now()
            WHERE id=$1
            "#,
        )
        .bind(sl.id)
        .bind(sl.is_unlocked)
        .bind(sl.is_completed)
        .bind(sl.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_student_lessons(&mut self, filter: &StudentRecordFilter) -> Result<Vec<StudentLesson>, StoreError> {
        Ok(query_as(&format!(
            "SELECT {STUDENT_LESSON_COLUMNS} FROM student_lessons {PAIR_FILTER} ORDER BY created_at"
        ))
        .bind(filter.student_id)
        .bind(&filter.lesson_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError> {
        Ok(query_as(SELECT_PROGRESS)
            .bind(student_id)
            .bind(course_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn lock_progress(&mut self, student_id: UserId, course_id: &str) -> Result<Option<Progress>, StoreError> {
        Ok(query_as(&format!("{SELECT_PROGRESS} FOR UPDATE"))
            .bind(student_id)
            .bind(course_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn ensure_progress(&mut self, seed: &Progress) -> Result<Progress, StoreError> {
        query(
            r#"
            INSERT INTO progress
                (id, student_id, course_id, completed_lesson_ids, unlocked_lesson_ids, current_lesson_id, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (student_id, course_id) DO NOTHING
            "#,
        )
        .bind(seed.id)
        .bind(seed.student_id)
        .bind(&seed.course_id)
        .bind(&seed.completed_lesson_ids)
        .bind(&seed.unlocked_lesson_ids)
        .bind(&seed.current_lesson_id)
        .bind(seed.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(query_as(&format!("{SELECT_PROGRESS} FOR UPDATE"))
            .bind(seed.student_id)
            .bind(&seed.course_id)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn save_progress(&mut self, progress: &Progress) -> Result<(), StoreError> {
        query(
            r#"
            UPDATE progress
            SET completed_lesson_ids=$2, unlocked_lesson_ids=$3, current_lesson_id=$4, updated_at=now()
            WHERE id=$1
            "#,
        )
        .bind(progress.id)
        .bind(&progress.completed_lesson_ids)
        .bind(&progress.unlocked_lesson_ids)
        .bind(&progress.current_lesson_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(query_as(&format!("{SELECT_SUBMISSION} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn lock_submission(&mut self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(query_as(&format!("{SELECT_SUBMISSION} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn active_submission(
        &mut self,
        student_id: UserId,
        lesson_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        Ok(query_as(&format!(
            "{SELECT_SUBMISSION} WHERE student_id = $1 AND lesson_id = $2 AND status <> 'rejected' \
             ORDER BY submitted_at DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(student_id)
        .bind(lesson_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_active_submission(&mut self, s: &Submission) -> Result<bool, StoreError> {
        // arbitrated by the partial unique index submissions_one_active
        let res = query(
            r#"
            INSERT INTO submissions
                (id, student_id, lesson_id, code, output, error, passed_auto_check, status, submitted_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$9)
            ON CONFLICT (student_id, lesson_id) WHERE status <> 'rejected' DO NOTHING
            "#,
        )
        .bind(s.id)
        .bind(s.student_id)
        .bind(&s.lesson_id)
        .bind(&s.code)
        .bind(Json(&s.output))
        .bind(&s.error)
        .bind(s.passed_auto_check)
        .bind(s.status)
        .bind(s.submitted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn save_submission(&mut self, s: &Submission) -> Result<(), StoreError> {
        query(
            r#"
            UPDATE submissions
            SET code=$2, output=$3, error=$4, passed_auto_check=$5, status=$6,
                admin_comment=$7, reviewed_by=$8, reviewed_at=$9, updated_at=now()
            WHERE id=$1
            "#,
        )
        .bind(s.id)
        .bind(&s.code)
        .bind(Json(&s.output))
        .bind(&s.error)
        .bind(s.passed_auto_check)
        .bind(s.status)
        .bind(&s.admin_comment)
        .bind(s.reviewed_by)
        .bind(s.reviewed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_submissions(&mut self, filter: &SubmissionFilter) -> Result<Vec<Submission>, StoreError> {
        Ok(query_as(&format!(
            "{SELECT_SUBMISSION} \
             WHERE ($1::uuid IS NULL OR student_id = $1) \
               AND ($2::text IS NULL OR lesson_id = $2) \
               AND ($3::submission_status IS NULL OR status = $3) \
             ORDER BY submitted_at DESC"
        ))
        .bind(filter.student_id)
        .bind(&filter.lesson_id)
        .bind(filter.status)
        .fetch_all(&mut *self.tx)
        .await?)
    }
}
