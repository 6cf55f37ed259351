use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Staff capability: reviewing submissions and managing student progress.
    pub fn can_review(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

/// Caller identity as resolved by the identity collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CourseSummary {
    #[serde(flatten)]
    pub course: Course,
    pub lessons_count: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    #[sqlx(rename = "lesson_order")]
    pub order: i32,
    // static default, only consulted when no per-student state applies
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

impl Lesson {
    pub fn is_first(&self) -> bool {
        self.order == 1
    }
}

/// Canonical challenge template attached to a lesson.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub lesson_id: String,
    pub instructions: String,
    pub initial_code: String,
    pub expected_output: Option<String>,
    pub hints: Vec<String>,
}

/// Per-student replacement of a lesson's canonical challenge.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct StudentChallenge {
    pub id: Uuid,
    pub student_id: UserId,
    pub lesson_id: String,
    pub instructions: String,
    pub initial_code: String,
    pub expected_output: Option<String>,
    pub hints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StudentChallenge> for Challenge {
    fn from(sc: StudentChallenge) -> Self {
        Challenge {
            lesson_id: sc.lesson_id,
            instructions: sc.instructions,
            initial_code: sc.initial_code,
            expected_output: sc.expected_output,
            hints: sc.hints,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct StudentLesson {
    pub id: Uuid,
    pub student_id: UserId,
    pub lesson_id: String,
    pub is_unlocked: bool,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentLesson {
    pub fn new(student_id: UserId, lesson_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id,
            lesson_id: lesson_id.to_string(),
            is_unlocked: false,
            is_completed: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-(student, course) denormalised view of unlocked and completed lessons.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub id: Uuid,
    pub student_id: UserId,
    pub course_id: String,
    pub completed_lesson_ids: Vec<String>,
    pub unlocked_lesson_ids: Vec<String>,
    pub current_lesson_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    /// A fresh row, not yet persisted.
    pub fn new(student_id: UserId, course_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            course_id: course_id.to_string(),
            completed_lesson_ids: Vec::new(),
            unlocked_lesson_ids: Vec::new(),
            current_lesson_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Placeholder returned to readers when no row exists. Carries the nil id.
    pub fn empty(student_id: UserId, course_id: &str) -> Self {
        Self {
            id: Uuid::nil(),
            ..Self::new(student_id, course_id)
        }
    }

    pub fn is_unlocked(&self, lesson_id: &str) -> bool {
        self.unlocked_lesson_ids.iter().any(|id| id == lesson_id)
    }

    pub fn is_completed(&self, lesson_id: &str) -> bool {
        self.completed_lesson_ids.iter().any(|id| id == lesson_id)
    }

    /// Returns true when the set changed.
    pub fn add_unlocked(&mut self, lesson_id: &str) -> bool {
        insert_id(&mut self.unlocked_lesson_ids, lesson_id)
    }

    pub fn remove_unlocked(&mut self, lesson_id: &str) -> bool {
        let before = self.unlocked_lesson_ids.len();
        self.unlocked_lesson_ids.retain(|id| id != lesson_id);
        before != self.unlocked_lesson_ids.len()
    }

    pub fn add_completed(&mut self, lesson_id: &str) -> bool {
        insert_id(&mut self.completed_lesson_ids, lesson_id)
    }
}

fn insert_id(ids: &mut Vec<String>, lesson_id: &str) -> bool {
    if ids.iter().any(|id| id == lesson_id) {
        return false;
    }
    ids.push(lesson_id.to_string());
    true
}

/// Output reported by the code-execution collaborator: either captured lines or one blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExecutionOutput {
    Lines(#[serde(deserialize_with = "printed_lines")] Vec<String>),
    Text(String),
}

/// Lines may arrive as any JSON value (`print(10)` is often reported as a
/// number); each one is kept as its printed text, `null` as an empty line.
fn printed_lines<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<serde_json::Value>::deserialize(de)?;
    Ok(values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

impl Default for ExecutionOutput {
    fn default() -> Self {
        ExecutionOutput::Lines(Vec::new())
    }
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "submission_status", rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn is_active(self) -> bool {
        self != SubmissionStatus::Rejected
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub student_id: UserId,
    pub lesson_id: String,
    pub code: String,
    #[sqlx(json)]
    pub output: ExecutionOutput,
    pub error: Option<String>,
    pub passed_auto_check: bool,
    pub status: SubmissionStatus,
    pub admin_comment: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a passing attempt, written on create and on overwrite.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub student_id: UserId,
    pub lesson_id: String,
    pub code: String,
    pub output: ExecutionOutput,
    pub error: Option<String>,
}

impl Attempt {
    pub fn into_submission(self) -> Submission {
        let now = Utc::now();
        Submission {
            id: Uuid::new_v4(),
            student_id: self.student_id,
            lesson_id: self.lesson_id,
            code: self.code,
            output: self.output,
            error: self.error,
            passed_auto_check: true,
            status: SubmissionStatus::Pending,
            admin_comment: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub student_id: Option<UserId>,
    pub lesson_id: Option<String>,
    pub status: Option<SubmissionStatus>,
}

/// Filter for per-student rows keyed by (student, lesson).
#[derive(Debug, Clone, Default)]
pub struct StudentRecordFilter {
    pub student_id: Option<UserId>,
    pub lesson_id: Option<String>,
}

// --- request / response bodies ---

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CheckCodeReq {
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub output: ExecutionOutput,
    pub error: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckCodeResp {
    pub passed: bool,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<ExecutionOutput>,
    pub error: Option<String>,
    pub submission_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReviewReq {
    pub admin_comment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SetUnlockedReq {
    pub student_id: Option<UserId>,
    pub lesson_id: Option<String>,
    #[serde(default = "default_true")]
    pub unlocked: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CompleteLessonReq {
    pub student_id: Option<UserId>,
    pub lesson_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProgressQuery {
    pub user_id: Option<UserId>,
    pub course_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SubmissionQuery {
    pub student: Option<UserId>,
    pub lesson: Option<String>,
    pub status: Option<String>,
}

/// `?student=&lesson=` on the per-student listings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StudentRecordQuery {
    pub student: Option<UserId>,
    pub lesson: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateCourseReq {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeBody {
    pub instructions: String,
    #[serde(default)]
    pub initial_code: String,
    pub expected_output: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateLessonReq {
    pub id: Option<String>,
    pub course_id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    pub order: Option<i32>,
    #[serde(default)]
    pub is_locked: bool,
    pub challenge: Option<ChallengeBody>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StudentChallengeReq {
    pub student_id: Option<UserId>,
    pub lesson_id: Option<String>,
    #[serde(flatten)]
    pub challenge: ChallengeBody,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LockState {
    pub lesson_id: String,
    pub is_locked: bool,
}

/// A lesson as seen by one requester; `is_locked` is the computed lock state.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LessonView {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub order: i32,
    pub is_locked: bool,
    pub challenge: Option<Challenge>,
}

impl LessonView {
    pub fn new(lesson: Lesson, is_locked: bool, challenge: Option<Challenge>) -> Self {
        Self {
            id: lesson.id,
            course_id: lesson.course_id,
            title: lesson.title,
            description: lesson.description,
            content: lesson.content,
            order: lesson.order,
            is_locked,
            challenge,
        }
    }
}
