//! Concurrency tests against a real Postgres. They run only when
//! `DATABASE_URL` points at a scratch database; each test uses fresh ids so
//! runs do not interfere.

use serde_json::json;
use uuid::Uuid;

use lessonflow::models::*;
use lessonflow::store::StoreError;
use lessonflow::{db, Academy, PgStore, Repo, Store};

struct Fixture {
    academy: Academy<PgStore>,
    store: PgStore,
    pool: db::Db,
    course: String,
}

impl Fixture {
    fn lesson(&self, n: i32) -> String {
        format!("{}-l{n}", self.course)
    }

    async fn user(&self, role: Role) -> Identity {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, username, role) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(format!("user-{id}"))
            .bind(role)
            .execute(&self.pool)
            .await
            .unwrap();
        Identity::new(id, role)
    }
}

async fn fixture() -> Option<Fixture> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping Postgres tests");
        return None;
    };
    let pool = db::connect(&url, 16).await.unwrap();
    let store = PgStore::new(pool.clone());
    let academy = Academy::new(store.clone());
    let course = format!("c{}", Uuid::new_v4().simple());

    academy
        .create_course(CreateCourseReq {
            id: Some(course.clone()),
            title: Some("Concurrency".into()),
            description: String::new(),
        })
        .await
        .unwrap();
    let fx = Fixture { academy, store, pool, course };
    for (order, expected) in [(1, None), (2, Some("10")), (3, None), (4, None)] {
        fx.academy
            .create_lesson(CreateLessonReq {
                id: Some(fx.lesson(order)),
                course_id: Some(fx.course.clone()),
                title: Some(format!("Lesson {order}")),
                description: String::new(),
                content: String::new(),
                order: Some(order),
                is_locked: order > 1,
                challenge: Some(ChallengeBody {
                    instructions: "print it".into(),
                    initial_code: String::new(),
                    expected_output: expected.map(str::to_string),
                    hints: Vec::new(),
                }),
            })
            .await
            .unwrap();
    }
    Some(fx)
}

fn attempt(lesson: String, output: &str) -> CheckCodeReq {
    serde_json::from_value(json!({"lesson_id": lesson, "code": "print(x)", "output": [output]})).unwrap()
}

/// Flags and id sets must agree for every lesson the student has a row for.
async fn assert_consistent(fx: &Fixture, student: UserId) {
    let mut tx = fx.store.begin().await.unwrap();
    let filter = StudentRecordFilter { student_id: Some(student), lesson_id: None };
    let rows = tx.list_student_lessons(&filter).await.unwrap();
    let progress = tx.progress(student, &fx.course).await.unwrap();
    for sl in rows {
        let in_set = progress
            .as_ref()
            .is_some_and(|p| p.unlocked_lesson_ids.contains(&sl.lesson_id));
        assert_eq!(sl.is_unlocked, in_set, "flag and set disagree for {}", sl.lesson_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_yields_one_student_lesson() {
    let Some(fx) = fixture().await else { return };
    let student = fx.user(Role::Student).await;
    let lesson = fx.lesson(2);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = fx.store.clone();
            let lesson = lesson.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await?;
                let sl = tx.get_or_create_student_lesson(student.user_id, &lesson).await?;
                tx.commit().await?;
                Ok::<_, StoreError>(sl.id)
            })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM student_lessons WHERE student_id = $1")
        .bind(student.user_id)
        .fetch_one(&fx.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_passing_attempts_share_one_submission() {
    let Some(fx) = fixture().await else { return };
    let student = fx.user(Role::Student).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let academy = fx.academy.clone();
            let req = attempt(fx.lesson(2), "10");
            tokio::spawn(async move { academy.submit_result(&student, req).await })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        let resp = task.await.unwrap().unwrap();
        assert!(resp.passed);
        ids.push(resp.submission_id.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM submissions WHERE student_id = $1")
        .bind(student.user_id)
        .fetch_one(&fx.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_in_one_course_do_not_deadlock() {
    let Some(fx) = fixture().await else { return };
    let teacher = fx.user(Role::Teacher).await;

    for _ in 0..10 {
        let student = fx.user(Role::Student).await;
        let mut subs = Vec::new();
        for (n, output) in [(2, "10"), (3, "anything")] {
            let resp = fx.academy.submit_result(&student, attempt(fx.lesson(n), output)).await.unwrap();
            subs.push(resp.submission_id.unwrap());
        }

        let tasks: Vec<_> = subs
            .into_iter()
            .map(|id| {
                let academy = fx.academy.clone();
                tokio::spawn(async move { academy.approve_submission(id, &teacher, None).await })
            })
            .collect();
        for task in tasks {
            let sub = task.await.unwrap().unwrap();
            assert_eq!(sub.status, SubmissionStatus::Approved);
        }

        assert_consistent(&fx, student.user_id).await;
        let progress = fx
            .academy
            .get_or_init_progress(Some(student.user_id), Some(fx.course.clone()))
            .await
            .unwrap();
        for n in [2, 3] {
            assert!(progress.completed_lesson_ids.contains(&fx.lesson(n)));
        }
        for n in [3, 4] {
            assert!(progress.unlocked_lesson_ids.contains(&fx.lesson(n)));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unlocks_racing_lock_checks_keep_flags_and_sets_in_step() {
    let Some(fx) = fixture().await else { return };
    let student = fx.user(Role::Student).await;
    let lesson = fx.lesson(3);

    let mut tasks = Vec::new();
    for i in 0..12 {
        let academy = fx.academy.clone();
        let lesson = lesson.clone();
        tasks.push(tokio::spawn(async move {
            if i % 3 == 0 {
                academy.lesson_lock_state(&lesson, Some(&student)).await.map(|_| ())
            } else {
                academy
                    .set_lesson_unlocked(SetUnlockedReq {
                        student_id: Some(student.user_id),
                        lesson_id: Some(lesson),
                        unlocked: i % 2 == 0,
                    })
                    .await
                    .map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_consistent(&fx, student.user_id).await;
}
