use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use lessonflow::models::{Identity, Role};
use lessonflow::{routes, Academy, MemoryStore};

struct App {
    router: Router,
    student: Identity,
    student_token: String,
    teacher_token: String,
}

async fn app() -> App {
    let store = MemoryStore::new();
    let student = Identity::new(Uuid::new_v4(), Role::Student);
    let student_token = store.issue_token(student).await;
    let teacher_token = store
        .issue_token(Identity::new(Uuid::new_v4(), Role::Teacher))
        .await;
    let app = App {
        router: routes::router(Academy::new(store)),
        student,
        student_token,
        teacher_token,
    };

    let (status, _) = app
        .call(Method::POST, "/api/courses", Some(app.teacher_token.as_str()), Some(json!({"id": "lua", "title": "Lua"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    for (order, expected) in [(1, Value::Null), (2, json!("10")), (3, Value::Null)] {
        let body = json!({
            "id": format!("l{order}"),
            "course_id": "lua",
            "title": format!("Lesson {order}"),
            "order": order,
            "is_locked": order > 1,
            "challenge": {"instructions": "print it", "expected_output": expected},
        });
        let (status, _) = app
            .call(Method::POST, "/api/lessons", Some(app.teacher_token.as_str()), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    app
}

impl App {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn check_code_requires_a_token() {
    let app = app().await;
    let (status, body) = app
        .call(Method::POST, "/api/check-code", None, Some(json!({"lesson_id": "l2", "output": ["10"]})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call(Method::POST, "/api/check-code", Some("bogus"), Some(json!({"lesson_id": "l2"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn check_code_reports_verdicts() {
    let app = app().await;
    let token = Some(app.student_token.as_str());

    let (status, body) = app
        .call(Method::POST, "/api/check-code", token, Some(json!({"lesson_id": "l2", "code": "print(10)", "output": ["10"]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["passed"], json!(true));
    assert_eq!(body["expected"], json!("10"));
    assert!(body["submission_id"].is_string());

    let (_, body) = app
        .call(Method::POST, "/api/check-code", token, Some(json!({"lesson_id": "l2", "output": ["8"]})))
        .await;
    assert_eq!(body["passed"], json!(false));
    assert_eq!(body["actual"], json!(["8"]));
    assert!(body.get("submission_id").is_none());

    let (_, body) = app
        .call(Method::POST, "/api/check-code", token, Some(json!({"lesson_id": "l2", "output": "10", "error": "boom"})))
        .await;
    assert_eq!(body["passed"], json!(false));
    assert_eq!(body["error"], json!("boom"));

    let (status, body) = app
        .call(Method::POST, "/api/check-code", token, Some(json!({"output": ["10"]})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("lesson_id is required"));

    let (status, _) = app
        .call(Method::POST, "/api/check-code", token, Some(json!({"lesson_id": "nope"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn approve_unlocks_next_lesson_for_the_student() {
    let app = app().await;
    let student = Some(app.student_token.as_str());
    let teacher = Some(app.teacher_token.as_str());

    let (_, body) = app.call(Method::GET, "/api/lessons/l3/lock", student, None).await;
    assert_eq!(body, json!({"lesson_id": "l3", "is_locked": true}));

    let (_, body) = app
        .call(Method::POST, "/api/check-code", student, Some(json!({"lesson_id": "l2", "output": ["10"]})))
        .await;
    let id = body["submission_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(Method::POST, &format!("/api/submissions/{id}/approve"), student, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::POST, &format!("/api/submissions/{id}/approve"), teacher, Some(json!({"admin_comment": "good"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("approved"));
    assert_eq!(body["admin_comment"], json!("good"));

    let (_, body) = app.call(Method::GET, "/api/lessons/l3/lock", student, None).await;
    assert_eq!(body["is_locked"], json!(false));

    let uri = format!("/api/progress?course_id=lua&user_id={}", app.student.user_id);
    let (status, body) = app.call(Method::GET, &uri, student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completed_lesson_ids"], json!(["l2"]));
    assert_eq!(body["current_lesson_id"], json!("l2"));
}

#[tokio::test]
async fn anonymous_lock_state_uses_static_flag() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/api/lessons/l1/lock", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_locked"], json!(false));
    let (_, body) = app.call(Method::GET, "/api/lessons/l2/lock", None, None).await;
    assert_eq!(body["is_locked"], json!(true));
}

#[tokio::test]
async fn staff_endpoints_refuse_students() {
    let app = app().await;
    let req = json!({"student_id": app.student.user_id, "lesson_id": "l3"});

    let (status, _) = app
        .call(Method::POST, "/api/student-lessons/unlock", Some(app.student_token.as_str()), Some(req.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::POST, "/api/student-lessons/unlock", Some(app.teacher_token.as_str()), Some(req))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_unlocked"], json!(true));

    let (_, body) = app
        .call(Method::GET, "/api/lessons/l3/lock", Some(app.student_token.as_str()), None)
        .await;
    assert_eq!(body["is_locked"], json!(false));
}

#[tokio::test]
async fn students_cannot_read_other_progress() {
    let app = app().await;
    let uri = format!("/api/progress?course_id=lua&user_id={}", Uuid::new_v4());
    let (status, _) = app.call(Method::GET, &uri, Some(app.student_token.as_str()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::GET, "/api/progress?course_id=lua", Some(app.student_token.as_str()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unlocked_lesson_ids"], json!([]));
}

#[tokio::test]
async fn course_lessons_are_listed_in_order() {
    let app = app().await;
    let (status, body) = app
        .call(Method::GET, "/api/courses/lua/lessons", Some(app.student_token.as_str()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body.as_array().unwrap().iter().map(|l| l["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["l1", "l2", "l3"]);

    let (status, _) = app.call(Method::GET, "/api/courses/nope/lessons", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.call(Method::GET, "/api/courses", None, None).await;
    assert_eq!(body[0]["lessons_count"], json!(3));
}

#[tokio::test]
async fn invalid_status_filter_is_bad_request() {
    let app = app().await;
    let (status, _) = app
        .call(Method::GET, "/api/submissions?status=archived", Some(app.teacher_token.as_str()), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn numeric_output_lines_are_compared_as_printed() {
    let app = app().await;
    let (status, body) = app
        .call(Method::POST, "/api/check-code", Some(app.student_token.as_str()), Some(json!({"lesson_id": "l2", "output": [10]})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["passed"], json!(true));
    assert_eq!(body["actual"], json!(["10"]));
}

#[tokio::test]
async fn malformed_requests_get_json_validation_errors() {
    let app = app().await;
    let teacher = Some(app.teacher_token.as_str());

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/student-challenges",
            teacher,
            Some(json!({"student_id": app.student.user_id, "lesson_id": "l2"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("instructions"));

    let (status, body) = app.call(Method::GET, "/api/submissions/not-a-uuid", teacher, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = app
        .call(Method::GET, "/api/student-lessons?student=nope", teacher, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn per_student_rows_are_listed_with_filters() {
    let app = app().await;
    let teacher = Some(app.teacher_token.as_str());
    let student = Some(app.student_token.as_str());

    let (status, _) = app
        .call(
            Method::POST,
            "/api/student-lessons/unlock",
            teacher,
            Some(json!({"student_id": app.student.user_id, "lesson_id": "l3"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/student-challenges",
            teacher,
            Some(json!({"student_id": app.student.user_id, "lesson_id": "l2", "instructions": "print 7", "expected_output": "7"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/student-lessons?student={}&lesson=l3", app.student.user_id);
    let (status, body) = app.call(Method::GET, &uri, teacher, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["is_unlocked"], json!(true));

    let (_, body) = app.call(Method::GET, "/api/student-lessons?lesson=l1", teacher, None).await;
    assert_eq!(body, json!([]));

    let uri = format!("/api/student-lessons?student={}", Uuid::new_v4());
    let (_, body) = app.call(Method::GET, &uri, student, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = app.call(Method::GET, "/api/student-challenges", student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["expected_output"], json!("7"));

    let (status, _) = app.call(Method::GET, "/api/student-lessons", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
