use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use exam_backend::{
    config::Config,
    database::{memory::MemoryStore, Store},
    middleware::auth::issue_token,
    models::{
        exam::Exam,
        question::{Answer, Difficulty, Question},
        user::{Identity, Role},
    },
    routes::create_router,
    AppState,
};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test_secret_key";

struct TestApp {
    router: Router,
    memory: MemoryStore,
}

impl TestApp {
    fn new() -> Self {
        let memory = MemoryStore::new();
        let config = Config {
            jwt_secret: SECRET.to_string(),
            ..Config::default()
        };
        let state = AppState::with_seed(Store::memory(memory.clone()), &config, 42);
        Self {
            router: create_router(state),
            memory,
        }
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        who: Option<&Identity>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(identity) = who {
            let token = issue_token(identity, SECRET, 3600).expect("sign token");
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

fn question(difficulty: Difficulty, points: i64) -> Question {
    let id = Uuid::new_v4();
    Question {
        id,
        content: format!("{:?} question worth {}", difficulty, points),
        points: Decimal::from(points),
        difficulty,
        answers: vec![
            Answer { id: Uuid::new_v4(), question_id: id, content: "right".into(), is_correct: true },
            Answer { id: Uuid::new_v4(), question_id: id, content: "wrong".into(), is_correct: false },
        ],
    }
}

fn seed_exam(memory: &MemoryStore) -> (Uuid, Vec<Question>) {
    let questions = vec![
        question(Difficulty::Easy, 1),
        question(Difficulty::Easy, 1),
        question(Difficulty::Medium, 2),
        question(Difficulty::Hard, 3),
    ];
    for q in &questions {
        memory.insert_question(q.clone()).unwrap();
    }
    let exam_id = Uuid::new_v4();
    memory
        .insert_exam(
            Exam { id: exam_id, name: "Algebra final".into(), created_at: Some(Utc::now()) },
            questions.iter().map(|q| q.id).collect(),
        )
        .unwrap();
    (exam_id, questions)
}

fn seed_class(memory: &MemoryStore, department: Option<Uuid>, size: usize) -> (Uuid, Vec<Identity>) {
    let class_id = Uuid::new_v4();
    memory.insert_class(department, class_id).unwrap();
    let students = (0..size)
        .map(|_| {
            let id = Uuid::new_v4();
            memory.insert_student(id, Some(class_id)).unwrap();
            Identity::new(id, Role::Student)
        })
        .collect();
    (class_id, students)
}

fn assign_body(target: JsonValue, difficulty: JsonValue) -> JsonValue {
    json!({
        "target": target,
        "name": "Algebra final",
        "deadline": (Utc::now() + Duration::days(3)).to_rfc3339(),
        "duration_minutes": 30,
        "show_correct_answers": true,
        "difficulty": difficulty,
    })
}

fn uuid_of(v: &JsonValue) -> Uuid {
    Uuid::parse_str(v.as_str().expect("uuid string")).expect("valid uuid")
}

fn decimal_of(v: &JsonValue) -> Decimal {
    match v {
        JsonValue::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

#[tokio::test]
async fn exam_flow_end_to_end() {
    let app = TestApp::new();
    let (exam_id, questions) = seed_exam(&app.memory);
    let (class_id, students) = seed_class(&app.memory, None, 2);
    let teacher = Identity::new(Uuid::new_v4(), Role::Teacher);
    let alice = students[0];
    let bob = students[1];

    let (status, summary) = app
        .call(
            "POST",
            &format!("/api/exams/{}/assign", exam_id),
            Some(&teacher),
            Some(assign_body(
                json!({"type": "class", "class_id": class_id}),
                json!({"easy": 1, "medium": 1, "hard": 0}),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", summary);
    assert_eq!(summary["created"], 2);
    assert_eq!(summary["stratified"], true);
    let drawn: Vec<Uuid> = summary["question_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(uuid_of)
        .collect();
    assert_eq!(drawn.len(), 2);
    let drawn_tiers: Vec<Difficulty> = drawn
        .iter()
        .map(|id| questions.iter().find(|q| q.id == *id).unwrap().difficulty)
        .collect();
    assert_eq!(drawn_tiers, vec![Difficulty::Easy, Difficulty::Medium]);

    let (status, mine) = app.call("GET", "/api/me/attempts", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 1);
    assert_eq!(mine["attempts"][0]["state"], "not_started");
    assert!(mine["attempts"][0]["score"].is_null());
    let alice_attempt = uuid_of(&mine["attempts"][0]["attempt_id"]);

    let (_, theirs) = app.call("GET", "/api/me/attempts", Some(&bob), None).await;
    let bob_attempt = uuid_of(&theirs["attempts"][0]["attempt_id"]);

    let (status, view) = app
        .call("GET", &format!("/api/attempts/{}", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", view);
    assert_eq!(view["state"], "in_progress");
    let remaining = view["remaining_seconds"].as_i64().unwrap();
    assert!(remaining > 30 * 60 - 10 && remaining <= 30 * 60);
    let shown: Vec<Uuid> = view["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| uuid_of(&q["id"]))
        .collect();
    assert_eq!(shown, drawn);
    assert!(view["questions"][0]["answers"][0].get("is_correct").is_none());

    let (status, err) = app
        .call("GET", &format!("/api/attempts/{}", alice_attempt), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "forbidden");

    let easy = questions.iter().find(|q| q.id == drawn[0]).unwrap();
    let medium = questions.iter().find(|q| q.id == drawn[1]).unwrap();
    for (q, answer) in [(easy, easy.answers[1].id), (easy, easy.answers[0].id), (medium, medium.answers[1].id)] {
        let (status, saved) = app
            .call(
                "PUT",
                &format!("/api/attempts/{}/answers", alice_attempt),
                Some(&alice),
                Some(json!({"question_id": q.id, "answer_id": answer})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", saved);
        assert_eq!(saved["saved"], true);
    }

    let (status, poll) = app
        .call("GET", &format!("/api/attempts/{}/status", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["questions_answered"], 2);
    assert_eq!(poll["total_questions"], 2);

    let (status, err) = app
        .call("GET", &format!("/api/attempts/{}/result", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", err);

    let (status, first) = app
        .call("POST", &format!("/api/attempts/{}/finish", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(decimal_of(&first["score"]), Decimal::ONE);
    assert_eq!(decimal_of(&first["total_possible"]), Decimal::from(3));
    assert_eq!(first["already_finished"], false);

    let (status, second) = app
        .call("POST", &format!("/api/attempts/{}/finish", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["already_finished"], true);
    assert_eq!(decimal_of(&second["score"]), Decimal::ONE);
    assert_eq!(second["finished_at"], first["finished_at"]);

    let (status, err) = app
        .call("GET", &format!("/api/attempts/{}", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "forbidden");

    let (status, err) = app
        .call(
            "PUT",
            &format!("/api/attempts/{}/answers", alice_attempt),
            Some(&alice),
            Some(json!({"question_id": medium.id, "answer_id": medium.answers[0].id})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", err);

    let (status, result) = app
        .call("GET", &format!("/api/attempts/{}/result", alice_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", result);
    assert_eq!(decimal_of(&result["score"]), Decimal::ONE);
    assert_eq!(result["correct_answers_revealed"], true);
    assert_eq!(result["questions"][0]["is_correct"], true);
    assert_eq!(result["questions"][1]["is_correct"], false);

    let (status, listing) = app
        .call("GET", &format!("/api/exams/{}/attempts", exam_id), Some(&teacher), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 2);

    let (status, _) = app
        .call("DELETE", &format!("/api/attempts/{}", bob_attempt), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call("DELETE", &format!("/api/attempts/{}", bob_attempt), Some(&teacher), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call("DELETE", &format!("/api/attempts/{}", alice_attempt), Some(&teacher), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listing) = app
        .call("GET", &format!("/api/exams/{}/attempts", exam_id), Some(&teacher), None)
        .await;
    assert_eq!(listing["total"], 1);
}

#[tokio::test]
async fn department_assignment_fans_out_over_classes() {
    let app = TestApp::new();
    let (exam_id, _) = seed_exam(&app.memory);
    let department_id = Uuid::new_v4();
    for size in [3, 0, 5] {
        seed_class(&app.memory, Some(department_id), size);
    }
    let admin = Identity::new(Uuid::new_v4(), Role::Admin);

    let (status, summary) = app
        .call(
            "POST",
            &format!("/api/exams/{}/assign", exam_id),
            Some(&admin),
            Some(assign_body(
                json!({"type": "department", "department_id": department_id}),
                json!({}),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", summary);
    assert_eq!(summary["created"], 8);
    assert_eq!(summary["stratified"], false);
    assert_eq!(summary["question_ids"].as_array().unwrap().len(), 4);
    assert!(summary["failed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn assignment_rejections() {
    let app = TestApp::new();
    let (exam_id, _) = seed_exam(&app.memory);
    let (class_id, students) = seed_class(&app.memory, None, 1);
    let teacher = Identity::new(Uuid::new_v4(), Role::Teacher);
    let uri = format!("/api/exams/{}/assign", exam_id);

    let (status, err) = app
        .call(
            "POST",
            &uri,
            Some(&teacher),
            Some(assign_body(json!({"type": "students", "student_ids": []}), json!({}))),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");

    let (status, err) = app
        .call(
            "POST",
            &uri,
            Some(&students[0]),
            Some(assign_body(json!({"type": "class", "class_id": class_id}), json!({}))),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "forbidden");

    let mut missing_name = assign_body(json!({"type": "class", "class_id": class_id}), json!({}));
    missing_name.as_object_mut().unwrap().remove("name");
    let (status, err) = app.call("POST", &uri, Some(&teacher), Some(missing_name)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");

    let (status, err) = app
        .call(
            "POST",
            &format!("/api/exams/{}/assign", Uuid::new_v4()),
            Some(&teacher),
            Some(assign_body(json!({"type": "class", "class_id": class_id}), json!({}))),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found");

    let (_, listing) = app
        .call("GET", &format!("/api/exams/{}/attempts", exam_id), Some(&teacher), None)
        .await;
    assert_eq!(listing["total"], 0);
}

#[tokio::test]
async fn malformed_bodies_and_paths_get_structured_errors() {
    let app = TestApp::new();
    let (exam_id, _) = seed_exam(&app.memory);
    let teacher = Identity::new(Uuid::new_v4(), Role::Teacher);
    let student = Identity::new(Uuid::new_v4(), Role::Student);

    let (status, err) = app
        .call(
            "POST",
            &format!("/api/exams/{}/assign", exam_id),
            Some(&teacher),
            Some(json!({"target": {"type": "students"}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");
    assert!(err["message"].as_str().unwrap().contains("student_ids"));

    let (status, err) = app.call("GET", "/api/attempts/not-a-uuid", Some(&student), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");

    let (status, err) = app
        .call(
            "PUT",
            &format!("/api/attempts/{}/answers", Uuid::new_v4()),
            Some(&student),
            Some(json!({"question_id": Uuid::new_v4(), "answer_id": "nope"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/exams/{}/assign", exam_id))
        .header(
            "authorization",
            format!("Bearer {}", issue_token(&teacher, SECRET, 3600).unwrap()),
        )
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let err: JsonValue = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["error"], "validation_error");
}

#[tokio::test]
async fn difficulty_mix_with_no_matching_questions_uses_the_whole_exam() {
    let app = TestApp::new();
    let easy = vec![question(Difficulty::Easy, 1), question(Difficulty::Easy, 1)];
    for q in &easy {
        app.memory.insert_question(q.clone()).unwrap();
    }
    let exam_id = Uuid::new_v4();
    app.memory
        .insert_exam(
            Exam { id: exam_id, name: "Warm-up".into(), created_at: Some(Utc::now()) },
            easy.iter().map(|q| q.id).collect(),
        )
        .unwrap();
    let (class_id, students) = seed_class(&app.memory, None, 1);
    let teacher = Identity::new(Uuid::new_v4(), Role::Teacher);

    let (status, summary) = app
        .call(
            "POST",
            &format!("/api/exams/{}/assign", exam_id),
            Some(&teacher),
            Some(assign_body(
                json!({"type": "class", "class_id": class_id}),
                json!({"easy": 0, "medium": 0, "hard": 2}),
            )),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["stratified"], false);
    let drawn: Vec<Uuid> = summary["question_ids"].as_array().unwrap().iter().map(uuid_of).collect();
    assert_eq!(drawn, easy.iter().map(|q| q.id).collect::<Vec<_>>());

    let attempt_id = uuid_of(&summary["attempt_ids"][0]);
    let (status, view) = app
        .call("GET", &format!("/api/attempts/{}", attempt_id), Some(&students[0]), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["questions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn requests_without_valid_token_are_unauthorized() {
    let app = TestApp::new();

    let (status, err) = app.call("GET", "/api/me/attempts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "unauthorized");

    let req = Request::builder()
        .uri("/api/me/attempts")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, doc) = app.call("GET", "/api/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"].get("/api/attempts/{id}/finish").is_some());
    let assign = &doc["paths"]["/api/exams/{exam_id}/assign"]["post"];
    assert!(assign["responses"].get("201").is_some());
}
