//! Runs the Postgres store against a real database. Every test returns early
//! when `DATABASE_URL` is not set.

use std::env;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use exam_backend::{
    config::Config,
    database::{pool::create_pool, AttemptRepository, QuestionBank, Store},
    models::exam_attempt::{FinishOutcome, NewAttempt},
    services::grading_service::AnswerKey,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

struct Seeded {
    exam_id: Uuid,
    /// (question id, correct answer id, wrong answer id), 2 and 3 points.
    questions: Vec<(Uuid, Uuid, Uuid)>,
}

async fn setup() -> Option<(PgPool, Store)> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };
    let config = Config {
        database_url: Some(database_url),
        ..Config::default()
    };
    let pool = create_pool(&config).await.expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    Some((pool.clone(), Store::postgres(pool)))
}

async fn seed_exam(pool: &PgPool) -> Seeded {
    let exam_id = Uuid::new_v4();
    sqlx::query("INSERT INTO exams (id, name) VALUES ($1, $2)")
        .bind(exam_id)
        .bind("Store check")
        .execute(pool)
        .await
        .expect("seed exam");

    let mut questions = Vec::new();
    for (position, points) in [2_i64, 3].into_iter().enumerate() {
        let (qid, right, wrong) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        sqlx::query(
            "INSERT INTO questions (id, content, points, difficulty) VALUES ($1, $2, $3, 'MEDIUM'::difficulty)",
        )
        .bind(qid)
        .bind(format!("{} point question", points))
        .bind(Decimal::from(points))
        .execute(pool)
        .await
        .expect("seed question");
        for (i, (aid, correct)) in [(right, true), (wrong, false)].into_iter().enumerate() {
            sqlx::query(
                "INSERT INTO answers (id, question_id, content, is_correct, position) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(aid)
            .bind(qid)
            .bind(if correct { "yes" } else { "no" })
            .bind(correct)
            .bind(i as i32)
            .execute(pool)
            .await
            .expect("seed answer");
        }
        sqlx::query("INSERT INTO exam_questions (exam_id, question_id, position) VALUES ($1, $2, $3)")
            .bind(exam_id)
            .bind(qid)
            .bind(position as i32)
            .execute(pool)
            .await
            .expect("seed exam question");
        questions.push((qid, right, wrong));
    }
    Seeded { exam_id, questions }
}

fn new_attempt(seeded: &Seeded, question_ids: Vec<Uuid>, now: DateTime<Utc>) -> NewAttempt {
    NewAttempt {
        exam_id: seeded.exam_id,
        student_id: Uuid::new_v4(),
        name: Some("Store check".into()),
        course_id: None,
        class_id: None,
        created_by: Uuid::new_v4(),
        question_ids,
        stratified: false,
        duration_minutes: 30,
        show_correct_after: false,
        deadline: now + Duration::days(1),
    }
}

async fn answer_key(store: &Store, snapshot: &[Uuid]) -> AnswerKey {
    let questions = store.questions.questions_by_ids(snapshot).await.expect("questions");
    AnswerKey::new(snapshot, &questions)
}

#[tokio::test]
async fn snapshot_order_and_first_start_survive_round_trip() {
    let Some((pool, store)) = setup().await else { return };
    let seeded = seed_exam(&pool).await;
    let now = Utc::now().trunc_subsecs(0);

    let exam_questions = store.questions.exam_questions(seeded.exam_id).await.unwrap();
    assert_eq!(exam_questions.len(), 2);
    assert_eq!(exam_questions[0].answers.len(), 2);
    assert!(exam_questions[0].answers[0].is_correct);

    let reversed = vec![seeded.questions[1].0, seeded.questions[0].0];
    let created = store
        .attempts
        .create_attempt(new_attempt(&seeded, reversed.clone(), now))
        .await
        .unwrap();
    let found = store.attempts.find_attempt(created.id).await.unwrap().unwrap();
    assert_eq!(found.question_ids, reversed);
    assert!(found.started_at.is_none());

    let started = store.attempts.mark_started(created.id, now).await.unwrap();
    assert_eq!(started.started_at, Some(now));
    let again = store
        .attempts
        .mark_started(created.id, now + Duration::minutes(4))
        .await
        .unwrap();
    assert_eq!(again.started_at, Some(now));
}

#[tokio::test]
async fn second_finish_keeps_the_first_score_and_blocks_saves() {
    let Some((pool, store)) = setup().await else { return };
    let seeded = seed_exam(&pool).await;
    let now = Utc::now().trunc_subsecs(0);
    let snapshot: Vec<Uuid> = seeded.questions.iter().map(|q| q.0).collect();
    let (q1, q1_right, q1_wrong) = seeded.questions[0];
    let (q2, q2_right, _) = seeded.questions[1];

    let attempt = store
        .attempts
        .create_attempt(new_attempt(&seeded, snapshot.clone(), now))
        .await
        .unwrap();
    store.attempts.mark_started(attempt.id, now).await.unwrap();

    assert!(store.attempts.save_answer(attempt.id, q1, q1_wrong, now).await.unwrap());
    assert!(store.attempts.save_answer(attempt.id, q1, q1_right, now).await.unwrap());
    let answers = store.attempts.attempt_answers(attempt.id).await.unwrap();
    assert_eq!(answers.get(&q1), Some(&q1_right));

    let key = answer_key(&store, &snapshot).await;
    let finished_at = now + Duration::minutes(3);
    let first = match store.attempts.finish_attempt(attempt.id, finished_at, &key).await.unwrap() {
        FinishOutcome::Finished(a) => a,
        FinishOutcome::AlreadyFinished(_) => panic!("first finish must score the attempt"),
    };
    assert_eq!(first.score, Some(Decimal::from(2)));
    assert_eq!(first.finished_at, Some(finished_at));

    assert!(!store.attempts.save_answer(attempt.id, q2, q2_right, now).await.unwrap());
    let answers = store.attempts.attempt_answers(attempt.id).await.unwrap();
    assert!(!answers.contains_key(&q2));

    let second = store
        .attempts
        .finish_attempt(attempt.id, now + Duration::minutes(9), &key)
        .await
        .unwrap();
    let second = match second {
        FinishOutcome::AlreadyFinished(a) => a,
        FinishOutcome::Finished(_) => panic!("second finish must not rescore"),
    };
    assert_eq!(second.score, first.score);
    assert_eq!(second.finished_at, first.finished_at);
}

#[tokio::test]
async fn expired_listing_returns_only_spent_unfinished_attempts() {
    let Some((pool, store)) = setup().await else { return };
    let seeded = seed_exam(&pool).await;
    let now = Utc::now().trunc_subsecs(0);
    let snapshot: Vec<Uuid> = seeded.questions.iter().map(|q| q.0).collect();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let attempt = new_attempt(&seeded, snapshot.clone(), now);
        ids.push(store.attempts.create_attempt(attempt).await.unwrap().id);
    }
    let (overdue, on_the_boundary, running, unstarted, finished) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

    store.attempts.mark_started(overdue, now - Duration::minutes(45)).await.unwrap();
    store.attempts.mark_started(on_the_boundary, now - Duration::minutes(30)).await.unwrap();
    store.attempts.mark_started(running, now - Duration::minutes(5)).await.unwrap();
    store.attempts.mark_started(finished, now - Duration::minutes(45)).await.unwrap();
    let key = answer_key(&store, &snapshot).await;
    store
        .attempts
        .finish_attempt(finished, now - Duration::minutes(20), &key)
        .await
        .unwrap();

    let expired: Vec<Uuid> = store
        .attempts
        .list_expired_unfinished(now)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert!(expired.contains(&overdue));
    assert!(expired.contains(&on_the_boundary));
    assert!(!expired.contains(&running));
    assert!(!expired.contains(&unstarted));
    assert!(!expired.contains(&finished));
}
