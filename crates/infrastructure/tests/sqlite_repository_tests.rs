use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use tiering_core::config::LocalStoreConfig;
use tiering_domain::entities::{
    FailureTransition, GenerationTaskStatus, NewGenerationTask, NewOutboxEntry, OutboxStatus,
};
use tiering_domain::repositories::{
    GenerationTaskRepository, OutboxRepository, SettingsStore, UnitOfWork,
};
use tiering_infrastructure::LocalDatabase;

fn outbox_entry(entity_id: &str) -> NewOutboxEntry {
    NewOutboxEntry {
        event_type: "projects.updated".to_string(),
        entity_type: "projects".to_string(),
        entity_id: Some(entity_id.to_string()),
        payload: json!({ "id": entity_id, "name": "Demo" }),
    }
}

#[tokio::test]
async fn settings_store_upserts_values() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let store = db.settings_store();

    assert_eq!(store.get("deployment_mode").await.unwrap(), None);
    store.set("deployment_mode", "local_external").await.unwrap();
    store.set("deployment_mode", "local_object").await.unwrap();
    assert_eq!(
        store.get("deployment_mode").await.unwrap().as_deref(),
        Some("local_object")
    );
    assert!(store.health_check().await.unwrap());
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = LocalDatabase::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db.migrate().await.unwrap();
    db.health_check().await.unwrap();
}

#[tokio::test]
async fn outbox_pending_rows_come_back_in_enqueue_order() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.outbox_repository();

    let first = repo.insert(&outbox_entry("p-1")).await.unwrap();
    let second = repo.insert(&outbox_entry("p-2")).await.unwrap();
    let third = repo.insert(&outbox_entry("p-1")).await.unwrap();

    let pending = repo.fetch_pending(10).await.unwrap();
    let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second, third]);
    assert_eq!(pending[0].payload["name"], "Demo");
    assert_eq!(pending[0].status, OutboxStatus::Pending);
}

#[tokio::test]
async fn outbox_pending_rows_page_by_id_cursor() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.outbox_repository();

    let first = repo.insert(&outbox_entry("p-1")).await.unwrap();
    let second = repo.insert(&outbox_entry("p-2")).await.unwrap();
    let third = repo.insert(&outbox_entry("p-3")).await.unwrap();
    repo.mark_sent(second).await.unwrap();

    let page: Vec<i64> = repo
        .fetch_pending_after(first, 10)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(page, vec![third]);
    assert!(repo.fetch_pending_after(third, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn outbox_failures_exhaust_into_failed_status() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.outbox_repository();
    let id = repo.insert(&outbox_entry("p-1")).await.unwrap();

    assert_eq!(
        repo.mark_failed(id, "timeout", 2).await.unwrap(),
        OutboxStatus::Pending
    );
    assert_eq!(
        repo.mark_failed(id, "timeout", 2).await.unwrap(),
        OutboxStatus::Failed
    );
    assert!(repo.fetch_pending(10).await.unwrap().is_empty());

    let entry = repo.get(id).await.unwrap().unwrap();
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.last_error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn sent_rows_are_purged_after_retention() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.outbox_repository();
    let id = repo.insert(&outbox_entry("p-1")).await.unwrap();
    repo.insert(&outbox_entry("p-2")).await.unwrap();
    repo.mark_sent(id).await.unwrap();

    assert_eq!(
        repo.purge_sent(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        repo.purge_sent(Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap(),
        1
    );

    let counts = repo.count_by_status().await.unwrap();
    assert_eq!(counts.get(&OutboxStatus::Pending), Some(&1));
    assert_eq!(counts.get(&OutboxStatus::Sent), None);
}

#[tokio::test]
async fn unit_of_work_commit_and_rollback() {
    let db = LocalDatabase::in_memory().await.unwrap();

    sqlx::query("CREATE TABLE projects (id TEXT PRIMARY KEY, name TEXT NOT NULL)")
        .execute(db.pool())
        .await
        .unwrap();

    let mut uow = db.begin().await.unwrap();
    sqlx::query("INSERT INTO projects (id, name) VALUES ('p-1', 'Kept')")
        .execute(uow.connection())
        .await
        .unwrap();
    uow.stage_outbox(&outbox_entry("p-1")).await.unwrap();
    Box::new(uow).commit().await.unwrap();

    let mut uow = db.begin().await.unwrap();
    sqlx::query("INSERT INTO projects (id, name) VALUES ('p-2', 'Dropped')")
        .execute(uow.connection())
        .await
        .unwrap();
    uow.stage_outbox(&outbox_entry("p-2")).await.unwrap();
    Box::new(uow).rollback().await.unwrap();

    let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(projects, 1);

    let pending = db.outbox_repository().fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id.as_deref(), Some("p-1"));
}

#[tokio::test]
async fn claim_only_succeeds_once() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.generation_task_repository();
    let now = Utc::now();
    let id = repo
        .insert(&NewGenerationTask::new("image", json!({"prompt": "cat"})), now)
        .await
        .unwrap();

    assert!(repo.claim(id, now).await.unwrap());
    assert!(!repo.claim(id, now).await.unwrap());
    assert_eq!(
        repo.get(id).await.unwrap().unwrap().status,
        GenerationTaskStatus::Claimed
    );
}

#[tokio::test]
async fn concurrent_claims_on_a_file_database_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let config = LocalStoreConfig {
        url: format!("sqlite://{}", dir.path().join("tasks.db").display()),
        max_connections: 4,
        ..Default::default()
    };
    let db = LocalDatabase::connect(&config).await.unwrap();
    let repo = db.generation_task_repository();
    let now = Utc::now();
    let id = repo
        .insert(&NewGenerationTask::new("image", json!({})), now)
        .await
        .unwrap();

    let (a, b) = tokio::join!(repo.claim(id, now), repo.claim(id, now));
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|won| **won).count();
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn failed_task_waits_for_eligibility_then_dead_letters() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.generation_task_repository();
    let now = Utc::now();
    let id = repo
        .insert(&NewGenerationTask::new("image", json!({})).owned_by("project-9"), now)
        .await
        .unwrap();

    assert!(repo.claim(id, now).await.unwrap());
    assert!(repo.mark_running(id).await.unwrap());
    let retry_at = now + ChronoDuration::seconds(30);
    assert!(repo
        .record_failure(
            id,
            "model overloaded",
            FailureTransition::Retry {
                attempts: 1,
                next_eligible_at: retry_at,
            },
        )
        .await
        .unwrap());

    assert!(repo.fetch_eligible(now, 10).await.unwrap().is_empty());
    assert!(!repo.claim(id, now).await.unwrap());

    let later = retry_at + ChronoDuration::seconds(1);
    let eligible = repo.fetch_eligible(later, 10).await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].status, GenerationTaskStatus::Failed);
    assert_eq!(eligible[0].owner_id.as_deref(), Some("project-9"));

    assert!(repo.claim(id, later).await.unwrap());
    assert!(repo
        .record_failure(id, "still broken", FailureTransition::DeadLetter { attempts: 2 })
        .await
        .unwrap());

    let task = repo.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, GenerationTaskStatus::DeadLetter);
    assert_eq!(task.attempts, 2);
    let far_future = later + ChronoDuration::days(365);
    assert!(repo.fetch_eligible(far_future, 10).await.unwrap().is_empty());
    assert!(!repo.claim(id, far_future).await.unwrap());
}

#[tokio::test]
async fn success_stores_result() {
    let db = LocalDatabase::in_memory().await.unwrap();
    let repo = db.generation_task_repository();
    let now = Utc::now();
    let id = repo
        .insert(&NewGenerationTask::new("image", json!({})), now)
        .await
        .unwrap();
    repo.claim(id, now).await.unwrap();
    repo.mark_running(id).await.unwrap();
    assert!(repo
        .mark_succeeded(id, Some(&json!({"url": "s3://assets/cat.png"})))
        .await
        .unwrap());

    let task = repo.get(id).await.unwrap().unwrap();
    assert_eq!(task.status, GenerationTaskStatus::Succeeded);
    assert_eq!(task.result.unwrap()["url"], "s3://assets/cat.png");

    let counts = repo.count_by_status().await.unwrap();
    assert_eq!(counts.get(&GenerationTaskStatus::Succeeded), Some(&1));
}
