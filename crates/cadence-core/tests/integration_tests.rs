use std::sync::Arc;

use cadence_core::db::establish_connection;
use cadence_core::error::CoreError;
use cadence_core::models::{
    ExceptionType, Item, NewExceptionData, NewItemData, NewJobSpec, NewListData, NewTemplateData,
    Priority, RecurrencePattern, RetryConfig, UpdateItemData, UpdateItemParams,
};
use cadence_core::query::ItemsFilter;
use cadence_core::repository::{
    CompositeRepository, ExceptionRepository, ItemRepository, JobCoordinator, ListRepository,
    SqliteRepository, TemplateRepository,
};
use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

async fn setup_test_db() -> (SqliteRepository, TempDir) {
    let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("failed to establish test database connection");
    (SqliteRepository::new(pool), temp_dir)
}

async fn create_daily_template(repo: &SqliteRepository) -> (Uuid, Uuid) {
    let list = repo
        .create_list(NewListData {
            title: "chores".to_string(),
        })
        .await
        .unwrap();

    let template = repo
        .create_template_with_initial_generation(
            Uuid::now_v7(),
            NewTemplateData {
                list_id: list.id,
                title: "Water plants".to_string(),
                recurrence_pattern: RecurrencePattern::Daily,
                recurrence_config: serde_json::json!({"interval": 1}),
                due_offset_secs: None,
                timezone: None,
                sync_horizon_days: 5,
                generation_horizon_days: 30,
            },
            Vec::new(),
            Utc::now(),
            None,
        )
        .await
        .unwrap();

    (list.id, template.id)
}

/// S1 — exactly one of several concurrent claimers succeeds against a
/// single pending job.
#[tokio::test]
async fn claim_exclusivity_under_concurrent_workers() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;

    let job = repo
        .insert_job(NewJobSpec {
            template_id,
            generate_from: Utc::now(),
            generate_until: Utc::now() + Duration::days(5),
            scheduled_for: Utc::now(),
        })
        .await
        .unwrap();

    let repo = Arc::new(repo);
    let mut handles = Vec::new();
    for i in 0..10 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.claim_next_job(&format!("worker-{i}"), Duration::seconds(30))
                .await
                .unwrap()
        }));
    }

    let mut claims = 0;
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap() {
            assert_eq!(claimed.id, job.id);
            claims += 1;
        }
    }
    assert_eq!(claims, 1);
}

/// S2 — once a lease expires, a second worker can claim the job and the
/// original owner's write attempts are rejected with `JobOwnershipLost`.
#[tokio::test]
async fn lease_recovery_after_expiry() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;

    repo.insert_job(NewJobSpec {
        template_id,
        generate_from: Utc::now(),
        generate_until: Utc::now() + Duration::days(5),
        scheduled_for: Utc::now(),
    })
    .await
    .unwrap();

    let claimed_a = repo
        .claim_next_job("worker-a", Duration::milliseconds(50))
        .await
        .unwrap()
        .expect("worker-a should claim the only pending job");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let claimed_b = repo
        .claim_next_job("worker-b", Duration::seconds(30))
        .await
        .unwrap()
        .expect("worker-b should claim the job once the lease expires");
    assert_eq!(claimed_b.id, claimed_a.id);

    let err = repo
        .fail_job(claimed_a.id, "worker-a", "stale", &RetryConfig {
            max_retries: 3,
            base_delay: Duration::milliseconds(1),
            max_delay: Duration::milliseconds(10),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::JobOwnershipLost(id) if id == claimed_a.id));

    assert!(repo.has_pending_or_running_job(template_id).await.unwrap());
}

/// S3 — after exhausting retries, the job is discarded with exactly one
/// dead-letter row recording the exhausted attempt.
#[tokio::test]
async fn retry_then_dead_letter() {
    let (repo, temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;

    let job = repo
        .insert_job(NewJobSpec {
            template_id,
            generate_from: Utc::now(),
            generate_until: Utc::now() + Duration::days(5),
            scheduled_for: Utc::now(),
        })
        .await
        .unwrap();

    let retry_config = RetryConfig {
        max_retries: 2,
        base_delay: Duration::milliseconds(1),
        max_delay: Duration::milliseconds(5),
    };

    for attempt in 1..=3 {
        let claimed = repo
            .claim_next_job("worker-a", Duration::seconds(30))
            .await
            .unwrap()
            .expect("a pending/scheduled job must be claimable on every attempt");
        assert_eq!(claimed.id, job.id);

        let will_retry = repo
            .fail_job(job.id, "worker-a", "boom", &retry_config)
            .await
            .unwrap();

        if attempt < 3 {
            assert!(will_retry, "attempt {attempt} should still retry");
        } else {
            assert!(!will_retry, "final attempt should exhaust retries");
        }

        if attempt < 3 {
            // Force the backoff-scheduled job to be immediately claimable again.
            let db_path = temp_dir.path().join("test.db");
            let pool = sqlx::SqlitePool::connect(&db_path.to_string_lossy())
                .await
                .unwrap();
            sqlx::query("UPDATE generation_jobs SET scheduled_for = $1, available_at = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(job.id)
                .execute(&pool)
                .await
                .unwrap();
        }
    }

    let db_path = temp_dir.path().join("test.db");
    let pool = sqlx::SqlitePool::connect(&db_path.to_string_lossy()).await.unwrap();
    let dlq_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dead_letter_jobs WHERE original_job_id = $1 AND error_type = 'exhausted'",
    )
    .bind(job.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(dlq_count, 1);

    let dlq_retry_count: i64 = sqlx::query_scalar(
        "SELECT retry_count FROM dead_letter_jobs WHERE original_job_id = $1 AND error_type = 'exhausted'",
    )
    .bind(job.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(dlq_retry_count, 3);

    let (status, job_retry_count): (String, i64) =
        sqlx::query_as("SELECT status, retry_count FROM generation_jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "discarded");
    assert_eq!(job_retry_count, 3);
}

/// S4 — cancellation mid-run transitions through `cancelling` to
/// `cancelled` without ever leaving `available_at` null.
#[tokio::test]
async fn cancellation_preserves_available_at_not_null() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;

    let job = repo
        .insert_job(NewJobSpec {
            template_id,
            generate_from: Utc::now(),
            generate_until: Utc::now() + Duration::days(5),
            scheduled_for: Utc::now(),
        })
        .await
        .unwrap();

    let claimed = repo
        .claim_next_job("worker-a", Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job.id);

    let affected = repo.request_cancellation(job.id).await.unwrap();
    assert_eq!(affected, 1);

    repo.mark_job_as_cancelled(job.id, "worker-a").await.unwrap();
}

/// S7 — two concurrent updates to the same item at the same expected
/// version: exactly one wins, the other surfaces `VersionConflict`, and
/// the final row reflects only the winner's change.
#[tokio::test]
async fn optimistic_concurrency_conflict() {
    let (repo, _temp_dir) = setup_test_db().await;
    let list = repo
        .create_list(NewListData {
            title: "chores".to_string(),
        })
        .await
        .unwrap();
    let item = repo
        .create_item(NewItemData {
            list_id: list.id,
            title: "Original".to_string(),
            status: None,
            priority: None,
            due_at: None,
            occurs_at: None,
            starts_at: None,
            estimated_duration_secs: None,
            tags: Vec::new(),
            timezone: None,
            recurring_template_id: None,
        })
        .await
        .unwrap();
    assert_eq!(item.version, 1);

    let update_a = UpdateItemParams {
        list_id: list.id,
        item_id: item.id,
        data: UpdateItemData {
            title: Some("Updated by A".to_string()),
            ..Default::default()
        },
        expected_version: Some(1),
    };
    let update_b = UpdateItemParams {
        list_id: list.id,
        item_id: item.id,
        data: UpdateItemData {
            title: Some("Updated by B".to_string()),
            ..Default::default()
        },
        expected_version: Some(1),
    };

    let result_a = repo.update_item(update_a).await;
    let result_b = repo.update_item(update_b).await;

    let (winner, loser) = match (result_a, result_b) {
        (Ok(winner), Err(loser)) => (winner, loser),
        (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one winner and one VersionConflict, got {other:?}"),
    };
    assert!(matches!(loser, CoreError::VersionConflict(id) if id == item.id));
    assert_eq!(winner.version, 2);

    let final_item: Item = repo.get_item(list.id, item.id).await.unwrap();
    assert_eq!(final_item.title, winner.title);
    assert_eq!(final_item.version, 2);
}

/// Invariant 9 — a `deleted` exception hides the occurrence from reads and
/// the generator never re-emits it.
#[tokio::test]
async fn deleted_exception_hides_occurrence_and_is_not_regenerated() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (list_id, template_id) = create_daily_template(&repo).await;

    let page = repo
        .find_items(&ItemsFilter::new(list_id), None)
        .await
        .unwrap();
    let instance = page
        .items
        .iter()
        .find(|item| item.recurring_template_id == Some(template_id))
        .expect("sync window should have materialized at least one instance")
        .clone();

    repo.delete_item_with_exception(
        list_id,
        instance.id,
        NewExceptionData {
            template_id,
            occurs_at: instance.occurs_at.unwrap(),
            exception_type: ExceptionType::Deleted,
            item_id: None,
        },
    )
    .await
    .unwrap();

    let page_after = repo
        .find_items(&ItemsFilter::new(list_id), None)
        .await
        .unwrap();
    assert!(page_after.items.iter().all(|item| item.id != instance.id));

    let template = repo.get_template_by_id(template_id).await.unwrap();
    let exceptions = repo.find_exceptions(template_id).await.unwrap();
    let drafts = cadence_core::recurrence::generate_tasks_for_template_with_exceptions(
        &template,
        instance.occurs_at.unwrap() - Duration::hours(1),
        instance.occurs_at.unwrap() + Duration::hours(1),
        &exceptions,
    )
    .unwrap();
    assert!(drafts.iter().all(|d| d.occurs_at != instance.occurs_at.unwrap()));
}

/// Invariant 5 — a second exception at the same `(template, occurs_at)`
/// surfaces `ExceptionAlreadyExists` instead of silently duplicating.
#[tokio::test]
async fn exception_uniqueness_per_template_and_occurrence() {
    let (repo, _temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;
    let occurs_at = Utc::now();

    repo.add_exception(NewExceptionData {
        template_id,
        occurs_at,
        exception_type: ExceptionType::Deleted,
        item_id: None,
    })
    .await
    .unwrap();

    let err = repo
        .add_exception(NewExceptionData {
            template_id,
            occurs_at,
            exception_type: ExceptionType::Deleted,
            item_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::ExceptionAlreadyExists { template_id: t, occurs_at: o }
            if t == template_id && o == occurs_at
    ));
}

/// S8 — checking `has_pending_or_running_job` before every insert, three
/// times in a row against one template needing generation, leaves exactly
/// one job row for that template.
#[tokio::test]
async fn duplicate_schedule_check_inserts_exactly_one_job() {
    let (repo, temp_dir) = setup_test_db().await;
    let (_list_id, template_id) = create_daily_template(&repo).await;

    for _ in 0..3 {
        if !repo.has_pending_or_running_job(template_id).await.unwrap() {
            repo.insert_job(NewJobSpec {
                template_id,
                generate_from: Utc::now(),
                generate_until: Utc::now() + Duration::days(30),
                scheduled_for: Utc::now(),
            })
            .await
            .unwrap();
        }
    }

    let db_path = temp_dir.path().join("test.db");
    let pool = sqlx::SqlitePool::connect(&db_path.to_string_lossy()).await.unwrap();
    let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generation_jobs WHERE template_id = $1")
        .bind(template_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(job_count, 1);
}

fn new_item_with_priority(list_id: Uuid, title: &str, priority: Option<Priority>) -> NewItemData {
    NewItemData {
        list_id,
        title: title.to_string(),
        status: None,
        priority,
        due_at: None,
        occurs_at: None,
        starts_at: None,
        estimated_duration_secs: None,
        tags: Vec::new(),
        timezone: None,
        recurring_template_id: None,
    }
}

/// S6 — ordering by priority follows the semantic LOW < MEDIUM < HIGH <
/// URGENT weight, not lexical order, with unset priorities sorting last
/// regardless of direction.
#[tokio::test]
async fn priority_ordering_is_semantic_with_nulls_last() {
    let (repo, _temp_dir) = setup_test_db().await;
    let list = repo
        .create_list(NewListData {
            title: "chores".to_string(),
        })
        .await
        .unwrap();

    repo.create_item(new_item_with_priority(list.id, "urgent", Some(Priority::Urgent)))
        .await
        .unwrap();
    repo.create_item(new_item_with_priority(list.id, "low", Some(Priority::Low)))
        .await
        .unwrap();
    repo.create_item(new_item_with_priority(list.id, "unset", None))
        .await
        .unwrap();
    repo.create_item(new_item_with_priority(list.id, "high", Some(Priority::High)))
        .await
        .unwrap();
    repo.create_item(new_item_with_priority(list.id, "medium", Some(Priority::Medium)))
        .await
        .unwrap();

    let ascending = repo
        .find_items(&ItemsFilter::new(list.id).with_order_by("priority:asc").unwrap(), None)
        .await
        .unwrap();
    let ascending_titles: Vec<&str> = ascending.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(ascending_titles, vec!["low", "medium", "high", "urgent", "unset"]);

    let descending = repo
        .find_items(&ItemsFilter::new(list.id).with_order_by("priority:desc").unwrap(), None)
        .await
        .unwrap();
    let descending_titles: Vec<&str> = descending.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(descending_titles, vec!["urgent", "high", "medium", "low", "unset"]);
}
