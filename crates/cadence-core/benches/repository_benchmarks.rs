use std::sync::Arc;

use cadence_core::db::establish_connection;
use cadence_core::models::{ItemStatus, NewItemData, NewListData, Priority};
use cadence_core::query::ItemsFilter;
use cadence_core::repository::{ItemRepository, ListRepository, SqliteRepository};
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use uuid::Uuid;

async fn setup_test_repository() -> (SqliteRepository, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("bench.db");
    let pool = establish_connection(&db_path.to_string_lossy()).await.unwrap();
    (SqliteRepository::new(pool), temp_dir)
}

async fn populate_test_items(repo: &SqliteRepository, list_id: Uuid, count: usize) {
    for i in 0..count {
        let item_data = NewItemData {
            list_id,
            title: format!("Item {i}"),
            status: Some(if i % 5 == 0 { ItemStatus::Done } else { ItemStatus::Todo }),
            priority: Some(if i % 3 == 0 { Priority::High } else { Priority::Low }),
            due_at: Some(Utc::now() + Duration::days(i as i64 % 30)),
            occurs_at: None,
            starts_at: None,
            estimated_duration_secs: None,
            tags: if i % 4 == 0 { vec![format!("tag{}", i % 3)] } else { Vec::new() },
            timezone: None,
            recurring_template_id: None,
        };
        repo.create_item(item_data).await.unwrap();
    }
}

fn bench_item_creation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("item_creation", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (repo, _temp_dir) = setup_test_repository().await;
                let list = repo
                    .create_list(NewListData {
                        title: "Benchmark list".to_string(),
                    })
                    .await
                    .unwrap();

                let item_data = NewItemData {
                    list_id: list.id,
                    title: "Benchmark item".to_string(),
                    status: Some(ItemStatus::Todo),
                    priority: Some(Priority::Medium),
                    due_at: Some(Utc::now() + Duration::days(1)),
                    occurs_at: None,
                    starts_at: None,
                    estimated_duration_secs: None,
                    tags: vec!["benchmark".to_string()],
                    timezone: None,
                    recurring_template_id: None,
                };

                black_box(repo.create_item(item_data).await.unwrap())
            })
        })
    });
}

fn bench_item_lookup_by_id(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (repo, list_id, item_ids, _temp_dir) = rt.block_on(async {
        let (repo, temp_dir) = setup_test_repository().await;
        let list = repo
            .create_list(NewListData {
                title: "Benchmark list".to_string(),
            })
            .await
            .unwrap();
        populate_test_items(&repo, list.id, 100).await;
        let page = repo
            .find_items(&ItemsFilter::new(list.id).with_limit(100).unwrap(), None)
            .await
            .unwrap();
        let item_ids: Vec<Uuid> = page.items.iter().map(|item| item.id).collect();
        (repo, list.id, item_ids, temp_dir)
    });

    let repo = Arc::new(repo);

    c.bench_function("item_lookup_by_id", |b| {
        b.to_async(&rt).iter(|| {
            let repo = Arc::clone(&repo);
            let id = item_ids[fastrand::usize(..item_ids.len())];
            async move { black_box(repo.get_item(list_id, id).await.unwrap()) }
        })
    });
}

fn bench_item_queries(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (repo, list_id, _temp_dir) = rt.block_on(async {
        let (repo, temp_dir) = setup_test_repository().await;
        let list = repo
            .create_list(NewListData {
                title: "Benchmark list".to_string(),
            })
            .await
            .unwrap();
        populate_test_items(&repo, list.id, 1000).await;
        (repo, list.id, temp_dir)
    });

    let repo = Arc::new(repo);

    let test_filters = vec![
        ("todo_only", ItemsFilter::new(list_id).with_statuses(vec![ItemStatus::Todo])),
        ("high_priority", ItemsFilter::new(list_id).with_priorities(vec![Priority::High])),
        (
            "due_within_a_week",
            ItemsFilter {
                due_before: Some(Utc::now() + Duration::days(7)),
                ..ItemsFilter::new(list_id)
            },
        ),
    ];

    let mut group = c.benchmark_group("item_queries");
    for (name, filter) in test_filters {
        group.bench_with_input(BenchmarkId::new("filter", name), &filter, |b, filter| {
            b.to_async(&rt).iter(|| {
                let repo = Arc::clone(&repo);
                let filter = filter.clone();
                async move { black_box(repo.find_items(&filter, None).await.unwrap()) }
            })
        });
    }
    group.finish();
}

fn bench_batch_item_creation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("batch_item_creation");
    for batch_size in [10, 50, 100].iter() {
        group.bench_with_input(BenchmarkId::new("batch_size", batch_size), batch_size, |b, &batch_size| {
            b.to_async(&rt).iter(|| async move {
                let (repo, _temp_dir) = setup_test_repository().await;
                let list = repo
                    .create_list(NewListData {
                        title: "Benchmark list".to_string(),
                    })
                    .await
                    .unwrap();
                populate_test_items(&repo, list.id, batch_size).await;
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_item_creation,
    bench_item_lookup_by_id,
    bench_item_queries,
    bench_batch_item_creation,
);
criterion_main!(benches);
