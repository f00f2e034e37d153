use cadence_core::models::{RecurrencePattern, RecurringTemplate, RecurringTemplateException};
use cadence_core::recurrence::generate_tasks_for_template_with_exceptions;
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

fn make_template(pattern: RecurrencePattern, config: serde_json::Value) -> RecurringTemplate {
    let now = Utc::now();
    RecurringTemplate {
        id: Uuid::now_v7(),
        list_id: Uuid::now_v7(),
        title: "Benchmark template".to_string(),
        recurrence_pattern: pattern,
        recurrence_config: config.to_string(),
        due_offset_secs: None,
        timezone: None,
        sync_horizon_days: 7,
        generation_horizon_days: 90,
        generated_through: now,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn bench_daily_expansion_by_window(c: &mut Criterion) {
    let template = make_template(RecurrencePattern::Daily, serde_json::json!({"interval": 1}));
    let start = Utc::now();

    let mut group = c.benchmark_group("daily_expansion_by_window");
    for days in [7, 30, 90, 365].iter() {
        let until = start + Duration::days(*days);
        group.bench_with_input(BenchmarkId::new("days", days), days, |b, _| {
            b.iter(|| {
                generate_tasks_for_template_with_exceptions(
                    black_box(&template),
                    black_box(start),
                    black_box(until),
                    black_box(&[]),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_weekly_expansion_with_days_of_week(c: &mut Criterion) {
    let template = make_template(
        RecurrencePattern::Weekly,
        serde_json::json!({"interval": 1, "days_of_week": [0, 2, 4]}),
    );
    let start = Utc::now();
    let until = start + Duration::days(90);

    c.bench_function("weekly_expansion_with_days_of_week", |b| {
        b.iter(|| {
            generate_tasks_for_template_with_exceptions(
                black_box(&template),
                black_box(start),
                black_box(until),
                black_box(&[]),
            )
            .unwrap()
        })
    });
}

fn bench_monthly_expansion(c: &mut Criterion) {
    let template = make_template(RecurrencePattern::Monthly, serde_json::json!({"interval": 1}));
    let start = Utc::now();
    let until = start + Duration::days(365 * 2);

    c.bench_function("monthly_expansion_two_years", |b| {
        b.iter(|| {
            generate_tasks_for_template_with_exceptions(
                black_box(&template),
                black_box(start),
                black_box(until),
                black_box(&[]),
            )
            .unwrap()
        })
    });
}

fn bench_daily_expansion_with_exceptions(c: &mut Criterion) {
    let template = make_template(RecurrencePattern::Daily, serde_json::json!({"interval": 1}));
    let start = Utc::now();
    let until = start + Duration::days(90);

    let exceptions: Vec<RecurringTemplateException> = (0..90)
        .step_by(5)
        .map(|offset| RecurringTemplateException {
            id: Uuid::now_v7(),
            template_id: template.id,
            occurs_at: start + Duration::days(offset),
            exception_type: cadence_core::models::ExceptionType::Deleted,
            item_id: None,
            created_at: Utc::now(),
        })
        .collect();

    c.bench_function("daily_expansion_with_exceptions_every_5th_day", |b| {
        b.iter(|| {
            generate_tasks_for_template_with_exceptions(
                black_box(&template),
                black_box(start),
                black_box(until),
                black_box(&exceptions),
            )
            .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_daily_expansion_by_window,
    bench_weekly_expansion_with_days_of_week,
    bench_monthly_expansion,
    bench_daily_expansion_with_exceptions,
);
criterion_main!(benches);
