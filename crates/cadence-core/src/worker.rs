//! The generation worker: claim → load → expand → upsert → complete, with
//! panic capture at the tick boundary.
//!
//! Each tick's processing body runs as its own spawned task so a panic
//! inside it surfaces as a `JoinError` rather than unwinding into the
//! worker loop — the `tokio::spawn` boundary *is* the recovery boundary.
//! The outer tick function never re-panics and never returns early without
//! resolving the claimed job to either `completed`, `pending` (retry), or
//! `discarded`.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{GenerationJob, RetryConfig};
use crate::recurrence::generate_tasks_for_template_with_exceptions;
use crate::repository::{ExceptionRepository, ItemRepository, JobCoordinator, Repository, TemplateRepository};

/// What happened on a single `run_tick` call, surfaced mostly for logging
/// and tests.
#[derive(Debug)]
pub enum TickOutcome {
    /// No claimable job was found.
    Idle,
    /// The job was claimed, materialized, and completed.
    Completed { job_id: Uuid, occurrences_created: u64 },
    /// The job's processing returned a business error; the coordinator
    /// decided whether to retry or move it to the dead-letter queue.
    Failed { job_id: Uuid, will_retry: bool },
    /// The job's processing panicked; it was moved directly to the
    /// dead-letter queue.
    Panicked { job_id: Uuid },
}

pub struct GenerationWorker<R: Repository> {
    repository: Arc<R>,
    worker_id: String,
    lease_duration: Duration,
    retry_config: RetryConfig,
}

impl<R: Repository + Send + Sync + 'static> GenerationWorker<R> {
    pub fn new(
        repository: Arc<R>,
        worker_id: impl Into<String>,
        lease_duration: Duration,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            repository,
            worker_id: worker_id.into(),
            lease_duration,
            retry_config,
        }
    }

    /// Runs exactly one tick: claim, process, resolve. Returns `Idle`
    /// immediately (without claiming-related side effects) if no job is
    /// claimable.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run_tick(&self) -> Result<TickOutcome, CoreError> {
        let Some(job) = self
            .repository
            .claim_next_job(&self.worker_id, self.lease_duration)
            .await?
        else {
            return Ok(TickOutcome::Idle);
        };

        let job_id = job.id;
        info!(job_id = %job_id, template_id = %job.template_id, "claimed generation job");

        let repository = self.repository.clone();
        let handle = tokio::spawn(process_job(repository, job));

        match handle.await {
            Ok(Ok(occurrences_created)) => {
                self.repository.complete_job(job_id, &self.worker_id).await?;
                info!(job_id = %job_id, occurrences_created, "generation job completed");
                Ok(TickOutcome::Completed {
                    job_id,
                    occurrences_created,
                })
            }
            Ok(Err(err)) => {
                let will_retry = self
                    .repository
                    .fail_job(job_id, &self.worker_id, &err.to_string(), &self.retry_config)
                    .await?;
                warn!(job_id = %job_id, will_retry, error = %err, "generation job failed");
                Ok(TickOutcome::Failed { job_id, will_retry })
            }
            Err(join_err) if join_err.is_panic() => {
                let panic_payload = join_err.into_panic();
                let message = panic_message(&panic_payload);
                error!(job_id = %job_id, panic = %message, "generation job panicked");
                self.repository
                    .move_to_dead_letter(job_id, &self.worker_id, "panic", &message, None)
                    .await?;
                Ok(TickOutcome::Panicked { job_id })
            }
            Err(join_err) => Err(CoreError::Internal(format!(
                "generation worker task could not be joined: {join_err}"
            ))),
        }
    }
}

/// The recover-protected body of a tick: load the template and its
/// exceptions, expand the recurrence rule, upsert the resulting
/// occurrences, and advance the watermark. A panic anywhere in here is
/// caught by the `tokio::spawn` boundary in `run_tick`, not by this
/// function — it is written as ordinary fallible code.
async fn process_job<R: Repository + Send + Sync + 'static>(
    repository: Arc<R>,
    job: GenerationJob,
) -> Result<u64, CoreError> {
    let template = repository.get_template_by_id(job.template_id).await?;

    let exceptions = repository
        .find_exceptions_in_window(job.template_id, job.generate_from, job.generate_until)
        .await?;

    let drafts = generate_tasks_for_template_with_exceptions(
        &template,
        job.generate_from,
        job.generate_until,
        &exceptions,
    )?;

    let occurrences_created = repository.batch_upsert_occurrences(&drafts).await?;

    repository
        .advance_generated_through(job.template_id, job.generate_until)
        .await?;

    Ok(occurrences_created)
}

/// Extracts a human-readable message from a caught panic payload, the way
/// `std::panic::Location`-less panic hooks typically do: `&str` and
/// `String` cover the overwhelming majority of `panic!`/`.unwrap()`
/// payloads; anything else degrades to a fixed marker rather than failing.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked with a non-string payload".to_string()
    }
}

/// Routes panic info through `tracing` instead of the default stderr
/// writer. The spawned task's panic is already captured as a `JoinError`
/// by `run_tick`; this only changes where the unwind message itself goes.
/// Call once at process startup.
pub fn install_tracing_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "panic captured by worker hook");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::establish_connection;
    use crate::models::{NewListData, NewTemplateData, RecurrencePattern};
    use crate::repository::{CompositeRepository, ListRepository, SqliteRepository};
    use chrono::Utc;
    use tempfile::TempDir;

    async fn test_repo() -> (Arc<SqliteRepository>, TempDir) {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let pool = establish_connection(&db_path.to_string_lossy()).await.unwrap();
        (Arc::new(SqliteRepository::new(pool)), temp_dir)
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::milliseconds(1),
            max_delay: Duration::milliseconds(50),
        }
    }

    #[tokio::test]
    async fn idle_tick_returns_without_claim() {
        let (repo, _temp_dir) = test_repo().await;
        let worker = GenerationWorker::new(repo, "worker-1", Duration::seconds(30), retry_config());
        let outcome = worker.run_tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Idle));
    }

    #[tokio::test]
    async fn claims_materializes_and_completes() {
        let (repo, _temp_dir) = test_repo().await;
        let list = repo
            .create_list(NewListData {
                title: "chores".to_string(),
            })
            .await
            .unwrap();

        let now = Utc::now();
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
                    sync_horizon_days: 1,
                    generation_horizon_days: 30,
                },
                Vec::new(),
                now,
                None,
            )
            .await
            .unwrap();

        repo.insert_job(crate::models::NewJobSpec {
            template_id: template.id,
            generate_from: now,
            generate_until: now + chrono::Duration::days(5),
            scheduled_for: now,
        })
        .await
        .unwrap();

        let worker = GenerationWorker::new(repo.clone(), "worker-1", Duration::seconds(30), retry_config());
        let outcome = worker.run_tick().await.unwrap();
        match outcome {
            TickOutcome::Completed {
                occurrences_created,
                ..
            } => assert!(occurrences_created >= 1),
            other => panic!("expected Completed, got {other:?}"),
        }

        let stats = repo.series_statistics(template.id).await.unwrap();
        assert!(stats.materialized_count >= 1);
    }
}
