use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{ExclusiveRunLease, GenerationJob, JobStatus, NewJobSpec, RetryConfig};
use crate::repository::SqliteRepository;

fn is_unique_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    err.message().contains("UNIQUE constraint failed")
}

/// `delay(n) = min(base * 2^(n-1), max) ± jitter(±base)`, clamped to
/// non-negative.
fn backoff_delay(retry_count: i64, cfg: &RetryConfig) -> Duration {
    let exponent = (retry_count - 1).max(0).min(62) as u32;
    let base_ms = cfg.base_delay.num_milliseconds();
    let exp_ms = base_ms.saturating_mul(1i64 << exponent);
    let capped_ms = exp_ms.min(cfg.max_delay.num_milliseconds());
    let jitter_ms = fastrand::i64(-base_ms..=base_ms);
    Duration::milliseconds((capped_ms + jitter_ms).max(0))
}

#[async_trait]
impl super::JobCoordinator for SqliteRepository {
    async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<GenerationJob>, CoreError> {
        let now = Utc::now();
        let available_at = now + lease_duration;

        let job: Option<GenerationJob> = sqlx::query_as(
            r#"UPDATE generation_jobs
               SET status = 'running', claimed_by = $1, claimed_at = $2, available_at = $3
               WHERE id = (
                   SELECT id FROM generation_jobs
                   WHERE status IN ('pending', 'scheduled')
                     AND scheduled_for <= $4
                     AND (claimed_by IS NULL OR available_at <= $5)
                   ORDER BY scheduled_for ASC
                   LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(available_at)
        .bind(now)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(job)
    }

    async fn extend_availability(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extension: Duration,
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        let new_available_at = now + extension;

        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET available_at = $1
               WHERE id = $2 AND claimed_by = $3 AND status = 'running' AND available_at > $4"#,
        )
        .bind(new_available_at)
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::JobOwnershipLost(job_id));
        }
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = 'completed', completed_at = $1
               WHERE id = $2 AND claimed_by = $3 AND status = 'running' AND available_at > $4"#,
        )
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::JobOwnershipLost(job_id));
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error_message: &str,
        retry_config: &RetryConfig,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        let job: GenerationJob = sqlx::query_as(
            r#"SELECT * FROM generation_jobs
               WHERE id = $1 AND claimed_by = $2 AND status = 'running' AND available_at > $3"#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::JobOwnershipLost(job_id))?;

        let new_retry_count = job.retry_count + 1;

        if new_retry_count <= retry_config.max_retries {
            let delay = backoff_delay(new_retry_count, retry_config);
            let scheduled_for = now + delay;

            let result = sqlx::query(
                r#"UPDATE generation_jobs
                   SET status = 'pending', retry_count = $1, last_error = $2,
                       scheduled_for = $3, available_at = $3, claimed_by = NULL, claimed_at = NULL
                   WHERE id = $4 AND claimed_by = $5"#,
            )
            .bind(new_retry_count)
            .bind(error_message)
            .bind(scheduled_for)
            .bind(job_id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::JobOwnershipLost(job_id));
            }
            tx.commit().await?;
            Ok(true)
        } else {
            insert_dead_letter_row(
                &mut tx,
                &job,
                new_retry_count,
                worker_id,
                "exhausted",
                error_message,
                None,
            )
            .await?;

            let result = sqlx::query(
                r#"UPDATE generation_jobs
                   SET status = 'discarded', retry_count = $1, last_error = $2, completed_at = $3
                   WHERE id = $4 AND claimed_by = $5"#,
            )
            .bind(new_retry_count)
            .bind(error_message)
            .bind(now)
            .bind(job_id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(CoreError::JobOwnershipLost(job_id));
            }
            tx.commit().await?;
            Ok(false)
        }
    }

    async fn move_to_dead_letter(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error_type: &str,
        error_message: &str,
        stack_trace: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        let job: GenerationJob = sqlx::query_as(
            r#"SELECT * FROM generation_jobs
               WHERE id = $1 AND claimed_by = $2 AND status = 'running' AND available_at > $3"#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::JobOwnershipLost(job_id))?;

        insert_dead_letter_row(
            &mut tx,
            &job,
            job.retry_count,
            worker_id,
            error_type,
            error_message,
            stack_trace,
        )
        .await?;

        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = 'discarded', last_error = $1, completed_at = $2
               WHERE id = $3 AND claimed_by = $4"#,
        )
        .bind(error_message)
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::JobOwnershipLost(job_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn request_cancellation(&self, job_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = CASE status
                   WHEN 'running' THEN 'cancelling'
                   WHEN 'pending' THEN 'cancelled'
                   ELSE status
               END
               WHERE id = $1 AND status IN ('running', 'pending')"#,
        )
        .bind(job_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_job_as_cancelled(&self, job_id: Uuid, worker_id: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = 'cancelled', completed_at = $1
               WHERE id = $2 AND claimed_by = $3 AND status = 'cancelling' AND available_at > $4"#,
        )
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::JobOwnershipLost(job_id));
        }
        Ok(())
    }

    async fn try_acquire_exclusive_run(
        &self,
        run_type: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<bool, CoreError> {
        let now = Utc::now();
        let lease_until = now + lease;

        let result = sqlx::query(
            r#"INSERT INTO exclusive_run_leases (run_type, worker_id, lease_until)
               VALUES ($1, $2, $3)
               ON CONFLICT(run_type) DO UPDATE SET
                   worker_id = excluded.worker_id,
                   lease_until = excluded.lease_until
               WHERE exclusive_run_leases.lease_until < $4"#,
        )
        .bind(run_type)
        .bind(worker_id)
        .bind(lease_until)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_exclusive_run(&self, run_type: &str, worker_id: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM exclusive_run_leases WHERE run_type = $1 AND worker_id = $2")
            .bind(run_type)
            .bind(worker_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn find_exclusive_run_lease(
        &self,
        run_type: &str,
    ) -> Result<Option<ExclusiveRunLease>, CoreError> {
        let lease = sqlx::query_as("SELECT * FROM exclusive_run_leases WHERE run_type = $1")
            .bind(run_type)
            .fetch_optional(self.pool())
            .await?;
        Ok(lease)
    }

    async fn insert_job(&self, spec: NewJobSpec) -> Result<GenerationJob, CoreError> {
        let mut tx = self.pool().begin().await?;
        let job = insert_job_in_transaction(&mut tx, spec).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn has_pending_or_running_job(&self, template_id: Uuid) -> Result<bool, CoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM generation_jobs WHERE template_id = $1 AND status IN ('pending', 'scheduled', 'running')",
        )
        .bind(template_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }
}

/// Inserts a job within an existing transaction. A conflict with the
/// no-duplicate-active-job index surfaces `JobAlreadyActive` rather than a
/// raw constraint violation.
pub(crate) async fn insert_job_in_transaction<'a>(
    tx: &mut sqlx::Transaction<'a, sqlx::Sqlite>,
    spec: NewJobSpec,
) -> Result<GenerationJob, CoreError> {
    let now = Utc::now();
    let status = if spec.scheduled_for > now {
        JobStatus::Scheduled
    } else {
        JobStatus::Pending
    };

    let job = GenerationJob {
        id: Uuid::now_v7(),
        template_id: spec.template_id,
        generate_from: spec.generate_from,
        generate_until: spec.generate_until,
        scheduled_for: spec.scheduled_for,
        available_at: spec.scheduled_for,
        claimed_by: None,
        claimed_at: None,
        status,
        retry_count: 0,
        created_at: now,
        completed_at: None,
        last_error: None,
    };

    let result = sqlx::query(
        r#"INSERT INTO generation_jobs (
            id, template_id, generate_from, generate_until, scheduled_for, available_at,
            claimed_by, claimed_at, status, retry_count, created_at, completed_at, last_error
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
    )
    .bind(job.id)
    .bind(job.template_id)
    .bind(job.generate_from)
    .bind(job.generate_until)
    .bind(job.scheduled_for)
    .bind(job.available_at)
    .bind(job.claimed_by)
    .bind(job.claimed_at)
    .bind(job.status)
    .bind(job.retry_count)
    .bind(job.created_at)
    .bind(job.completed_at)
    .bind(&job.last_error)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(job),
        Err(sqlx::Error::Database(db_err)) if is_unique_violation(&*db_err) => {
            Err(CoreError::JobAlreadyActive(spec.template_id))
        }
        Err(e) => Err(e.into()),
    }
}

async fn insert_dead_letter_row<'a>(
    tx: &mut sqlx::Transaction<'a, sqlx::Sqlite>,
    job: &GenerationJob,
    retry_count: i64,
    worker_id: &str,
    error_type: &str,
    error_message: &str,
    stack_trace: Option<&str>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"INSERT INTO dead_letter_jobs (
            id, original_job_id, template_id, error_type, error_message, stack_trace,
            retry_count, last_worker_id, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(Uuid::now_v7())
    .bind(job.id)
    .bind(job.template_id)
    .bind(error_type)
    .bind(error_message)
    .bind(stack_trace)
    .bind(retry_count)
    .bind(worker_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
