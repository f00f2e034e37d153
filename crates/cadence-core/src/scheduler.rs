//! Periodic emission of generation jobs for templates approaching the end
//! of their materialized horizon.
//!
//! The scheduler itself holds no state beyond the horizon it sweeps with;
//! all coordination flows through the partial-unique index on
//! `generation_jobs`, which is the authoritative race guard against two
//! scheduler sweeps (in this process or another) double-inserting a job
//! for the same template.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;
use crate::models::NewJobSpec;
use crate::repository::{Repository, TemplateRepository};

/// Outcome of a single scheduler sweep, returned mostly for logging and
/// tests. Running the sweep twice in a row against the same state is
/// idempotent: the second run finds every template already has an active
/// job and schedules nothing new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub templates_considered: u64,
    pub jobs_scheduled: u64,
    pub already_active: u64,
}

pub struct Scheduler<R: Repository> {
    repository: Arc<R>,
    async_horizon_days: i64,
}

impl<R: Repository> Scheduler<R> {
    pub fn new(repository: Arc<R>, async_horizon_days: i64) -> Self {
        Self {
            repository,
            async_horizon_days,
        }
    }

    /// One sweep: for every active template whose `generated_through` falls
    /// inside the async horizon, emit at most one job. Templates that
    /// already have a pending/scheduled/running job are skipped; templates
    /// that lose the insert race against a sibling scheduler (or another
    /// process entirely) surface `JobAlreadyActive`, which is swallowed
    /// rather than propagated.
    #[instrument(skip(self), fields(async_horizon_days = self.async_horizon_days))]
    pub async fn run_schedule_once(&self) -> Result<ScheduleOutcome, CoreError> {
        let now = Utc::now();
        let templates = self
            .repository
            .find_active_templates_needing_generation(now, self.async_horizon_days)
            .await?;

        let mut outcome = ScheduleOutcome {
            templates_considered: templates.len() as u64,
            ..Default::default()
        };

        for template in templates {
            if self
                .repository
                .has_pending_or_running_job(template.id)
                .await?
            {
                debug!(template_id = %template.id, "template already has an active job, skipping");
                outcome.already_active += 1;
                continue;
            }

            let spec = NewJobSpec {
                template_id: template.id,
                generate_from: template.generated_through,
                generate_until: now + Duration::days(self.async_horizon_days),
                scheduled_for: now,
            };

            match self.repository.insert_job(spec).await {
                Ok(job) => {
                    info!(template_id = %template.id, job_id = %job.id, "scheduled generation job");
                    outcome.jobs_scheduled += 1;
                }
                Err(CoreError::JobAlreadyActive(template_id)) => {
                    warn!(template_id = %template_id, "lost the insert race to a sibling scheduler, skipping");
                    outcome.already_active += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(outcome)
    }
}
