//! Service façade consumed by the transport collaborator.
//!
//! Orchestrates the business rules that sit above the repository layer —
//! content edits on a recurring instance creating an `edited` exception,
//! delete routing between archive and hard-delete, and template
//! create/update driving the eager sync window plus an optional follow-up
//! job — and threads an [`OperationContext`] through every call so a
//! caller's cancellation or deadline is honored at the next I/O
//! suspension point.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    ExceptionType, Item, ItemStatus, List, ListSummary, NewExceptionData, NewItemData,
    NewJobSpec, NewListData, NewTemplateData, OccurrenceDraft, RecurringTemplate, RetryConfig,
    SeriesStatistics, UpdateItemParams, UpdateListData, UpdateTemplateParams,
};
use crate::query::{ItemsFilter, ItemsPage};
use crate::recurrence::generate_tasks_for_template_with_exceptions;
use crate::repository::{
    CompositeRepository, ExceptionRepository, ItemRepository, ListRepository, Repository,
    TemplateRepository,
};
use crate::scheduler::{ScheduleOutcome, Scheduler};
use crate::worker::{GenerationWorker, TickOutcome};

/// Per-call cancellation/deadline. Cheap to clone; `child()` derives a
/// token that cancels when the parent does but can also be cancelled
/// independently, for a sub-operation the caller wants to bound more
/// tightly than the whole request.
#[derive(Clone)]
pub struct OperationContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

/// Races `fut` against the context's cancellation and deadline. If `fut`
/// is dropped by losing the race, any open `sqlx::Transaction` it was
/// holding is rolled back on drop — cancellation inside a transaction
/// never leaves a half-applied write.
async fn guarded<T>(
    ctx: &OperationContext,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => Err(CoreError::Cancelled),
        _ = sleep_until_deadline(ctx.deadline) => Err(CoreError::DeadlineExceeded),
        result = fut => result,
    }
}

/// Fixed configuration the service needs to drive its internal scheduler
/// and worker; everything else flows through per-call arguments.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub async_horizon_days: i64,
    pub worker_id: String,
    pub lease_duration: Duration,
    pub retry_config: RetryConfig,
}

pub struct Service<R: Repository> {
    repository: Arc<R>,
    scheduler: Scheduler<R>,
    worker: GenerationWorker<R>,
}

impl<R: Repository + Send + Sync + 'static> Service<R> {
    pub fn new(repository: Arc<R>, config: ServiceConfig) -> Self {
        let scheduler = Scheduler::new(repository.clone(), config.async_horizon_days);
        let worker = GenerationWorker::new(
            repository.clone(),
            config.worker_id,
            config.lease_duration,
            config.retry_config,
        );
        Self {
            repository,
            scheduler,
            worker,
        }
    }

    // --- List ops ---

    pub async fn create_list(&self, ctx: &OperationContext, title: String) -> Result<List, CoreError> {
        guarded(ctx, self.repository.create_list(NewListData { title })).await
    }

    pub async fn get_list(&self, ctx: &OperationContext, id: Uuid) -> Result<List, CoreError> {
        guarded(ctx, self.repository.get_list(id)).await
    }

    pub async fn list_lists(&self, ctx: &OperationContext) -> Result<Vec<ListSummary>, CoreError> {
        guarded(ctx, self.repository.list_lists()).await
    }

    pub async fn update_list(
        &self,
        ctx: &OperationContext,
        id: Uuid,
        data: UpdateListData,
    ) -> Result<List, CoreError> {
        guarded(ctx, self.repository.update_list(id, data)).await
    }

    // --- Item ops ---

    pub async fn create_item(&self, ctx: &OperationContext, data: NewItemData) -> Result<Item, CoreError> {
        guarded(ctx, self.repository.create_item(data)).await
    }

    pub async fn get_item(&self, ctx: &OperationContext, list_id: Uuid, id: Uuid) -> Result<Item, CoreError> {
        guarded(ctx, self.repository.get_item(list_id, id)).await
    }

    pub async fn find_items(
        &self,
        ctx: &OperationContext,
        filter: &ItemsFilter,
        statuses_to_exclude: Option<&[ItemStatus]>,
    ) -> Result<ItemsPage<Item>, CoreError> {
        guarded(ctx, self.repository.find_items(filter, statuses_to_exclude)).await
    }

    /// Editing a recurring instance's content records an `edited` exception
    /// for its `(template_id, occurs_at)` slot the first time; a second
    /// content edit on the same instance is a pure update — the exception
    /// already exists, so none is inserted again. Editing status alone
    /// never creates an exception.
    #[instrument(skip(self, ctx, params), fields(item_id = %params.item_id))]
    pub async fn update_item(
        &self,
        ctx: &OperationContext,
        params: UpdateItemParams,
    ) -> Result<Item, CoreError> {
        guarded(ctx, async move {
            let current = self.repository.get_item(params.list_id, params.item_id).await?;

            if current.is_recurring_instance() && params.data.touches_content() {
                let template_id = current
                    .recurring_template_id
                    .expect("is_recurring_instance guarantees this");
                let occurs_at = current
                    .occurs_at
                    .expect("is_recurring_instance guarantees this");

                let existing = self
                    .repository
                    .find_exception_by_occurrence(template_id, occurs_at)
                    .await?;

                let exception = match existing {
                    Some(e) if e.exception_type == ExceptionType::Edited => None,
                    _ => Some(NewExceptionData {
                        template_id,
                        occurs_at,
                        exception_type: ExceptionType::Edited,
                        item_id: Some(current.id),
                    }),
                };

                self.repository.update_item_with_exception(params, exception).await
            } else {
                self.repository.update_item(params).await
            }
        })
        .await
    }

    /// A recurring instance is archived and given a `deleted` exception
    /// (its slot stays excluded by future reads and regeneration); a
    /// one-off item has no exception mechanism, so it is hard-deleted.
    pub async fn delete_item(
        &self,
        ctx: &OperationContext,
        list_id: Uuid,
        item_id: Uuid,
    ) -> Result<(), CoreError> {
        guarded(ctx, async move {
            let current = self.repository.get_item(list_id, item_id).await?;

            if current.is_recurring_instance() {
                let exception = NewExceptionData {
                    template_id: current
                        .recurring_template_id
                        .expect("is_recurring_instance guarantees this"),
                    occurs_at: current.occurs_at.expect("is_recurring_instance guarantees this"),
                    exception_type: ExceptionType::Deleted,
                    item_id: Some(current.id),
                };
                self.repository
                    .delete_item_with_exception(list_id, item_id, exception)
                    .await
            } else {
                self.repository.delete_item(list_id, item_id).await
            }
        })
        .await
    }

    // --- Template ops ---

    /// Materializes the eager sync window `[now, now + sync_horizon_days]`
    /// inline and, when the generation horizon extends past it, hands the
    /// remainder off to an async job so creation never blocks on the full
    /// generation window.
    #[instrument(skip(self, ctx, data), fields(list_id = %data.list_id))]
    pub async fn create_recurring_template(
        &self,
        ctx: &OperationContext,
        data: NewTemplateData,
    ) -> Result<RecurringTemplate, CoreError> {
        guarded(ctx, async move {
            let now = Utc::now();
            let id = Uuid::now_v7();
            let sync_end = now + Duration::days(data.sync_horizon_days);

            let draft = RecurringTemplate {
                id,
                list_id: data.list_id,
                title: data.title.clone(),
                recurrence_pattern: data.recurrence_pattern,
                recurrence_config: data.recurrence_config.to_string(),
                due_offset_secs: data.due_offset_secs,
                timezone: data.timezone.clone(),
                sync_horizon_days: data.sync_horizon_days,
                generation_horizon_days: data.generation_horizon_days,
                generated_through: now,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            let sync_items = generate_tasks_for_template_with_exceptions(&draft, now, sync_end, &[])?;

            let async_job = if data.generation_horizon_days > data.sync_horizon_days {
                Some(NewJobSpec {
                    template_id: id,
                    generate_from: sync_end,
                    generate_until: now + Duration::days(data.generation_horizon_days),
                    scheduled_for: now,
                })
            } else {
                None
            };

            self.repository
                .create_template_with_initial_generation(id, data, sync_items, sync_end, async_job)
                .await
        })
        .await
    }

    /// A pattern/config/offset/timezone change invalidates previously
    /// materialized future instances: future undone occurrences are
    /// replaced and the sync window is regenerated against the new shape.
    /// A change touching only bookkeeping fields (title, horizons,
    /// `is_active`) skips regeneration entirely.
    #[instrument(skip(self, ctx, params), fields(template_id = %params.template_id))]
    pub async fn update_recurring_template(
        &self,
        ctx: &OperationContext,
        params: UpdateTemplateParams,
    ) -> Result<RecurringTemplate, CoreError> {
        guarded(ctx, async move {
            let current = self
                .repository
                .get_template(params.list_id, params.template_id)
                .await?;

            if !params.data.changes_recurrence() {
                return self.repository.update_template(params).await;
            }

            let now = Utc::now();
            let sync_horizon_days = params.data.sync_horizon_days.unwrap_or(current.sync_horizon_days);
            let sync_end = now + Duration::days(sync_horizon_days);

            let config = params
                .data
                .recurrence_config
                .clone()
                .unwrap_or_else(|| current.config());
            let due_offset_secs = match params.data.due_offset_secs {
                Some(v) => v,
                None => current.due_offset_secs,
            };
            let timezone = match params.data.timezone.clone() {
                Some(v) => v,
                None => current.timezone.clone(),
            };

            let projected = RecurringTemplate {
                id: current.id,
                list_id: current.list_id,
                title: params.data.title.clone().unwrap_or_else(|| current.title.clone()),
                recurrence_pattern: params.data.recurrence_pattern.unwrap_or(current.recurrence_pattern),
                recurrence_config: config.to_string(),
                due_offset_secs,
                timezone,
                sync_horizon_days,
                generation_horizon_days: params
                    .data
                    .generation_horizon_days
                    .unwrap_or(current.generation_horizon_days),
                generated_through: current.generated_through,
                is_active: params.data.is_active.unwrap_or(current.is_active),
                created_at: current.created_at,
                updated_at: current.updated_at,
            };

            let new_sync_items =
                generate_tasks_for_template_with_exceptions(&projected, now, sync_end, &[])?;

            self.repository
                .update_template_with_regeneration(params, now, new_sync_items, sync_end)
                .await
        })
        .await
    }

    pub async fn delete_recurring_template(
        &self,
        ctx: &OperationContext,
        list_id: Uuid,
        id: Uuid,
    ) -> Result<(), CoreError> {
        guarded(ctx, self.repository.delete_template(list_id, id)).await
    }

    pub async fn series_statistics(
        &self,
        ctx: &OperationContext,
        template_id: Uuid,
    ) -> Result<SeriesStatistics, CoreError> {
        guarded(ctx, self.repository.series_statistics(template_id)).await
    }

    /// The same pure generator the worker uses, run read-only against the
    /// live template and its exceptions — nothing is materialized.
    pub async fn preview_occurrences(
        &self,
        ctx: &OperationContext,
        list_id: Uuid,
        template_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<OccurrenceDraft>, CoreError> {
        guarded(ctx, async move {
            let template = self.repository.get_template(list_id, template_id).await?;
            let exceptions = self
                .repository
                .find_exceptions_in_window(template_id, from, until)
                .await?;
            generate_tasks_for_template_with_exceptions(&template, from, until, &exceptions)
        })
        .await
    }

    // --- Worker ops ---

    pub async fn run_schedule_once(&self, ctx: &OperationContext) -> Result<ScheduleOutcome, CoreError> {
        guarded(ctx, self.scheduler.run_schedule_once()).await
    }

    pub async fn run_process_once(&self, ctx: &OperationContext) -> Result<TickOutcome, CoreError> {
        guarded(ctx, self.worker.run_tick()).await
    }
}
