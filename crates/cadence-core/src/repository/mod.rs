use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    ExclusiveRunLease, GenerationJob, Item, List, ListSummary, NewExceptionData, NewItemData,
    NewJobSpec, NewListData, NewTemplateData, OccurrenceDraft, RecurringTemplate,
    RecurringTemplateException, RetryConfig, SeriesStatistics, UpdateItemParams, UpdateListData,
    UpdateTemplateParams,
};
use crate::query::ItemsFilter;

pub mod composite;
pub mod exceptions;
pub mod items;
pub mod jobs;
pub mod lists;
pub mod templates;

use crate::models::ItemStatus;
pub use crate::query::ItemsPage;

#[async_trait]
pub trait ListRepository {
    async fn create_list(&self, data: NewListData) -> Result<List, CoreError>;
    async fn get_list(&self, id: Uuid) -> Result<List, CoreError>;
    async fn list_lists(&self) -> Result<Vec<ListSummary>, CoreError>;
    async fn update_list(&self, id: Uuid, data: UpdateListData) -> Result<List, CoreError>;
}

#[async_trait]
pub trait ItemRepository {
    async fn create_item(&self, data: NewItemData) -> Result<Item, CoreError>;
    async fn get_item(&self, list_id: Uuid, id: Uuid) -> Result<Item, CoreError>;
    async fn find_items(
        &self,
        filter: &ItemsFilter,
        statuses_to_exclude: Option<&[ItemStatus]>,
    ) -> Result<ItemsPage<Item>, CoreError>;
    async fn update_item(&self, params: UpdateItemParams) -> Result<Item, CoreError>;
    async fn delete_item(&self, list_id: Uuid, item_id: Uuid) -> Result<(), CoreError>;
    /// Batch insert with conflict-ignore against the `(recurring_template_id,
    /// occurs_at)` uniqueness — the worker's materialization step. Returns
    /// the count of rows actually inserted; duplicates against already
    /// materialized occurrences are silently dropped.
    async fn batch_upsert_occurrences(&self, drafts: &[OccurrenceDraft]) -> Result<u64, CoreError>;
}

#[async_trait]
pub trait TemplateRepository {
    async fn create_template(&self, data: NewTemplateData) -> Result<RecurringTemplate, CoreError>;
    async fn get_template(&self, list_id: Uuid, id: Uuid) -> Result<RecurringTemplate, CoreError>;
    /// Fetches a template by id alone, unscoped by list. Used by the worker
    /// and scheduler, which only ever see a `template_id` (from a job row),
    /// never the owning list.
    async fn get_template_by_id(&self, id: Uuid) -> Result<RecurringTemplate, CoreError>;
    async fn update_template(
        &self,
        params: UpdateTemplateParams,
    ) -> Result<RecurringTemplate, CoreError>;
    async fn delete_template(&self, list_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    async fn find_active_templates_needing_generation(
        &self,
        now: DateTime<Utc>,
        async_horizon_days: i64,
    ) -> Result<Vec<RecurringTemplate>, CoreError>;
    async fn series_statistics(&self, template_id: Uuid) -> Result<SeriesStatistics, CoreError>;
    /// Advances the materialization watermark outside of a composite op —
    /// the worker's own step after a standalone batch upsert, as opposed to
    /// the watermark advance folded into template create/update.
    async fn advance_generated_through(
        &self,
        template_id: Uuid,
        through: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}

#[async_trait]
pub trait ExceptionRepository {
    async fn add_exception(
        &self,
        data: NewExceptionData,
    ) -> Result<RecurringTemplateException, CoreError>;
    async fn find_exceptions(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<RecurringTemplateException>, CoreError>;
    async fn find_exceptions_in_window(
        &self,
        template_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RecurringTemplateException>, CoreError>;
    async fn find_exception_by_occurrence(
        &self,
        template_id: Uuid,
        occurs_at: DateTime<Utc>,
    ) -> Result<Option<RecurringTemplateException>, CoreError>;
}

#[async_trait]
pub trait JobCoordinator {
    async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<GenerationJob>, CoreError>;
    async fn extend_availability(
        &self,
        job_id: Uuid,
        worker_id: &str,
        extension: Duration,
    ) -> Result<(), CoreError>;
    async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<(), CoreError>;
    async fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error_message: &str,
        retry_config: &RetryConfig,
    ) -> Result<bool, CoreError>;
    async fn move_to_dead_letter(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error_type: &str,
        error_message: &str,
        stack_trace: Option<&str>,
    ) -> Result<(), CoreError>;
    async fn request_cancellation(&self, job_id: Uuid) -> Result<u64, CoreError>;
    async fn mark_job_as_cancelled(&self, job_id: Uuid, worker_id: &str) -> Result<(), CoreError>;
    async fn try_acquire_exclusive_run(
        &self,
        run_type: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<bool, CoreError>;
    async fn release_exclusive_run(&self, run_type: &str, worker_id: &str) -> Result<(), CoreError>;
    async fn find_exclusive_run_lease(
        &self,
        run_type: &str,
    ) -> Result<Option<ExclusiveRunLease>, CoreError>;
    async fn insert_job(&self, spec: NewJobSpec) -> Result<GenerationJob, CoreError>;
    async fn has_pending_or_running_job(&self, template_id: Uuid) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait CompositeRepository {
    async fn update_item_with_exception(
        &self,
        params: UpdateItemParams,
        exception: Option<NewExceptionData>,
    ) -> Result<Item, CoreError>;
    async fn delete_item_with_exception(
        &self,
        list_id: Uuid,
        item_id: Uuid,
        exception: NewExceptionData,
    ) -> Result<(), CoreError>;
    /// `id` is generated by the caller (not inside the transaction) because
    /// `sync_items` are materialized ahead of time and already carry
    /// `recurring_template_id = id` — the generator needs the id to exist
    /// before the template row does.
    async fn create_template_with_initial_generation(
        &self,
        id: Uuid,
        template: NewTemplateData,
        sync_items: Vec<OccurrenceDraft>,
        sync_end: DateTime<Utc>,
        async_job: Option<NewJobSpec>,
    ) -> Result<RecurringTemplate, CoreError>;
    async fn update_template_with_regeneration(
        &self,
        params: UpdateTemplateParams,
        delete_from: DateTime<Utc>,
        new_sync_items: Vec<OccurrenceDraft>,
        sync_end: DateTime<Utc>,
    ) -> Result<RecurringTemplate, CoreError>;
}

/// Composition of every domain-specific repository trait.
#[async_trait]
pub trait Repository:
    ListRepository
    + ItemRepository
    + TemplateRepository
    + ExceptionRepository
    + JobCoordinator
    + CompositeRepository
{
}

/// SQLite-backed implementation shared by every domain module in this
/// directory.
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}
