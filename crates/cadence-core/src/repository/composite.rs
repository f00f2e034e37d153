use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    Item, NewExceptionData, NewJobSpec, NewTemplateData, OccurrenceDraft, RecurringTemplate,
    UpdateItemParams, UpdateTemplateParams,
};
use crate::repository::exceptions::add_exception_in_transaction;
use crate::repository::items::{insert_occurrence_draft_in_transaction, update_item_in_transaction};
use crate::repository::jobs::insert_job_in_transaction;
use crate::repository::templates::{
    advance_generated_through_in_transaction, update_template_in_transaction,
};
use crate::repository::SqliteRepository;

#[async_trait]
impl super::CompositeRepository for SqliteRepository {
    async fn update_item_with_exception(
        &self,
        params: UpdateItemParams,
        exception: Option<NewExceptionData>,
    ) -> Result<Item, CoreError> {
        let mut tx = self.pool().begin().await?;

        if let Some(exception) = exception {
            add_exception_in_transaction(&mut tx, exception).await?;
        }

        let updated = update_item_in_transaction(&mut tx, params).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_item_with_exception(
        &self,
        list_id: Uuid,
        item_id: Uuid,
        exception: NewExceptionData,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let current: Item = sqlx::query_as("SELECT * FROM items WHERE id = $1 AND list_id = $2")
            .bind(item_id)
            .bind(list_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CoreError::ItemNotFound(item_id))?;

        add_exception_in_transaction(&mut tx, exception).await?;

        // A recurring instance is archived, not removed, so its exclusion
        // from reads comes entirely from the exception; a one-off item has
        // no exception mechanism hiding it, so it is hard-deleted.
        let result = if current.is_recurring_instance() {
            sqlx::query(
                "UPDATE items SET status = 'archived' WHERE id = $1 AND list_id = $2",
            )
            .bind(item_id)
            .bind(list_id)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query("DELETE FROM items WHERE id = $1 AND list_id = $2")
                .bind(item_id)
                .bind(list_id)
                .execute(&mut *tx)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(CoreError::ItemNotFound(item_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_template_with_initial_generation(
        &self,
        id: Uuid,
        template: NewTemplateData,
        sync_items: Vec<OccurrenceDraft>,
        sync_end: DateTime<Utc>,
        async_job: Option<NewJobSpec>,
    ) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        let created = RecurringTemplate {
            id,
            list_id: template.list_id,
            title: template.title,
            recurrence_pattern: template.recurrence_pattern,
            recurrence_config: template.recurrence_config.to_string(),
            due_offset_secs: template.due_offset_secs,
            timezone: template.timezone,
            sync_horizon_days: template.sync_horizon_days,
            generation_horizon_days: template.generation_horizon_days,
            generated_through: sync_end,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO recurring_templates (
                id, list_id, title, recurrence_pattern, recurrence_config, due_offset_secs,
                timezone, sync_horizon_days, generation_horizon_days, generated_through,
                is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(created.id)
        .bind(created.list_id)
        .bind(&created.title)
        .bind(created.recurrence_pattern)
        .bind(&created.recurrence_config)
        .bind(created.due_offset_secs)
        .bind(&created.timezone)
        .bind(created.sync_horizon_days)
        .bind(created.generation_horizon_days)
        .bind(created.generated_through)
        .bind(created.is_active)
        .bind(created.created_at)
        .bind(created.updated_at)
        .execute(&mut *tx)
        .await?;

        for draft in &sync_items {
            insert_occurrence_draft_in_transaction(&mut tx, draft).await?;
        }

        if let Some(job) = async_job {
            insert_job_in_transaction(&mut tx, job).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn update_template_with_regeneration(
        &self,
        params: UpdateTemplateParams,
        delete_from: DateTime<Utc>,
        new_sync_items: Vec<OccurrenceDraft>,
        sync_end: DateTime<Utc>,
    ) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.pool().begin().await?;
        let template_id = params.template_id;

        update_template_in_transaction(&mut tx, params).await?;

        // Future undone instances reflect the old schedule and are replaced;
        // past/completed instances are left alone.
        sqlx::query(
            r#"DELETE FROM items
               WHERE recurring_template_id = $1
                 AND occurs_at > $2
                 AND status NOT IN ('done', 'archived', 'cancelled')"#,
        )
        .bind(template_id)
        .bind(delete_from)
        .execute(&mut *tx)
        .await?;

        for draft in &new_sync_items {
            insert_occurrence_draft_in_transaction(&mut tx, draft).await?;
        }

        advance_generated_through_in_transaction(&mut tx, template_id, sync_end).await?;

        let final_state: RecurringTemplate =
            sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
                .bind(template_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(final_state)
    }
}
