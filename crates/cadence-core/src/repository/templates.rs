use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{NewTemplateData, RecurringTemplate, SeriesStatistics, UpdateTemplateParams};
use crate::repository::SqliteRepository;

#[async_trait]
impl super::TemplateRepository for SqliteRepository {
    async fn create_template(&self, data: NewTemplateData) -> Result<RecurringTemplate, CoreError> {
        let now = Utc::now();
        let template = RecurringTemplate {
            id: Uuid::now_v7(),
            list_id: data.list_id,
            title: data.title,
            recurrence_pattern: data.recurrence_pattern,
            recurrence_config: data.recurrence_config.to_string(),
            due_offset_secs: data.due_offset_secs,
            timezone: data.timezone,
            sync_horizon_days: data.sync_horizon_days,
            generation_horizon_days: data.generation_horizon_days,
            generated_through: now,
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
        .bind(template.id)
        .bind(template.list_id)
        .bind(&template.title)
        .bind(template.recurrence_pattern)
        .bind(&template.recurrence_config)
        .bind(template.due_offset_secs)
        .bind(&template.timezone)
        .bind(template.sync_horizon_days)
        .bind(template.generation_horizon_days)
        .bind(template.generated_through)
        .bind(template.is_active)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(self.pool())
        .await?;

        Ok(template)
    }

    async fn get_template(&self, list_id: Uuid, id: Uuid) -> Result<RecurringTemplate, CoreError> {
        sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1 AND list_id = $2")
            .bind(id)
            .bind(list_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::TemplateNotFound(id))
    }

    async fn get_template_by_id(&self, id: Uuid) -> Result<RecurringTemplate, CoreError> {
        sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::TemplateNotFound(id))
    }

    async fn update_template(
        &self,
        params: UpdateTemplateParams,
    ) -> Result<RecurringTemplate, CoreError> {
        let mut tx = self.pool().begin().await?;
        let updated = update_template_in_transaction(&mut tx, params).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_template(&self, list_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE recurring_templates SET is_active = 0 WHERE id = $1 AND list_id = $2",
        )
        .bind(id)
        .bind(list_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::TemplateNotFound(id));
        }

        // Future undone instances owned by the template are hard-deleted;
        // past/completed instances are preserved.
        sqlx::query(
            r#"DELETE FROM items
               WHERE recurring_template_id = $1
                 AND occurs_at > $2
                 AND status NOT IN ('done', 'archived', 'cancelled')"#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_active_templates_needing_generation(
        &self,
        now: DateTime<Utc>,
        async_horizon_days: i64,
    ) -> Result<Vec<RecurringTemplate>, CoreError> {
        let horizon = now + chrono::Duration::days(async_horizon_days);
        let templates = sqlx::query_as(
            "SELECT * FROM recurring_templates WHERE is_active = 1 AND generated_through < $1",
        )
        .bind(horizon)
        .fetch_all(self.pool())
        .await?;
        Ok(templates)
    }

    async fn series_statistics(&self, template_id: Uuid) -> Result<SeriesStatistics, CoreError> {
        let template: RecurringTemplate =
            sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
                .bind(template_id)
                .fetch_optional(self.pool())
                .await?
                .ok_or(CoreError::TemplateNotFound(template_id))?;

        let materialized_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE recurring_template_id = $1")
                .bind(template_id)
                .fetch_one(self.pool())
                .await?;

        let undone_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE recurring_template_id = $1 AND status NOT IN ('done', 'archived', 'cancelled')",
        )
        .bind(template_id)
        .fetch_one(self.pool())
        .await?;

        Ok(SeriesStatistics {
            template_id,
            materialized_count,
            undone_count,
            generated_through: template.generated_through,
        })
    }

    async fn advance_generated_through(
        &self,
        template_id: Uuid,
        through: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        advance_generated_through_in_transaction(&mut tx, template_id, through).await?;
        tx.commit().await?;
        Ok(())
    }
}

pub(crate) async fn advance_generated_through_in_transaction<'a>(
    tx: &mut sqlx::Transaction<'a, Sqlite>,
    template_id: Uuid,
    through: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE recurring_templates SET generated_through = $1 WHERE id = $2")
        .bind(through)
        .bind(template_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) async fn update_template_in_transaction<'a>(
    tx: &mut sqlx::Transaction<'a, Sqlite>,
    params: UpdateTemplateParams,
) -> Result<RecurringTemplate, CoreError> {
    let _current: RecurringTemplate =
        sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1 AND list_id = $2")
            .bind(params.template_id)
            .bind(params.list_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(CoreError::TemplateNotFound(params.template_id))?;

    let data = params.data;
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE recurring_templates SET ");
    let mut set_any = false;

    macro_rules! set_field {
        ($col:literal, $value:expr) => {{
            if set_any {
                qb.push(", ");
            }
            qb.push(concat!($col, " = "));
            qb.push_bind($value);
            set_any = true;
        }};
    }

    if let Some(title) = &data.title {
        set_field!("title", title.clone());
    }
    if let Some(pattern) = data.recurrence_pattern {
        set_field!("recurrence_pattern", pattern);
    }
    if let Some(config) = &data.recurrence_config {
        set_field!("recurrence_config", config.to_string());
    }
    if let Some(due_offset) = data.due_offset_secs {
        set_field!("due_offset_secs", due_offset);
    }
    if let Some(timezone) = &data.timezone {
        set_field!("timezone", timezone.clone());
    }
    if let Some(sync_days) = data.sync_horizon_days {
        set_field!("sync_horizon_days", sync_days);
    }
    if let Some(gen_days) = data.generation_horizon_days {
        set_field!("generation_horizon_days", gen_days);
    }
    if let Some(is_active) = data.is_active {
        set_field!("is_active", is_active);
    }

    if !set_any {
        return sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
            .bind(params.template_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(CoreError::from);
    }

    qb.push(" WHERE id = ");
    qb.push_bind(params.template_id);
    qb.build().execute(&mut **tx).await?;

    let updated = sqlx::query_as("SELECT * FROM recurring_templates WHERE id = $1")
        .bind(params.template_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(updated)
}
