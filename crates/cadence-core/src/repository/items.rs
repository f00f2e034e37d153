use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{encode_tags, Item, ItemStatus, NewItemData, OccurrenceDraft, UpdateItemParams};
use crate::query::{ItemsFilter, ItemsPage, OrderDirection};
use crate::repository::SqliteRepository;

fn push_where_clause(
    qb: &mut QueryBuilder<Sqlite>,
    filter: &ItemsFilter,
    statuses_to_exclude: Option<&[ItemStatus]>,
) {
    qb.push(" WHERE list_id = ");
    qb.push_bind(filter.list_id);

    match &filter.statuses {
        Some(statuses) => {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in statuses {
                separated.push_bind(*status);
            }
            separated.push_unseparated(")");
        }
        None => {
            let excluded = statuses_to_exclude
                .unwrap_or(&[ItemStatus::Archived, ItemStatus::Cancelled]);
            if !excluded.is_empty() {
                qb.push(" AND status NOT IN (");
                let mut separated = qb.separated(", ");
                for status in excluded {
                    separated.push_bind(*status);
                }
                separated.push_unseparated(")");
            }
        }
    }

    if let Some(priorities) = &filter.priorities {
        qb.push(" AND priority IN (");
        let mut separated = qb.separated(", ");
        for priority in priorities {
            separated.push_bind(*priority);
        }
        separated.push_unseparated(")");
    }

    for tag in &filter.tags_all {
        qb.push(" AND tags LIKE ");
        qb.push_bind(format!("%\"{tag}\"%"));
    }

    if let Some(due_after) = filter.due_after {
        qb.push(" AND due_at > ");
        qb.push_bind(due_after);
    }
    if let Some(due_before) = filter.due_before {
        qb.push(" AND due_at < ");
        qb.push_bind(due_before);
    }
    if let Some(occurs_after) = filter.occurs_after {
        qb.push(" AND occurs_at > ");
        qb.push_bind(occurs_after);
    }
    if let Some(occurs_before) = filter.occurs_before {
        qb.push(" AND occurs_at < ");
        qb.push_bind(occurs_before);
    }

    // Deleted exceptions hide their instance from every read.
    qb.push(
        " AND NOT (recurring_template_id IS NOT NULL AND occurs_at IS NOT NULL AND EXISTS (\
            SELECT 1 FROM recurring_template_exceptions e \
            WHERE e.template_id = items.recurring_template_id \
              AND e.occurs_at = items.occurs_at \
              AND e.exception_type = 'deleted'\
        ))",
    );
}

#[async_trait]
impl super::ItemRepository for SqliteRepository {
    async fn create_item(&self, data: NewItemData) -> Result<Item, CoreError> {
        let now = Utc::now();
        let item = Item {
            id: Uuid::now_v7(),
            list_id: data.list_id,
            title: data.title,
            status: data.status.unwrap_or(ItemStatus::Todo),
            priority: data.priority,
            due_at: data.due_at,
            occurs_at: data.occurs_at,
            starts_at: data.starts_at,
            estimated_duration_secs: data.estimated_duration_secs,
            actual_duration_secs: None,
            tags: encode_tags(&data.tags),
            timezone: data.timezone,
            recurring_template_id: data.recurring_template_id,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO items (
                id, list_id, title, status, priority, due_at, occurs_at, starts_at,
                estimated_duration_secs, actual_duration_secs, tags, timezone,
                recurring_template_id, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"#,
        )
        .bind(item.id)
        .bind(item.list_id)
        .bind(&item.title)
        .bind(item.status)
        .bind(item.priority)
        .bind(item.due_at)
        .bind(item.occurs_at)
        .bind(item.starts_at)
        .bind(item.estimated_duration_secs)
        .bind(item.actual_duration_secs)
        .bind(&item.tags)
        .bind(&item.timezone)
        .bind(item.recurring_template_id)
        .bind(item.version)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(self.pool())
        .await?;

        Ok(item)
    }

    async fn get_item(&self, list_id: Uuid, id: Uuid) -> Result<Item, CoreError> {
        sqlx::query_as("SELECT * FROM items WHERE id = $1 AND list_id = $2")
            .bind(id)
            .bind(list_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::ItemNotFound(id))
    }

    async fn find_items(
        &self,
        filter: &ItemsFilter,
        statuses_to_exclude: Option<&[ItemStatus]>,
    ) -> Result<ItemsPage<Item>, CoreError> {
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM items");
        push_where_clause(&mut count_qb, filter, statuses_to_exclude);
        let total_count: i64 = count_qb.build_query_scalar().fetch_one(self.pool()).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM items");
        push_where_clause(&mut qb, filter, statuses_to_exclude);

        let direction = match filter.order_by.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };

        if filter.order_by.field.sql_column() == "priority_weight" {
            qb.push(
                " ORDER BY (CASE priority \
                    WHEN 'low' THEN 1 WHEN 'medium' THEN 2 \
                    WHEN 'high' THEN 3 WHEN 'urgent' THEN 4 ELSE NULL END) IS NULL, \
                  (CASE priority \
                    WHEN 'low' THEN 1 WHEN 'medium' THEN 2 \
                    WHEN 'high' THEN 3 WHEN 'urgent' THEN 4 ELSE NULL END) ",
            );
            qb.push(direction);
        } else {
            qb.push(" ORDER BY ");
            qb.push(filter.order_by.field.sql_column());
            qb.push(" ");
            qb.push(direction);
        }

        qb.push(" LIMIT ");
        qb.push_bind(filter.limit + 1);
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset);

        let mut items: Vec<Item> = qb.build_query_as().fetch_all(self.pool()).await?;
        let has_more = items.len() as i64 > filter.limit;
        items.truncate(filter.limit as usize);

        Ok(ItemsPage {
            items,
            total_count,
            has_more,
        })
    }

    async fn update_item(&self, params: UpdateItemParams) -> Result<Item, CoreError> {
        let mut tx = self.pool().begin().await?;
        let updated = update_item_in_transaction(&mut tx, params).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_item(&self, list_id: Uuid, item_id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM items WHERE id = $1 AND list_id = $2")
            .bind(item_id)
            .bind(list_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ItemNotFound(item_id));
        }
        Ok(())
    }

    async fn batch_upsert_occurrences(&self, drafts: &[OccurrenceDraft]) -> Result<u64, CoreError> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;
        for draft in drafts {
            inserted += insert_occurrence_draft_in_transaction(&mut tx, draft).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

/// Inserts a single occurrence draft within an existing transaction,
/// ignoring a conflict on `(recurring_template_id, occurs_at)` — the
/// uniqueness that makes this safe against a racing on-demand expansion.
/// Returns 1 if a row was inserted, 0 if it was already present.
pub(crate) async fn insert_occurrence_draft_in_transaction<'a>(
    tx: &mut sqlx::Transaction<'a, Sqlite>,
    draft: &OccurrenceDraft,
) -> Result<u64, CoreError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"INSERT OR IGNORE INTO items (
            id, list_id, title, status, priority, due_at, occurs_at, starts_at,
            estimated_duration_secs, actual_duration_secs, tags, timezone,
            recurring_template_id, version, created_at, updated_at
        ) VALUES ($1, $2, $3, 'todo', NULL, $4, $5, $6, NULL, NULL, '[]', $7, $8, 1, $9, $9)"#,
    )
    .bind(draft.id)
    .bind(draft.list_id)
    .bind(&draft.title)
    .bind(draft.due_at)
    .bind(draft.occurs_at)
    .bind(draft.starts_at)
    .bind(&draft.timezone)
    .bind(draft.recurring_template_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Applies a field-masked update within an existing transaction, enforcing
/// list scoping and the optional optimistic-concurrency predicate.
pub(crate) async fn update_item_in_transaction<'a>(
    tx: &mut sqlx::Transaction<'a, Sqlite>,
    params: UpdateItemParams,
) -> Result<Item, CoreError> {
    let current: Item = sqlx::query_as("SELECT * FROM items WHERE id = $1 AND list_id = $2")
        .bind(params.item_id)
        .bind(params.list_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(CoreError::ItemNotFound(params.item_id))?;

    let data = params.data;
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE items SET ");
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
    if let Some(status) = data.status {
        set_field!("status", status);
    }
    if let Some(priority) = data.priority {
        set_field!("priority", priority);
    }
    if let Some(due_at) = data.due_at {
        set_field!("due_at", due_at);
    }
    if let Some(starts_at) = data.starts_at {
        set_field!("starts_at", starts_at);
    }
    if let Some(estimated) = data.estimated_duration_secs {
        set_field!("estimated_duration_secs", estimated);
    }
    if let Some(actual) = data.actual_duration_secs {
        set_field!("actual_duration_secs", actual);
    }
    if let Some(tags) = &data.tags {
        set_field!("tags", encode_tags(tags));
    }
    if let Some(timezone) = &data.timezone {
        set_field!("timezone", timezone.clone());
    }

    if !set_any {
        return Ok(current);
    }

    qb.push(", updated_at = ");
    qb.push_bind(Utc::now());
    qb.push(", version = version + 1 WHERE id = ");
    qb.push_bind(params.item_id);
    qb.push(" AND list_id = ");
    qb.push_bind(params.list_id);

    if let Some(expected_version) = params.expected_version {
        qb.push(" AND version = ");
        qb.push_bind(expected_version);
    }

    let result = qb.build().execute(&mut **tx).await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::VersionConflict(params.item_id));
    }

    let updated: Item = sqlx::query_as("SELECT * FROM items WHERE id = $1")
        .bind(params.item_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(updated)
}
