use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{List, ListSummary, NewListData, UpdateListData};
use crate::repository::SqliteRepository;

#[async_trait]
impl super::ListRepository for SqliteRepository {
    async fn create_list(&self, data: NewListData) -> Result<List, CoreError> {
        let list = List {
            id: Uuid::now_v7(),
            title: data.title,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO lists (id, title, created_at) VALUES ($1, $2, $3)")
            .bind(list.id)
            .bind(&list.title)
            .bind(list.created_at)
            .execute(self.pool())
            .await?;

        Ok(list)
    }

    async fn get_list(&self, id: Uuid) -> Result<List, CoreError> {
        sqlx::query_as("SELECT * FROM lists WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::ListNotFound(id))
    }

    async fn list_lists(&self) -> Result<Vec<ListSummary>, CoreError> {
        let lists: Vec<List> = sqlx::query_as("SELECT * FROM lists ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;

        let mut summaries = Vec::with_capacity(lists.len());
        for list in lists {
            let total_items: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE list_id = $1")
                    .bind(list.id)
                    .fetch_one(self.pool())
                    .await?;
            let undone_items: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM items WHERE list_id = $1 AND status NOT IN ('done', 'archived', 'cancelled')",
            )
            .bind(list.id)
            .fetch_one(self.pool())
            .await?;

            summaries.push(ListSummary {
                list,
                total_items,
                undone_items,
            });
        }

        Ok(summaries)
    }

    async fn update_list(&self, id: Uuid, data: UpdateListData) -> Result<List, CoreError> {
        let Some(title) = data.title else {
            return self.get_list(id).await;
        };

        sqlx::query_as("UPDATE lists SET title = $1 WHERE id = $2 RETURNING *")
            .bind(title)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::ListNotFound(id))
    }
}
