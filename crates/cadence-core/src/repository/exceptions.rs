use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{NewExceptionData, RecurringTemplateException};
use crate::repository::SqliteRepository;

#[async_trait]
impl super::ExceptionRepository for SqliteRepository {
    async fn add_exception(
        &self,
        data: NewExceptionData,
    ) -> Result<RecurringTemplateException, CoreError> {
        let mut tx = self.pool().begin().await?;
        let exception = add_exception_in_transaction(&mut tx, data).await?;
        tx.commit().await?;
        Ok(exception)
    }

    async fn find_exceptions(
        &self,
        template_id: Uuid,
    ) -> Result<Vec<RecurringTemplateException>, CoreError> {
        let exceptions = sqlx::query_as(
            "SELECT * FROM recurring_template_exceptions WHERE template_id = $1 ORDER BY occurs_at",
        )
        .bind(template_id)
        .fetch_all(self.pool())
        .await?;
        Ok(exceptions)
    }

    async fn find_exceptions_in_window(
        &self,
        template_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RecurringTemplateException>, CoreError> {
        let exceptions = sqlx::query_as(
            r#"SELECT * FROM recurring_template_exceptions
               WHERE template_id = $1 AND occurs_at >= $2 AND occurs_at <= $3
               ORDER BY occurs_at"#,
        )
        .bind(template_id)
        .bind(from)
        .bind(until)
        .fetch_all(self.pool())
        .await?;
        Ok(exceptions)
    }

    async fn find_exception_by_occurrence(
        &self,
        template_id: Uuid,
        occurs_at: DateTime<Utc>,
    ) -> Result<Option<RecurringTemplateException>, CoreError> {
        let exception = sqlx::query_as(
            "SELECT * FROM recurring_template_exceptions WHERE template_id = $1 AND occurs_at = $2",
        )
        .bind(template_id)
        .bind(occurs_at)
        .fetch_optional(self.pool())
        .await?;
        Ok(exception)
    }
}

/// Inserts an exception within an existing transaction. A second attempt at
/// the same `(template_id, occurs_at)` surfaces `ExceptionAlreadyExists`
/// rather than a raw constraint violation.
pub(crate) async fn add_exception_in_transaction<'a>(
    tx: &mut Transaction<'a, Sqlite>,
    data: NewExceptionData,
) -> Result<RecurringTemplateException, CoreError> {
    let existing: Option<RecurringTemplateException> = sqlx::query_as(
        "SELECT * FROM recurring_template_exceptions WHERE template_id = $1 AND occurs_at = $2",
    )
    .bind(data.template_id)
    .bind(data.occurs_at)
    .fetch_optional(&mut **tx)
    .await?;

    if existing.is_some() {
        return Err(CoreError::ExceptionAlreadyExists {
            template_id: data.template_id,
            occurs_at: data.occurs_at,
        });
    }

    let exception = RecurringTemplateException {
        id: Uuid::now_v7(),
        template_id: data.template_id,
        occurs_at: data.occurs_at,
        exception_type: data.exception_type,
        item_id: data.item_id,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"INSERT INTO recurring_template_exceptions
           (id, template_id, occurs_at, exception_type, item_id, created_at)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(exception.id)
    .bind(exception.template_id)
    .bind(exception.occurs_at)
    .bind(exception.exception_type)
    .bind(exception.item_id)
    .bind(exception.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(exception)
}
