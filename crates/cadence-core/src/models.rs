//! Core entities and their data-transfer objects.
//!
//! Field-masked updates: a plain `Option<T>` means
//! "update this field if present, leave it untouched if absent"; a field
//! that can also be cleared to `NULL` uses `Option<Option<T>>`, where
//! `None` = untouched, `Some(None)` = clear, `Some(Some(v))` = set to `v`.
//! Never conflate "absent" with "present but null".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ItemStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Archived,
    Cancelled,
}

impl ItemStatus {
    /// Statuses excluded from "undone" counts and the default read filter.
    pub fn is_undone(self) -> bool {
        !matches!(self, ItemStatus::Done | ItemStatus::Archived | ItemStatus::Cancelled)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("invalid item status: {0}")]
pub struct ParseItemStatusError(String);

impl FromStr for ItemStatus {
    type Err = ParseItemStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(ItemStatus::Todo),
            "in_progress" => Ok(ItemStatus::InProgress),
            "blocked" => Ok(ItemStatus::Blocked),
            "done" => Ok(ItemStatus::Done),
            "archived" => Ok(ItemStatus::Archived),
            "cancelled" => Ok(ItemStatus::Cancelled),
            _ => Err(ParseItemStatusError(s.to_string())),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Todo => "todo",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Blocked => "blocked",
            ItemStatus::Done => "done",
            ItemStatus::Archived => "archived",
            ItemStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Semantic ordering weight used by the SQL ORDER BY expression —
    /// never compare priorities lexically.
    pub fn weight(self) -> i64 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("invalid priority: {0}")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Weekdays,
    Monthly,
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Weekdays => "weekdays",
            RecurrencePattern::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ExceptionType {
    Deleted,
    Edited,
    Rescheduled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Discarded,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    /// Statuses counted by the no-duplicate-active-job invariant.
    pub const ACTIVE: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Cancelling,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Discarded | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Discarded => "discarded",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct List {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Derived read-only metadata for a list, computed from its items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSummary {
    pub list: List,
    pub total_items: i64,
    pub undone_items: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub list_id: Uuid,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Option<Priority>,
    pub due_at: Option<DateTime<Utc>>,
    pub occurs_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub estimated_duration_secs: Option<i64>,
    pub actual_duration_secs: Option<i64>,
    /// JSON-encoded array of strings; see [`Item::tags`] for the decoded view.
    pub tags: String,
    pub timezone: Option<String>,
    pub recurring_template_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn tags(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    pub fn is_recurring_instance(&self) -> bool {
        self.recurring_template_id.is_some() && self.occurs_at.is_some()
    }
}

pub fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub list_id: Uuid,
    pub title: String,
    pub recurrence_pattern: RecurrencePattern,
    /// JSON-encoded freeform config; keys read depend on the pattern (see
    /// [`crate::recurrence`]).
    pub recurrence_config: String,
    pub due_offset_secs: Option<i64>,
    pub timezone: Option<String>,
    pub sync_horizon_days: i64,
    pub generation_horizon_days: i64,
    pub generated_through: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringTemplate {
    pub fn config(&self) -> serde_json::Value {
        serde_json::from_str(&self.recurrence_config).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecurringTemplateException {
    pub id: Uuid,
    pub template_id: Uuid,
    pub occurs_at: DateTime<Utc>,
    pub exception_type: ExceptionType,
    pub item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationJob {
    pub id: Uuid,
    pub template_id: Uuid,
    pub generate_from: DateTime<Utc>,
    pub generate_until: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeadLetterJob {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub template_id: Uuid,
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub retry_count: i64,
    pub last_worker_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub from_status: Option<ItemStatus>,
    pub to_status: ItemStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExclusiveRunLease {
    pub run_type: String,
    pub worker_id: String,
    pub lease_until: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct NewListData {
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateListData {
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewItemData {
    pub list_id: Uuid,
    pub title: String,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub due_at: Option<DateTime<Utc>>,
    pub occurs_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub estimated_duration_secs: Option<i64>,
    pub tags: Vec<String>,
    pub timezone: Option<String>,
    pub recurring_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateItemData {
    pub title: Option<String>,
    pub status: Option<ItemStatus>,
    pub priority: Option<Option<Priority>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub starts_at: Option<Option<DateTime<Utc>>>,
    pub estimated_duration_secs: Option<Option<i64>>,
    pub actual_duration_secs: Option<Option<i64>>,
    pub tags: Option<Vec<String>>,
    pub timezone: Option<Option<String>>,
}

impl UpdateItemData {
    /// True if this update touches fields other than `status` alone — used
    /// to decide whether editing a recurring instance should create an
    /// `edited` exception.
    pub fn touches_content(&self) -> bool {
        self.title.is_some()
            || self.priority.is_some()
            || self.due_at.is_some()
            || self.starts_at.is_some()
            || self.estimated_duration_secs.is_some()
            || self.actual_duration_secs.is_some()
            || self.tags.is_some()
            || self.timezone.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateItemParams {
    pub list_id: Uuid,
    pub item_id: Uuid,
    pub data: UpdateItemData,
    /// Optimistic-concurrency token; `None` skips the version check.
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTemplateData {
    pub list_id: Uuid,
    pub title: String,
    pub recurrence_pattern: RecurrencePattern,
    pub recurrence_config: serde_json::Value,
    pub due_offset_secs: Option<i64>,
    pub timezone: Option<String>,
    pub sync_horizon_days: i64,
    pub generation_horizon_days: i64,
}

impl Default for RecurrencePattern {
    fn default() -> Self {
        RecurrencePattern::Daily
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTemplateData {
    pub title: Option<String>,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub recurrence_config: Option<serde_json::Value>,
    pub due_offset_secs: Option<Option<i64>>,
    pub timezone: Option<Option<String>>,
    pub sync_horizon_days: Option<i64>,
    pub generation_horizon_days: Option<i64>,
    pub is_active: Option<bool>,
}

impl UpdateTemplateData {
    /// A pattern/config/timezone change invalidates previously materialized
    /// future occurrences and is the canonical trigger for regeneration.
    pub fn changes_recurrence(&self) -> bool {
        self.recurrence_pattern.is_some()
            || self.recurrence_config.is_some()
            || self.due_offset_secs.is_some()
            || self.timezone.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewExceptionData {
    pub template_id: Uuid,
    pub occurs_at: DateTime<Utc>,
    pub exception_type: ExceptionType,
    pub item_id: Option<Uuid>,
}

/// A single occurrence produced by the recurrence generator, not yet
/// persisted.
#[derive(Debug, Clone)]
pub struct OccurrenceDraft {
    pub id: Uuid,
    pub list_id: Uuid,
    pub title: String,
    pub occurs_at: DateTime<Utc>,
    pub starts_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub recurring_template_id: Uuid,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateTemplateParams {
    pub list_id: Uuid,
    pub template_id: Uuid,
    pub data: UpdateTemplateData,
}

/// Materialized-vs-pending counts for a template (read-only; additive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesStatistics {
    pub template_id: Uuid,
    pub materialized_count: i64,
    pub undone_count: i64,
    pub generated_through: DateTime<Utc>,
}

/// Exponential-backoff envelope for job retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: i64,
    pub base_delay: chrono::Duration,
    pub max_delay: chrono::Duration,
}

/// A job to be inserted by the scheduler or by a composite operation.
#[derive(Debug, Clone)]
pub struct NewJobSpec {
    pub template_id: Uuid,
    pub generate_from: DateTime<Utc>,
    pub generate_until: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
}
