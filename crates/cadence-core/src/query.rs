//! Whitelisted filter/ordering grammar for the exception-aware read path.
//!
//! `ItemsFilter` is only ever built through [`ItemsFilter::parse_order_by`]
//! / the builder methods below — there is no code path that accepts a raw
//! `order_by` string straight from a caller and feeds it into SQL. The
//! repository layer additionally binds every value as a parameter, so even
//! a caller that bypassed the factory could not inject SQL.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{ItemStatus, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    DueAt,
    Priority,
    CreatedAt,
    UpdatedAt,
    OccursAt,
}

impl OrderField {
    const WHITELIST: [(&'static str, OrderField); 5] = [
        ("due_at", OrderField::DueAt),
        ("priority", OrderField::Priority),
        ("created_at", OrderField::CreatedAt),
        ("updated_at", OrderField::UpdatedAt),
        ("occurs_at", OrderField::OccursAt),
    ];

    pub fn as_str(self) -> &'static str {
        Self::WHITELIST
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(s, _)| *s)
            .expect("every OrderField variant is in WHITELIST")
    }

    /// The column (or expression) this field maps to, unqualified.
    pub(crate) fn sql_column(self) -> &'static str {
        match self {
            OrderField::DueAt => "due_at",
            OrderField::Priority => "priority_weight",
            OrderField::CreatedAt => "created_at",
            OrderField::UpdatedAt => "updated_at",
            OrderField::OccursAt => "occurs_at",
        }
    }
}

impl FromStr for OrderField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::WHITELIST
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, f)| *f)
            .ok_or_else(|| CoreError::InvalidOrderBy(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }
}

impl FromStr for OrderDirection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(OrderDirection::Asc),
            "desc" => Ok(OrderDirection::Desc),
            other => Err(CoreError::InvalidOrderBy(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: OrderField,
    pub direction: OrderDirection,
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy {
            field: OrderField::CreatedAt,
            direction: OrderDirection::Asc,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field.as_str(), self.direction.as_str())
    }
}

impl FromStr for OrderBy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidOrderBy(s.to_string()))?;
        Ok(OrderBy {
            field: field.parse()?,
            direction: direction.parse()?,
        })
    }
}

/// Validated parameters for `FindItems`. Only constructible through
/// [`ItemsFilter::new`]/the `with_*` builders, never by hand-assembling a
/// struct literal elsewhere in the crate.
#[derive(Debug, Clone)]
pub struct ItemsFilter {
    pub list_id: Uuid,
    pub statuses: Option<Vec<ItemStatus>>,
    pub priorities: Option<Vec<Priority>>,
    pub tags_all: Vec<String>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub occurs_after: Option<DateTime<Utc>>,
    pub occurs_before: Option<DateTime<Utc>>,
    pub order_by: OrderBy,
    pub limit: i64,
    pub offset: i64,
}

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

impl ItemsFilter {
    pub fn new(list_id: Uuid) -> Self {
        Self {
            list_id,
            statuses: None,
            priorities: None,
            tags_all: Vec::new(),
            due_after: None,
            due_before: None,
            occurs_after: None,
            occurs_before: None,
            order_by: OrderBy::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn with_order_by(mut self, order_by: &str) -> Result<Self, CoreError> {
        self.order_by = order_by.parse()?;
        Ok(self)
    }

    pub fn with_statuses(mut self, statuses: Vec<ItemStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_priorities(mut self, priorities: Vec<Priority>) -> Self {
        self.priorities = Some(priorities);
        self
    }

    pub fn with_tags_all(mut self, tags: Vec<String>) -> Self {
        self.tags_all = tags;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Result<Self, CoreError> {
        if limit < 1 || limit > MAX_LIMIT {
            return Err(CoreError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        self.limit = limit;
        Ok(self)
    }

    pub fn with_offset(mut self, offset: i64) -> Result<Self, CoreError> {
        if offset < 0 {
            return Err(CoreError::InvalidArgument(
                "offset must be non-negative".to_string(),
            ));
        }
        self.offset = offset;
        Ok(self)
    }
}

/// Parsed result of `FindItems`: the page of items plus pagination
/// metadata computed with the `limit+1` probe pattern.
#[derive(Debug, Clone)]
pub struct ItemsPage<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_by_round_trips() {
        for field in ["due_at", "priority", "created_at", "updated_at", "occurs_at"] {
            for dir in ["asc", "desc"] {
                let s = format!("{field}:{dir}");
                let parsed: OrderBy = s.parse().unwrap();
                assert_eq!(parsed.to_string(), s);
            }
        }
    }

    #[test]
    fn rejects_non_whitelisted_field() {
        let err = "secret_column:asc".parse::<OrderBy>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidOrderBy(_)));
    }

    #[test]
    fn rejects_sql_injection_attempt_as_order_by() {
        let err = "due_at; DROP TABLE items;--:asc"
            .parse::<OrderBy>()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOrderBy(_)));
    }
}
