//! Recurring task generation engine.
//!
//! Three layers compose the core: a pure [`recurrence`] expander, a
//! transactional [`repository`] layer (including the [`JobCoordinator`]),
//! and the [`worker`]/[`scheduler`]/[`service`] modules that drive them.

pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod recurrence;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod worker;

pub use db::{establish_connection, DbPool};
pub use error::{CoreError, Result};
pub use repository::{Repository, SqliteRepository};
pub use service::{OperationContext, Service, ServiceConfig};
