//! ClickHouse Owl: HTTP backend of a ClickHouse administration console.
//!
//! The [`server`] module exposes the JSON API. Statements reach ClickHouse
//! through the [`gateway`], table and database changes are assembled by
//! [`ddl`] and [`federation`] on top of the [`sql`] builder, and
//! natural-language SQL generation lives in [`ai_sql`].

pub mod ai_sql;
pub mod cli;
pub mod config;
pub mod connections;
pub mod database;
pub mod database_clickhouse;
pub mod ddl;
pub mod error;
pub mod federation;
pub mod gateway;
pub mod logging;
pub mod monitoring;
pub mod password_encryption;
pub mod password_sanitizer;
pub mod schema;
pub mod server;
pub mod session;
pub mod sql;

#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use error::{OwlError, OwlResult};
