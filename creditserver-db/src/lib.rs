#[macro_use]
extern crate slog_scope;

pub mod error;
pub mod mock;
mod models;
pub mod params;
mod pool;
pub mod results;
mod schema;
#[cfg(all(test, feature = "db_test"))]
mod tests;

pub use error::{DbError, DbResult};
pub use models::{CreditDb, Db};
pub use pool::{CreditDbPool, DbPool, GetPoolState, PoolState};
