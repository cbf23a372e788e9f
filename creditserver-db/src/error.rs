use std::fmt;
use std::time::Duration;

use backtrace::Backtrace;
use http::StatusCode;
use creditserver_common::{from_error, impl_fmt_display, InternalError, ReportableError};
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// An error type that represents any database-related errors that may occur
/// while processing a request.
#[derive(Debug)]
pub struct DbError {
    kind: DbErrorKind,
    pub status: StatusCode,
    pub backtrace: Box<Backtrace>,
}

impl DbError {
    pub fn internal(msg: String) -> Self {
        DbErrorKind::Internal(msg).into()
    }

    pub fn migration(msg: String) -> Self {
        DbErrorKind::Migration(msg).into()
    }

    pub fn pool_timeout(timeout_type: deadpool::managed::TimeoutType) -> Self {
        DbErrorKind::PoolTimeout(timeout_type).into()
    }

    pub fn request_timeout(duration: Duration) -> Self {
        DbErrorKind::RequestTimeout(duration).into()
    }
}

#[derive(Debug, Error)]
enum DbErrorKind {
    #[error("A database error occurred: {}", _0)]
    DieselQuery(diesel::result::Error),

    #[error("An error occurred while establishing a db connection: {}", _0)]
    DieselConnection(diesel::result::ConnectionError),

    #[error("Error migrating the database: {}", _0)]
    Migration(String),

    #[error("A database pool timeout occurred, type: {:?}", _0)]
    PoolTimeout(deadpool::managed::TimeoutType),

    #[error("The database request timed out after {:?}", _0)]
    RequestTimeout(Duration),

    #[error("Unexpected error: {}", _0)]
    Internal(String),
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        Self {
            kind,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

impl ReportableError for DbError {
    fn backtrace(&self) -> Option<&Backtrace> {
        Some(&self.backtrace)
    }

    fn is_sentry_event(&self) -> bool {
        !matches!(
            self.kind,
            DbErrorKind::PoolTimeout(_) | DbErrorKind::RequestTimeout(_)
        )
    }

    fn metric_label(&self) -> Option<&str> {
        match self.kind {
            DbErrorKind::PoolTimeout(_) => Some("storage.pool.timeout"),
            DbErrorKind::RequestTimeout(_) => Some("storage.request.timeout"),
            _ => None,
        }
    }
}

impl InternalError for DbError {
    fn internal_error(message: String) -> Self {
        DbErrorKind::Internal(message).into()
    }
}

impl_fmt_display!(DbError, DbErrorKind);

from_error!(diesel::result::Error, DbError, DbErrorKind::DieselQuery);
from_error!(
    diesel::result::ConnectionError,
    DbError,
    DbErrorKind::DieselConnection
);

impl From<deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>> for DbError {
    fn from(pe: deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>) -> Self {
        match pe {
            deadpool::managed::PoolError::Backend(be) => match be {
                diesel_async::pooled_connection::PoolError::ConnectionError(ce) => ce.into(),
                diesel_async::pooled_connection::PoolError::QueryError(dbe) => dbe.into(),
            },
            deadpool::managed::PoolError::Timeout(timeout_type) => {
                DbError::pool_timeout(timeout_type)
            }
            _ => DbError::internal(format!("deadpool PoolError: {pe}")),
        }
    }
}
