use std::fmt;

use backtrace::Backtrace;
use creditserver_common::{from_error, impl_fmt_display, InternalError, ReportableError};
use creditserver_db::DbError;
use http::StatusCode;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// An error occurring while handling a login or usage-tracking request.
#[derive(Debug)]
pub struct AuthError {
    kind: AuthErrorKind,
    pub status: StatusCode,
    pub backtrace: Box<Backtrace>,
}

impl AuthError {
    pub fn internal(msg: String) -> Self {
        AuthErrorKind::Internal(msg).into()
    }

    pub fn invalid_guid(guid: String) -> Self {
        AuthErrorKind::InvalidGuid(guid).into()
    }
}

#[derive(Debug, Error)]
enum AuthErrorKind {
    #[error("Database error: {}", _0)]
    Database(DbError),

    #[error("Invalid guid: {:?}", _0)]
    InvalidGuid(String),

    #[error("Unexpected error: {}", _0)]
    Internal(String),
}

impl From<AuthErrorKind> for AuthError {
    fn from(kind: AuthErrorKind) -> Self {
        let status = match kind {
            AuthErrorKind::InvalidGuid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            kind,
            status,
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

impl ReportableError for AuthError {
    fn reportable_source(&self) -> Option<&(dyn ReportableError + 'static)> {
        match &self.kind {
            AuthErrorKind::Database(dbe) => Some(dbe),
            _ => None,
        }
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        match &self.kind {
            AuthErrorKind::Database(dbe) => dbe.backtrace(),
            _ => Some(&self.backtrace),
        }
    }

    fn is_sentry_event(&self) -> bool {
        match &self.kind {
            AuthErrorKind::Database(dbe) => dbe.is_sentry_event(),
            AuthErrorKind::InvalidGuid(_) => false,
            AuthErrorKind::Internal(_) => true,
        }
    }

    fn metric_label(&self) -> Option<&str> {
        match &self.kind {
            AuthErrorKind::Database(dbe) => dbe.metric_label(),
            AuthErrorKind::InvalidGuid(_) => Some("auth.invalid_guid"),
            AuthErrorKind::Internal(_) => None,
        }
    }
}

impl InternalError for AuthError {
    fn internal_error(message: String) -> Self {
        AuthErrorKind::Internal(message).into()
    }
}

impl_fmt_display!(AuthError, AuthErrorKind);

from_error!(DbError, AuthError, AuthErrorKind::Database);
