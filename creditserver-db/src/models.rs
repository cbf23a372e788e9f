use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use diesel::{
    sql_types::{Bigint, Binary, Integer, Text},
    ExpressionMethods, OptionalExtension, QueryDsl, TextExpressionMethods,
};
use diesel_async::{AsyncConnection, RunQueryDsl, TransactionManager};

use creditserver_common::Metrics;

use super::error::{DbError, DbResult};
use super::pool::Conn;
#[cfg(debug_assertions)]
use super::schema::search_log;
use super::schema::users;
use super::{params, results};

/// Methods available on a checked-out database connection.
///
/// Reads performed with `lock: true` take a `FOR UPDATE` row lock and must
/// happen inside a transaction opened with `begin(true)`; the lock is held
/// until `commit` or `rollback`.
#[async_trait(?Send)]
pub trait Db {
    async fn get_user_by_login(
        &mut self,
        params: params::GetUserByLogin,
    ) -> DbResult<results::GetUserByLogin>;

    async fn get_user_by_id(
        &mut self,
        params: params::GetUserById,
    ) -> DbResult<results::GetUserById>;

    async fn post_user(&mut self, params: params::PostUser) -> DbResult<results::PostUser>;

    async fn put_user(&mut self, params: params::PutUser) -> DbResult<results::PutUser>;

    async fn search_users(&mut self, params: params::SearchUsers)
        -> DbResult<results::SearchUsers>;

    async fn post_log_entry(
        &mut self,
        params: params::PostLogEntry,
    ) -> DbResult<results::PostLogEntry>;

    #[cfg(debug_assertions)]
    async fn get_log_entries(
        &mut self,
        params: params::GetLogEntries,
    ) -> DbResult<results::GetLogEntries>;

    async fn check(&mut self) -> DbResult<results::Check>;

    async fn begin(&mut self, for_write: bool) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;
}

#[derive(Debug, Default)]
struct CreditDbSession {
    /// Whether a transaction was started (begin() called)
    in_transaction: bool,
    in_write_transaction: bool,
}

pub struct CreditDb {
    conn: Conn,
    metrics: Metrics,
    session: CreditDbSession,
    pub timeout: Option<Duration>,
}

/// Bound a db operation by the configured request timeout, when one is set.
async fn run_with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| DbError::request_timeout(duration))?,
        None => fut.await,
    }
}

impl CreditDb {
    // Note that this only works because an instance of `CreditDb` has *exclusive access* to
    // a connection from the pool for its lifetime. `LAST_INSERT_ID()` returns the ID of the
    // most recently-inserted record *for a given connection*. If connections were shared
    // across requests, using this function would introduce a race condition, as we could
    // potentially get IDs from records created during other requests.
    const LAST_INSERT_ID_QUERY: &'static str = "SELECT LAST_INSERT_ID() AS id";

    pub fn new(conn: Conn, metrics: &Metrics, timeout: Option<Duration>) -> Self {
        Self {
            conn,
            metrics: metrics.clone(),
            session: Default::default(),
            timeout,
        }
    }

    async fn get_user_by_login(
        &mut self,
        params: params::GetUserByLogin,
    ) -> DbResult<results::GetUserByLogin> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.get_user_by_login", None);

        let query = users::table.filter(users::login.eq(params.login));
        let user = if params.lock {
            if !self.session.in_write_transaction {
                return Err(DbError::internal(
                    "Can't lock a user row outside a write transaction".to_owned(),
                ));
            }
            query
                .for_update()
                .first::<results::User>(&mut self.conn)
                .await
                .optional()?
        } else {
            query
                .first::<results::User>(&mut self.conn)
                .await
                .optional()?
        };
        Ok(user)
    }

    async fn get_user_by_id(
        &mut self,
        params: params::GetUserById,
    ) -> DbResult<results::GetUserById> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.get_user_by_id", None);

        let user = users::table
            .find(params.id)
            .first::<results::User>(&mut self.conn)
            .await
            .optional()?;
        Ok(user)
    }

    async fn post_user(&mut self, params: params::PostUser) -> DbResult<results::PostUser> {
        const QUERY: &str = r#"
            INSERT INTO users (uid, login, admin, whitelisted, credits, lastseen, comment)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;

        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.post_user", None);

        diesel::sql_query(QUERY)
            .bind::<Text, _>(&params.uid)
            .bind::<Text, _>(&params.login)
            .bind::<Integer, _>(params.admin)
            .bind::<Integer, _>(params.whitelisted)
            .bind::<Integer, _>(params.credits)
            .bind::<Integer, _>(params.lastseen)
            .bind::<Text, _>(&params.comment)
            .execute(&mut self.conn)
            .await?;

        let result = diesel::sql_query(Self::LAST_INSERT_ID_QUERY)
            .get_result::<results::PostUser>(&mut self.conn)
            .await?;
        Ok(result)
    }

    /// Full-row update keyed on the immutable numeric id. The login column is
    /// never touched.
    async fn put_user(&mut self, params: params::PutUser) -> DbResult<results::PutUser> {
        const QUERY: &str = r#"
            UPDATE users
               SET uid = ?,
                   admin = ?,
                   whitelisted = ?,
                   credits = ?,
                   lastseen = ?,
                   comment = ?
             WHERE id = ?
        "#;

        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.put_user", None);

        diesel::sql_query(QUERY)
            .bind::<Text, _>(&params.uid)
            .bind::<Integer, _>(params.admin)
            .bind::<Integer, _>(params.whitelisted)
            .bind::<Integer, _>(params.credits)
            .bind::<Integer, _>(params.lastseen)
            .bind::<Text, _>(&params.comment)
            .bind::<Bigint, _>(params.id)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn search_users(
        &mut self,
        params: params::SearchUsers,
    ) -> DbResult<results::SearchUsers> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.search_users", None);

        let mut query = users::table.order(users::id.asc()).into_boxed();
        if let Some(pattern) = params.login_like {
            query = query.filter(users::login.like(format!("%{pattern}%")));
        }
        let result = query
            .limit(params.limit as i64)
            .offset(params.offset as i64)
            .load::<results::User>(&mut self.conn)
            .await?;
        Ok(result)
    }

    async fn post_log_entry(
        &mut self,
        params: params::PostLogEntry,
    ) -> DbResult<results::PostLogEntry> {
        const QUERY: &str = r#"
            INSERT INTO search_log (login, guid, ip, dt, misc)
            VALUES (?, ?, ?, ?, ?)
        "#;

        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.post_log_entry", None);

        diesel::sql_query(QUERY)
            .bind::<Text, _>(&params.login)
            .bind::<Binary, _>(&params.guid)
            .bind::<Binary, _>(&params.ip)
            .bind::<Bigint, _>(params.dt)
            .bind::<Text, _>(&params.misc)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    #[cfg(debug_assertions)]
    async fn get_log_entries(
        &mut self,
        params: params::GetLogEntries,
    ) -> DbResult<results::GetLogEntries> {
        let result = search_log::table
            .filter(search_log::login.eq(params.login))
            .order(search_log::id.asc())
            .load::<results::LogEntry>(&mut self.conn)
            .await?;
        Ok(result)
    }

    async fn check(&mut self) -> DbResult<results::Check> {
        diesel::sql_query("SELECT 1").execute(&mut self.conn).await?;
        Ok(true)
    }

    pub(super) async fn begin(&mut self, for_write: bool) -> DbResult<()> {
        <Conn as AsyncConnection>::TransactionManager::begin_transaction(&mut self.conn).await?;
        self.session.in_transaction = true;
        if for_write {
            self.session.in_write_transaction = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.session.in_transaction {
            <Conn as AsyncConnection>::TransactionManager::commit_transaction(&mut self.conn)
                .await?;
            self.session = Default::default();
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.session.in_transaction {
            <Conn as AsyncConnection>::TransactionManager::rollback_transaction(&mut self.conn)
                .await?;
            self.session = Default::default();
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Db for CreditDb {
    async fn get_user_by_login(
        &mut self,
        params: params::GetUserByLogin,
    ) -> DbResult<results::GetUserByLogin> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::get_user_by_login(self, params)).await
    }

    async fn get_user_by_id(
        &mut self,
        params: params::GetUserById,
    ) -> DbResult<results::GetUserById> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::get_user_by_id(self, params)).await
    }

    async fn post_user(&mut self, params: params::PostUser) -> DbResult<results::PostUser> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::post_user(self, params)).await
    }

    async fn put_user(&mut self, params: params::PutUser) -> DbResult<results::PutUser> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::put_user(self, params)).await
    }

    async fn search_users(
        &mut self,
        params: params::SearchUsers,
    ) -> DbResult<results::SearchUsers> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::search_users(self, params)).await
    }

    async fn post_log_entry(
        &mut self,
        params: params::PostLogEntry,
    ) -> DbResult<results::PostLogEntry> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::post_log_entry(self, params)).await
    }

    #[cfg(debug_assertions)]
    async fn get_log_entries(
        &mut self,
        params: params::GetLogEntries,
    ) -> DbResult<results::GetLogEntries> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::get_log_entries(self, params)).await
    }

    async fn check(&mut self) -> DbResult<results::Check> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::check(self)).await
    }

    async fn begin(&mut self, for_write: bool) -> DbResult<()> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::begin(self, for_write)).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::commit(self)).await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let timeout = self.timeout;
        run_with_timeout(timeout, CreditDb::rollback(self)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use creditserver_common::ReportableError;

    #[tokio::test]
    async fn request_timeout_cuts_off_a_stalled_operation() {
        let err = run_with_timeout::<(), _>(
            Some(Duration::from_millis(5)),
            std::future::pending(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.metric_label(), Some("storage.request.timeout"));
        assert!(!err.is_sentry_event());
    }

    #[tokio::test]
    async fn no_timeout_configured_runs_to_completion() {
        let value = run_with_timeout(None, async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
