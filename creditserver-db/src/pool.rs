use std::time::Duration;

use async_trait::async_trait;
use diesel::{mysql::MysqlConnection, Connection};
use diesel_async::pooled_connection::{deadpool, AsyncDieselConnectionManager};
use diesel_async::AsyncMysqlConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use creditserver_common::Metrics;
use creditserver_settings::Settings;

use super::error::{DbError, DbResult};
use super::models::{CreditDb, Db};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub(crate) type Conn = deadpool::Object<AsyncMysqlConnection>;

/// Run the diesel embedded migrations
///
/// Mysql DDL statements implicitly commit which could disrupt the pool's
/// begin_test_transaction during tests. So this runs on its own separate conn.
fn run_embedded_migrations(database_url: &str) -> DbResult<()> {
    let mut conn = MysqlConnection::establish(database_url)?;

    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DbError::migration(e.to_string()))?;

    Ok(())
}

#[derive(Clone)]
pub struct CreditDbPool {
    /// Pool of db connections
    inner: deadpool::Pool<AsyncMysqlConnection>,
    metrics: Metrics,
    pub timeout: Option<Duration>,
}

impl CreditDbPool {
    pub fn new(settings: &Settings, metrics: &Metrics) -> DbResult<Self> {
        if settings.run_migrations {
            info!("Running database migrations");
            run_embedded_migrations(&settings.database_url)?;
        }

        let wait = settings
            .database_pool_connection_timeout
            .map(|seconds| Duration::from_secs(seconds as u64));
        let timeouts = ::deadpool::managed::Timeouts {
            wait,
            ..Default::default()
        };
        let config = ::deadpool::managed::PoolConfig {
            max_size: settings.database_pool_max_size as usize,
            timeouts,
            // Prefer LIFO so idle connections age out instead of being
            // cycled through.
            queue_mode: ::deadpool::managed::QueueMode::Lifo,
        };

        let manager =
            AsyncDieselConnectionManager::<AsyncMysqlConnection>::new(&settings.database_url);
        let mut builder = deadpool::Pool::builder(manager)
            .config(config)
            .runtime(::deadpool::Runtime::Tokio1);

        if settings.database_use_test_transactions {
            builder = builder.post_create(::deadpool::managed::Hook::async_fn(
                |conn: &mut AsyncMysqlConnection, _metrics: &::deadpool::managed::Metrics| {
                    use diesel_async::AsyncConnection;
                    Box::pin(async {
                        conn.begin_test_transaction().await.map_err(|e| {
                            deadpool::HookError::Backend(
                                diesel_async::pooled_connection::PoolError::QueryError(e),
                            )
                        })
                    })
                },
            ));
        }

        let pool = builder
            .build()
            .map_err(|e| DbError::internal(format!("Couldn't build db pool: {e}")))?;

        let timeout = settings
            .database_request_timeout
            .map(|v| Duration::from_secs(v as u64));

        Ok(Self {
            inner: pool,
            metrics: metrics.clone(),
            timeout,
        })
    }

    pub async fn get_credit_db(&self) -> DbResult<CreditDb> {
        let conn = self.inner.get().await?;

        Ok(CreditDb::new(conn, &self.metrics, self.timeout))
    }
}

#[async_trait(?Send)]
impl DbPool for CreditDbPool {
    async fn get(&self) -> DbResult<Box<dyn Db>> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("storage.get_pool", None);

        Ok(Box::new(self.get_credit_db().await?) as Box<dyn Db>)
    }

    fn box_clone(&self) -> Box<dyn DbPool> {
        Box::new(self.clone())
    }
}

#[async_trait(?Send)]
pub trait DbPool: Sync + Send + GetPoolState {
    async fn get(&self) -> DbResult<Box<dyn Db>>;

    fn box_clone(&self) -> Box<dyn DbPool>;
}

/// A trait to be implemented by database pool data structures. It provides an
/// interface to derive the current state of the pool, as represented by the
/// `PoolState` struct.
pub trait GetPoolState {
    fn state(&self) -> PoolState;
}

#[derive(Debug, Default)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

impl From<::deadpool::Status> for PoolState {
    fn from(status: ::deadpool::Status) -> PoolState {
        PoolState {
            connections: status.size as u32,
            idle_connections: status.available.max(0) as u32,
        }
    }
}

impl GetPoolState for CreditDbPool {
    fn state(&self) -> PoolState {
        self.inner.status().into()
    }
}

impl GetPoolState for Box<dyn DbPool> {
    fn state(&self) -> PoolState {
        (**self).state()
    }
}

impl Clone for Box<dyn DbPool> {
    fn clone(&self) -> Box<dyn DbPool> {
        self.box_clone()
    }
}
