use std::sync::Arc;

use creditserver_common::{day::Clock, Metrics};
use creditserver_db::{params, results::User, Db, DbPool};
use creditserver_settings::Settings;

use super::error::{AuthError, AuthResult};
use super::policy::{self, CreditState};

/// Login and balance queries.
///
/// `login` runs a locked read-modify-write on the user row; concurrent calls
/// for the same login serialize on the row lock. `get_remaining_credits` is
/// lock-free and never writes.
pub struct AuthService {
    pool: Box<dyn DbPool>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    default_credits: i32,
}

impl AuthService {
    pub fn new(
        settings: &Settings,
        pool: Box<dyn DbPool>,
        clock: Arc<dyn Clock>,
        metrics: &Metrics,
    ) -> Self {
        Self {
            pool,
            clock,
            metrics: metrics.clone(),
            default_credits: settings.default_credits,
        }
    }

    /// Create the user on first login, otherwise refresh their quota per the
    /// login rules. The caller-supplied `uid` is recorded either way.
    pub async fn login(&self, uid: &str, login: &str) -> AuthResult<User> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("auth.login", None);

        let mut db = self.pool.get().await?;
        db.begin(true).await?;
        match self.login_locked(&mut *db, uid, login).await {
            Ok(user) => {
                db.commit().await?;
                Ok(user)
            }
            Err(e) => {
                db.rollback().await?;
                Err(e)
            }
        }
    }

    async fn login_locked(&self, db: &mut dyn Db, uid: &str, login: &str) -> AuthResult<User> {
        let today = self.clock.today();
        let existing = db
            .get_user_by_login(params::GetUserByLogin {
                login: login.to_owned(),
                lock: true,
            })
            .await?;

        let id = match existing {
            None => {
                info!("Creating user"; "login" => login);
                self.metrics.incr("auth.login.create");
                db.post_user(params::PostUser {
                    uid: uid.to_owned(),
                    login: login.to_owned(),
                    admin: 0,
                    whitelisted: 0,
                    credits: self.default_credits,
                    lastseen: today,
                    comment: String::new(),
                })
                .await?
                .id
            }
            Some(user) => {
                self.metrics.incr("auth.login.update");
                let state = CreditState::from(&user);
                let next =
                    policy::login_refresh(&state, today, self.default_credits).unwrap_or(state);
                db.put_user(params::PutUser {
                    id: user.id,
                    uid: uid.to_owned(),
                    admin: user.admin,
                    whitelisted: user.whitelisted,
                    credits: next.credits,
                    lastseen: next.lastseen,
                    comment: user.comment,
                })
                .await?;
                user.id
            }
        };

        db.get_user_by_id(params::GetUserById { id })
            .await?
            .ok_or_else(|| AuthError::internal(format!("User row missing after save: {login}")))
    }

    /// The balance the user would have if they consumed right now. Reads
    /// only; the day-boundary refresh is left to the next mutating call.
    /// An unknown login reports the full default allotment.
    pub async fn get_remaining_credits(&self, login: &str) -> AuthResult<i32> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("auth.get_remaining_credits", None);

        let mut db = self.pool.get().await?;
        let user = db
            .get_user_by_login(params::GetUserByLogin {
                login: login.to_owned(),
                lock: false,
            })
            .await?;

        Ok(match user {
            Some(user) => policy::effective_credits(
                &CreditState::from(&user),
                self.clock.today(),
                self.default_credits,
            ),
            None => self.default_credits,
        })
    }
}
