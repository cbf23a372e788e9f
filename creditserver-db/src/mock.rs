//! In-memory db implementation backing service-level tests, with
//! snapshot/restore transaction semantics.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::error::{DbError, DbResult};
use super::models::Db;
use super::pool::{DbPool, GetPoolState, PoolState};
use super::{params, results};

#[derive(Clone, Debug, Default)]
struct MockState {
    users: Vec<results::User>,
    logs: Vec<results::LogEntry>,
    next_user_id: i64,
    next_log_id: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MockDbPool {
    state: Arc<Mutex<MockState>>,
}

impl MockDbPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user row directly, returning its assigned id.
    pub fn seed_user(&self, mut user: results::User) -> i64 {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.next_user_id += 1;
        user.id = state.next_user_id;
        let id = user.id;
        state.users.push(user);
        id
    }

    pub fn user_by_login(&self, login: &str) -> Option<results::User> {
        let state = self.state.lock().expect("mock state poisoned");
        state.users.iter().find(|u| u.login == login).cloned()
    }

    pub fn log_entries(&self, login: &str) -> Vec<results::LogEntry> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .logs
            .iter()
            .filter(|e| e.login == login)
            .cloned()
            .collect()
    }
}

#[async_trait(?Send)]
impl DbPool for MockDbPool {
    async fn get(&self) -> DbResult<Box<dyn Db>> {
        Ok(Box::new(MockDb {
            state: Arc::clone(&self.state),
            snapshot: None,
        }) as Box<dyn Db>)
    }

    fn box_clone(&self) -> Box<dyn DbPool> {
        Box::new(self.clone())
    }
}

impl GetPoolState for MockDbPool {
    fn state(&self) -> PoolState {
        PoolState::default()
    }
}

pub struct MockDb {
    state: Arc<Mutex<MockState>>,
    /// Copy of the state taken at `begin`, restored on `rollback`.
    snapshot: Option<MockState>,
}

#[async_trait(?Send)]
impl Db for MockDb {
    async fn get_user_by_login(
        &mut self,
        params: params::GetUserByLogin,
    ) -> DbResult<results::GetUserByLogin> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state
            .users
            .iter()
            .find(|u| u.login == params.login)
            .cloned())
    }

    async fn get_user_by_id(
        &mut self,
        params: params::GetUserById,
    ) -> DbResult<results::GetUserById> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state.users.iter().find(|u| u.id == params.id).cloned())
    }

    async fn post_user(&mut self, params: params::PostUser) -> DbResult<results::PostUser> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if state.users.iter().any(|u| u.login == params.login) {
            return Err(DbError::internal(format!(
                "duplicate login: {}",
                params.login
            )));
        }
        state.next_user_id += 1;
        let id = state.next_user_id;
        state.users.push(results::User {
            id,
            uid: params.uid,
            login: params.login,
            admin: params.admin,
            whitelisted: params.whitelisted,
            credits: params.credits,
            lastseen: params.lastseen,
            comment: params.comment,
        });
        Ok(results::PostUser { id })
    }

    async fn put_user(&mut self, params: params::PutUser) -> DbResult<results::PutUser> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if let Some(user) = state.users.iter_mut().find(|u| u.id == params.id) {
            user.uid = params.uid;
            user.admin = params.admin;
            user.whitelisted = params.whitelisted;
            user.credits = params.credits;
            user.lastseen = params.lastseen;
            user.comment = params.comment;
        }
        Ok(())
    }

    async fn search_users(
        &mut self,
        params: params::SearchUsers,
    ) -> DbResult<results::SearchUsers> {
        let state = self.state.lock().expect("mock state poisoned");
        let mut matches: Vec<_> = state
            .users
            .iter()
            .filter(|u| match &params.login_like {
                Some(pattern) => u.login.contains(pattern.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        matches.sort_by_key(|u| u.id);
        Ok(matches
            .into_iter()
            .skip(params.offset as usize)
            .take(params.limit as usize)
            .collect())
    }

    async fn post_log_entry(
        &mut self,
        params: params::PostLogEntry,
    ) -> DbResult<results::PostLogEntry> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.next_log_id += 1;
        let id = state.next_log_id;
        state.logs.push(results::LogEntry {
            id,
            login: params.login,
            guid: params.guid,
            ip: params.ip,
            dt: params.dt,
            misc: params.misc,
        });
        Ok(())
    }

    #[cfg(debug_assertions)]
    async fn get_log_entries(
        &mut self,
        params: params::GetLogEntries,
    ) -> DbResult<results::GetLogEntries> {
        let state = self.state.lock().expect("mock state poisoned");
        Ok(state
            .logs
            .iter()
            .filter(|e| e.login == params.login)
            .cloned()
            .collect())
    }

    async fn check(&mut self) -> DbResult<results::Check> {
        Ok(true)
    }

    async fn begin(&mut self, _for_write: bool) -> DbResult<()> {
        let state = self.state.lock().expect("mock state poisoned");
        self.snapshot = Some(state.clone());
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            let mut state = self.state.lock().expect("mock state poisoned");
            *state = snapshot;
        }
        Ok(())
    }
}
