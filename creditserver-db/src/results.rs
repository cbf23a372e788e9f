use diesel::{
    sql_types::{Bigint, Binary, Integer, Text},
    Queryable, QueryableByName,
};
use serde::{Deserialize, Serialize};

/// Represents a user record as it is stored in the database.
#[derive(
    Clone, Debug, Default, Deserialize, Eq, PartialEq, Queryable, QueryableByName, Serialize,
)]
pub struct User {
    #[diesel(sql_type = Bigint)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub uid: String,
    #[diesel(sql_type = Text)]
    pub login: String,
    #[diesel(sql_type = Integer)]
    pub admin: i32,
    #[diesel(sql_type = Integer)]
    pub whitelisted: i32,
    #[diesel(sql_type = Integer)]
    pub credits: i32,
    #[diesel(sql_type = Integer)]
    pub lastseen: i32,
    #[diesel(sql_type = Text)]
    pub comment: String,
}

pub type GetUserByLogin = Option<User>;
pub type GetUserById = Option<User>;
pub type SearchUsers = Vec<User>;
pub type PutUser = ();
pub type PostLogEntry = ();
pub type Check = bool;

#[derive(Default, QueryableByName)]
pub struct PostUser {
    #[diesel(sql_type = Bigint)]
    pub id: i64,
}

/// An append-only usage log row.
#[derive(Clone, Debug, Default, Eq, PartialEq, Queryable, QueryableByName)]
pub struct LogEntry {
    #[diesel(sql_type = Bigint)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub login: String,
    #[diesel(sql_type = Binary)]
    pub guid: Vec<u8>,
    #[diesel(sql_type = Binary)]
    pub ip: Vec<u8>,
    #[diesel(sql_type = Bigint)]
    pub dt: i64,
    #[diesel(sql_type = Text)]
    pub misc: String,
}

#[cfg(debug_assertions)]
pub type GetLogEntries = Vec<LogEntry>;
