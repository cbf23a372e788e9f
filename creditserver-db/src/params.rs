//! Parameter types for database methods, one struct per operation.

/// Look up a user by their unique login (an E.164-like phone number).
///
/// `lock` adds `FOR UPDATE` to the read and is only meaningful inside a
/// transaction started with `begin(true)`.
#[derive(Clone, Debug, Default)]
pub struct GetUserByLogin {
    pub login: String,
    pub lock: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GetUserById {
    pub id: i64,
}

/// Create a new user row.
#[derive(Clone, Debug, Default)]
pub struct PostUser {
    pub uid: String,
    pub login: String,
    pub admin: i32,
    pub whitelisted: i32,
    pub credits: i32,
    pub lastseen: i32,
    pub comment: String,
}

/// Full-row update of an existing user. `login` is immutable and is not
/// part of the update.
#[derive(Clone, Debug, Default)]
pub struct PutUser {
    pub id: i64,
    pub uid: String,
    pub admin: i32,
    pub whitelisted: i32,
    pub credits: i32,
    pub lastseen: i32,
    pub comment: String,
}

/// Paginated user listing, optionally filtered by a login substring.
#[derive(Clone, Debug, Default)]
pub struct SearchUsers {
    pub login_like: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Append one usage log row.
#[derive(Clone, Debug, Default)]
pub struct PostLogEntry {
    pub login: String,
    /// 16-byte binary correlation identifier.
    pub guid: Vec<u8>,
    /// 16-byte binary network address (IPv4-mapped or native IPv6).
    pub ip: Vec<u8>,
    pub dt: i64,
    pub misc: String,
}

#[cfg(debug_assertions)]
#[derive(Clone, Debug, Default)]
pub struct GetLogEntries {
    pub login: String,
}
