//! Integration tests against a live MySQL instance, run with
//! `cargo test --features db_test`. Each pool connection runs inside a test
//! transaction, so nothing persists between test runs.

use creditserver_common::Metrics;
use creditserver_settings::Settings;

use super::error::DbResult;
use super::models::Db;
use super::params;
use super::pool::{CreditDbPool, DbPool};

async fn db_pool() -> DbResult<CreditDbPool> {
    let _ = env_logger::try_init();

    let settings = Settings::test_settings();
    CreditDbPool::new(&settings, &Metrics::noop())
}

fn test_user(login: &str) -> params::PostUser {
    params::PostUser {
        uid: "u-0001".to_owned(),
        login: login.to_owned(),
        admin: 0,
        whitelisted: 0,
        credits: 5,
        lastseen: 20260820,
        comment: "".to_owned(),
    }
}

#[tokio::test]
async fn test_post_and_get_user() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    let id = db.post_user(test_user("+380000000001")).await?.id;
    assert!(id > 0);

    let user = db
        .get_user_by_login(params::GetUserByLogin {
            login: "+380000000001".to_owned(),
            lock: false,
        })
        .await?
        .expect("user should exist");
    assert_eq!(user.id, id);
    assert_eq!(user.uid, "u-0001");
    assert_eq!(user.credits, 5);
    assert_eq!(user.lastseen, 20260820);

    let by_id = db.get_user_by_id(params::GetUserById { id }).await?;
    assert_eq!(by_id, Some(user));

    let missing = db
        .get_user_by_login(params::GetUserByLogin {
            login: "+380000000002".to_owned(),
            lock: false,
        })
        .await?;
    assert_eq!(missing, None);

    Ok(())
}

#[tokio::test]
async fn test_put_user_leaves_login_untouched() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    let id = db.post_user(test_user("+380000000003")).await?.id;
    db.put_user(params::PutUser {
        id,
        uid: "u-0002".to_owned(),
        admin: 1,
        whitelisted: 10,
        credits: 9,
        lastseen: 20260821,
        comment: "ops".to_owned(),
    })
    .await?;

    let user = db
        .get_user_by_id(params::GetUserById { id })
        .await?
        .expect("user should exist");
    assert_eq!(user.login, "+380000000003");
    assert_eq!(user.uid, "u-0002");
    assert_eq!(user.admin, 1);
    assert_eq!(user.whitelisted, 10);
    assert_eq!(user.credits, 9);
    assert_eq!(user.lastseen, 20260821);
    assert_eq!(user.comment, "ops");

    Ok(())
}

#[tokio::test]
async fn test_locked_read_requires_write_transaction() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    db.post_user(test_user("+380000000004")).await?;

    let result = db
        .get_user_by_login(params::GetUserByLogin {
            login: "+380000000004".to_owned(),
            lock: true,
        })
        .await;
    assert!(result.is_err());

    db.begin(true).await?;
    let user = db
        .get_user_by_login(params::GetUserByLogin {
            login: "+380000000004".to_owned(),
            lock: true,
        })
        .await?;
    assert!(user.is_some());
    db.commit().await?;

    Ok(())
}

#[tokio::test]
async fn test_search_users_filter_and_pagination() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    for login in ["+380000000010", "+380000000011", "+490000000012"] {
        db.post_user(test_user(login)).await?;
    }

    let all = db
        .search_users(params::SearchUsers {
            login_like: None,
            limit: 10,
            offset: 0,
        })
        .await?;
    assert_eq!(all.len(), 3);

    let filtered = db
        .search_users(params::SearchUsers {
            login_like: Some("+38".to_owned()),
            limit: 10,
            offset: 0,
        })
        .await?;
    let logins: Vec<_> = filtered.iter().map(|u| u.login.as_str()).collect();
    assert_eq!(logins, vec!["+380000000010", "+380000000011"]);

    let page = db
        .search_users(params::SearchUsers {
            login_like: Some("+38".to_owned()),
            limit: 1,
            offset: 1,
        })
        .await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].login, "+380000000011");

    Ok(())
}

#[tokio::test]
async fn test_post_log_entry() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    let guid = vec![0xab; 16];
    let ip = {
        let mut bytes = vec![0u8; 16];
        bytes[10] = 0xff;
        bytes[11] = 0xff;
        bytes[12..].copy_from_slice(&[127, 0, 0, 1]);
        bytes
    };
    db.post_log_entry(params::PostLogEntry {
        login: "+380000000020".to_owned(),
        guid: guid.clone(),
        ip: ip.clone(),
        dt: 1_766_000_000_000,
        misc: "".to_owned(),
    })
    .await?;

    let entries = db
        .get_log_entries(params::GetLogEntries {
            login: "+380000000020".to_owned(),
        })
        .await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].guid, guid);
    assert_eq!(entries[0].ip, ip);
    assert_eq!(entries[0].dt, 1_766_000_000_000);

    Ok(())
}

#[tokio::test]
async fn test_rollback_discards_writes() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    db.begin(true).await?;
    db.post_user(test_user("+380000000030")).await?;
    db.rollback().await?;

    let user = db
        .get_user_by_login(params::GetUserByLogin {
            login: "+380000000030".to_owned(),
            lock: false,
        })
        .await?;
    assert_eq!(user, None);

    Ok(())
}

#[tokio::test]
async fn test_check() -> DbResult<()> {
    let pool = db_pool().await?;
    let mut db = pool.get().await?;

    assert!(db.check().await?);

    Ok(())
}
