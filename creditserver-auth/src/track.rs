use std::net::IpAddr;
use std::sync::Arc;

use creditserver_common::{day::Clock, Metrics};
use creditserver_db::{params, Db, DbPool};
use creditserver_settings::Settings;

use super::error::{AuthError, AuthResult};
use super::policy::{self, CreditState};

/// What kind of usage event is being recorded.
///
/// Anything other than a search or compare still consumes a credit but
/// leaves no audit rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadKind {
    Search,
    Compare,
    Other,
}

impl UploadKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "search" => Self::Search,
            "compare" => Self::Compare,
            _ => Self::Other,
        }
    }
}

/// One tracked usage event.
#[derive(Clone, Debug)]
pub struct TrackUpload {
    pub kind: UploadKind,
    pub login: String,
    pub ips: Vec<IpAddr>,
    /// Hyphenated hex UUID string; non-hex characters are stripped before
    /// decoding.
    pub guid: String,
    /// Caller-supplied epoch milliseconds, stored as-is.
    pub dt: i64,
}

/// The result of tracking an upload.
///
/// `UnknownUser` replaces the numeric sentinel the public API reports; the
/// translation back to `-1` happens at the boundary via `public_credits`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackOutcome {
    Consumed { credits: i32, whitelisted: bool },
    UnknownUser,
}

impl TrackOutcome {
    /// The credit balance as reported to the public API.
    pub fn public_credits(&self) -> i32 {
        match self {
            Self::Consumed { credits, .. } => *credits,
            Self::UnknownUser => -1,
        }
    }

    pub fn whitelisted(&self) -> bool {
        matches!(self, Self::Consumed { whitelisted: true, .. })
    }
}

/// Records usage events: consumes one credit per event and, for searches,
/// appends one audit row per distinct source IP.
pub struct TrackService {
    pool: Box<dyn DbPool>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    default_credits: i32,
}

impl TrackService {
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

    /// Consume one credit for the event and log it. The user row update and
    /// all log rows commit or roll back together.
    pub async fn track_upload(&self, upload: TrackUpload) -> AuthResult<TrackOutcome> {
        let mut metrics = self.metrics.clone();
        metrics.start_timer("track.upload", None);

        let mut db = self.pool.get().await?;
        db.begin(true).await?;
        match self.track_locked(&mut *db, upload).await {
            Ok(TrackOutcome::UnknownUser) => {
                // Nothing was written; release the lock attempt.
                db.rollback().await?;
                Ok(TrackOutcome::UnknownUser)
            }
            Ok(outcome) => {
                db.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                db.rollback().await?;
                Err(e)
            }
        }
    }

    async fn track_locked(
        &self,
        db: &mut dyn Db,
        upload: TrackUpload,
    ) -> AuthResult<TrackOutcome> {
        let user = db
            .get_user_by_login(params::GetUserByLogin {
                login: upload.login.clone(),
                lock: true,
            })
            .await?;
        let Some(user) = user else {
            warn!("Tracking upload for unknown user"; "login" => &upload.login);
            self.metrics.incr("track.upload.unknown_user");
            return Ok(TrackOutcome::UnknownUser);
        };

        let consumption = policy::consume_one(
            &CreditState::from(&user),
            self.clock.today(),
            self.default_credits,
        );
        db.put_user(params::PutUser {
            id: user.id,
            uid: user.uid,
            admin: user.admin,
            whitelisted: user.whitelisted,
            credits: consumption.credits,
            lastseen: consumption.lastseen,
            comment: user.comment,
        })
        .await?;

        if upload.kind == UploadKind::Search {
            let guid = guid_bytes(&upload.guid)?;
            for ip in dedup_ips(&upload.ips) {
                db.post_log_entry(params::PostLogEntry {
                    login: upload.login.clone(),
                    guid: guid.clone(),
                    ip: ip_bytes(&ip),
                    dt: upload.dt,
                    misc: String::new(),
                })
                .await?;
            }
        }
        self.metrics.incr("track.upload.consume");

        Ok(TrackOutcome::Consumed {
            credits: consumption.reported,
            whitelisted: consumption.whitelisted,
        })
    }
}

/// Decode a hyphenated hex UUID string into its 16-byte form.
fn guid_bytes(guid: &str) -> AuthResult<Vec<u8>> {
    let hex_digits: String = guid.chars().filter(char::is_ascii_hexdigit).collect();
    hex::decode(&hex_digits).map_err(|_| AuthError::invalid_guid(guid.to_owned()))
}

/// The 16-byte wire form of an address: IPv6 octets, with IPv4 addresses
/// mapped into the `::ffff:0:0/96` range.
fn ip_bytes(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Drop duplicate addresses, keeping first-seen order.
fn dedup_ips(ips: &[IpAddr]) -> Vec<IpAddr> {
    let mut seen = Vec::with_capacity(ips.len());
    for ip in ips {
        if !seen.contains(ip) {
            seen.push(*ip);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use creditserver_common::day::FixedClock;
    use creditserver_db::{mock::MockDbPool, results::User};

    const TODAY: i32 = 20201230;
    const YESTERDAY: i32 = 20201229;
    const GUID: &str = "8a6b2c1d-0e3f-4a5b-8c7d-9e0f1a2b3c4d";

    fn service(pool: &MockDbPool) -> TrackService {
        let _ = env_logger::try_init();
        let settings = Settings::test_settings();
        let clock = FixedClock(Utc.with_ymd_and_hms(2020, 12, 30, 12, 0, 0).unwrap());
        TrackService::new(
            &settings,
            Box::new(pool.clone()),
            Arc::new(clock),
            &Metrics::noop(),
        )
    }

    fn seed(pool: &MockDbPool, login: &str, credits: i32, whitelisted: i32, lastseen: i32) {
        pool.seed_user(User {
            uid: "device".to_owned(),
            login: login.to_owned(),
            credits,
            whitelisted,
            lastseen,
            ..Default::default()
        });
    }

    fn upload(kind: UploadKind, login: &str, ips: &[&str]) -> TrackUpload {
        TrackUpload {
            kind,
            login: login.to_owned(),
            ips: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            guid: GUID.to_owned(),
            dt: 1_609_329_600_000,
        }
    }

    #[test]
    fn parse_kind() {
        assert_eq!(UploadKind::parse("search"), UploadKind::Search);
        assert_eq!(UploadKind::parse("compare"), UploadKind::Compare);
        assert_eq!(UploadKind::parse("export"), UploadKind::Other);
    }

    #[test]
    fn guid_decodes_with_or_without_punctuation() {
        let plain = GUID.replace('-', "");
        assert_eq!(guid_bytes(GUID).unwrap(), guid_bytes(&plain).unwrap());
        assert_eq!(guid_bytes(GUID).unwrap().len(), 16);
        assert_eq!(
            guid_bytes("00000000-0000-0000-0000-000000000000").unwrap(),
            vec![0u8; 16]
        );
    }

    #[test]
    fn guid_with_odd_digit_count_is_rejected() {
        assert!(guid_bytes("abc").is_err());
    }

    #[test]
    fn ipv4_is_mapped_into_ipv6() {
        let bytes = ip_bytes(&"127.0.0.1".parse().unwrap());
        let mut expected = vec![0u8; 16];
        expected[10] = 0xff;
        expected[11] = 0xff;
        expected[12..].copy_from_slice(&[127, 0, 0, 1]);
        assert_eq!(bytes, expected);

        let v6 = ip_bytes(&"2001:db8::1".parse().unwrap());
        assert_eq!(v6.len(), 16);
        assert_eq!(&v6[..4], &[0x20, 0x01, 0x0d, 0xb8]);
    }

    #[tokio::test]
    async fn unknown_user_returns_sentinel_and_writes_nothing() {
        let pool = MockDbPool::new();
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(UploadKind::Search, "+380000000001", &["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(outcome, TrackOutcome::UnknownUser);
        assert_eq!(outcome.public_credits(), -1);
        assert!(!outcome.whitelisted());
        assert!(pool.log_entries("+380000000001").is_empty());
    }

    #[tokio::test]
    async fn search_logs_one_row_per_distinct_ip() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000002", 5, 0, TODAY);
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(
                UploadKind::Search,
                "+380000000002",
                &["10.0.0.1", "10.0.0.2", "10.0.0.1", "2001:db8::1", "10.0.0.2"],
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::Consumed {
                credits: 4,
                whitelisted: false,
            }
        );

        let entries = pool.log_entries("+380000000002");
        assert_eq!(entries.len(), 3);
        // First-seen order is preserved.
        assert_eq!(entries[0].ip, ip_bytes(&"10.0.0.1".parse().unwrap()));
        assert_eq!(entries[1].ip, ip_bytes(&"10.0.0.2".parse().unwrap()));
        assert_eq!(entries[2].ip, ip_bytes(&"2001:db8::1".parse().unwrap()));
        for entry in &entries {
            assert_eq!(entry.guid, guid_bytes(GUID).unwrap());
            assert_eq!(entry.dt, 1_609_329_600_000);
            assert_eq!(entry.misc, "");
        }
    }

    #[tokio::test]
    async fn compare_consumes_without_logging() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000003", 5, 0, 20200101);
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(UploadKind::Compare, "+380000000003", &["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::Consumed {
                credits: 4,
                whitelisted: false,
            }
        );

        let stored = pool.user_by_login("+380000000003").unwrap();
        assert_eq!(stored.credits, 4);
        assert_eq!(stored.lastseen, TODAY);
        assert!(pool.log_entries("+380000000003").is_empty());
    }

    #[tokio::test]
    async fn unrecognized_kind_still_consumes() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000004", 3, 0, TODAY);
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(UploadKind::Other, "+380000000004", &["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::Consumed {
                credits: 2,
                whitelisted: false,
            }
        );
        assert!(pool.log_entries("+380000000004").is_empty());
    }

    #[tokio::test]
    async fn exhaustion_reports_zero_then_sentinel() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000005", 1, 0, TODAY);
        let svc = service(&pool);

        let first = svc
            .track_upload(upload(UploadKind::Compare, "+380000000005", &[]))
            .await
            .unwrap();
        assert_eq!(first.public_credits(), 0);

        let second = svc
            .track_upload(upload(UploadKind::Compare, "+380000000005", &[]))
            .await
            .unwrap();
        assert_eq!(second.public_credits(), -1);
        // Never persisted below zero.
        assert_eq!(pool.user_by_login("+380000000005").unwrap().credits, 0);
    }

    #[tokio::test]
    async fn guid_decode_failure_rolls_back_consumption() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000008", 5, 0, TODAY);
        let svc = service(&pool);

        // An odd number of hex digits cannot decode, after the credit
        // decrement has already been applied inside the transaction.
        let mut bad = upload(UploadKind::Search, "+380000000008", &["127.0.0.1"]);
        bad.guid = "abc".to_owned();
        assert!(svc.track_upload(bad).await.is_err());

        // The whole transaction rolled back: no credit spent, no log rows.
        let stored = pool.user_by_login("+380000000008").unwrap();
        assert_eq!(stored.credits, 5);
        assert!(pool.log_entries("+380000000008").is_empty());
    }

    #[tokio::test]
    async fn whitelisted_user_consumes_from_allotment() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000006", 20, 20, TODAY);
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(UploadKind::Search, "+380000000006", &["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::Consumed {
                credits: 19,
                whitelisted: true,
            }
        );
        assert!(outcome.whitelisted());
        assert_eq!(pool.user_by_login("+380000000006").unwrap().credits, 19);
    }

    #[tokio::test]
    async fn whitelisted_exhausted_user_reports_sentinel() {
        let pool = MockDbPool::new();
        seed(&pool, "+380000000007", 0, 20, TODAY);
        let svc = service(&pool);

        let outcome = svc
            .track_upload(upload(UploadKind::Search, "+380000000007", &["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::Consumed {
                credits: -1,
                whitelisted: true,
            }
        );
        assert_eq!(outcome.public_credits(), -1);
        assert_eq!(pool.user_by_login("+380000000007").unwrap().credits, 0);
        // The search is still logged even when over quota.
        assert_eq!(pool.log_entries("+380000000007").len(), 1);
    }
}
