//! Login, credit-balance, and usage-tracking services for the phone-number
//! identification product.
//!
//! Users carry a daily credit quota keyed by a UTC `YYYYMMDD` day. Logins
//! refresh the quota, tracked uploads consume it, and searches additionally
//! leave one audit row per distinct source address.

#[macro_use]
extern crate slog_scope;

mod auth;
pub mod error;
pub mod policy;
mod track;

pub use auth::AuthService;
pub use error::{AuthError, AuthResult};
pub use track::{TrackOutcome, TrackService, TrackUpload, UploadKind};
