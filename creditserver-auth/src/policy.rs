//! Credit-accounting rules.
//!
//! Everything here is a pure function of the stored quota fields and the
//! current day key; the services own reading and persisting the rows.
//!
//! A user's daily allotment is the configured default, unless `whitelisted`
//! is positive, in which case `whitelisted` doubles as both the flag and the
//! allotment. `lastseen` records the day the quota was last refreshed.

use creditserver_db::results::User;

/// The quota-relevant slice of a user row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreditState {
    pub credits: i32,
    pub whitelisted: i32,
    pub lastseen: i32,
}

impl From<&User> for CreditState {
    fn from(user: &User) -> Self {
        Self {
            credits: user.credits,
            whitelisted: user.whitelisted,
            lastseen: user.lastseen,
        }
    }
}

/// The balance a read-only query reports, without persisting anything.
///
/// On a day boundary the stored `credits` are stale, so the full allotment
/// is reported instead; the actual refresh happens on the next mutating
/// operation.
pub fn effective_credits(state: &CreditState, today: i32, default_credits: i32) -> i32 {
    if state.lastseen != today {
        if state.whitelisted > 0 {
            state.whitelisted
        } else {
            default_credits
        }
    } else {
        state.credits
    }
}

/// Whether a login may refresh the user's quota.
///
/// Only an ordinary user already exhausted today fails this gate; a stale
/// `lastseen` or a whitelisting always passes.
pub fn has_credits(state: &CreditState, today: i32) -> bool {
    state.lastseen != today || state.credits > 0 || state.whitelisted > 0
}

/// The quota fields to persist after a login touch, or `None` when the row
/// is left as-is (the caller still overwrites `uid` either way).
///
/// Whitelisted users are topped back up to their allotment on every login,
/// including same-day ones.
pub fn login_refresh(state: &CreditState, today: i32, default_credits: i32) -> Option<CreditState> {
    if !has_credits(state, today) {
        return None;
    }
    let mut next = *state;
    if state.lastseen != today {
        next.lastseen = today;
        next.credits = default_credits;
    }
    if state.whitelisted > 0 {
        next.credits = state.whitelisted;
    }
    Some(next)
}

/// The outcome of consuming one credit.
///
/// `reported` and `credits` differ at the floor: storage never goes below
/// zero, while the reported balance uses `-1` to tell callers "this request
/// was not covered" apart from "this used up the last credit" (`0`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Consumption {
    /// Balance to persist, clamped at zero.
    pub credits: i32,
    /// Day key to persist.
    pub lastseen: i32,
    /// Balance to report to the caller, `-1` when already exhausted.
    pub reported: i32,
    pub whitelisted: bool,
}

/// Consume one credit from the given state.
pub fn consume_one(state: &CreditState, today: i32, default_credits: i32) -> Consumption {
    if state.whitelisted > 0 {
        Consumption {
            credits: (state.credits - 1).max(0),
            lastseen: today,
            reported: if state.credits > 0 {
                state.credits - 1
            } else {
                -1
            },
            whitelisted: true,
        }
    } else if state.lastseen != today {
        // First consuming action of a new day refreshes and spends in one
        // step.
        Consumption {
            credits: default_credits - 1,
            lastseen: today,
            reported: default_credits - 1,
            whitelisted: false,
        }
    } else {
        Consumption {
            credits: (state.credits - 1).max(0),
            lastseen: state.lastseen,
            reported: if state.credits > 0 {
                state.credits - 1
            } else {
                -1
            },
            whitelisted: false,
        }
    }
}
