//! Request accounting against the service's daily ceiling and the
//! operator's per-run ceiling.
//!
//! The counters themselves live in [`BackupState`] so they are persisted with
//! everything else; [`QuotaTracker`] only holds the limits and the clock.

use std::fmt;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

use crate::state::types::{BackupState, DailyQuota};

/// Published ceiling of the Library API.
pub const DEFAULT_MAX_DAILY_REQUESTS: u64 = 10_000;
/// Default per-run ceiling, leaving headroom below the daily limit.
pub const DEFAULT_MAX_SESSION_REQUESTS: u64 = 9_500;

pub const UPLOAD_BYTES_COST: u64 = 1;
pub const CREATE_MEDIA_ITEM_COST: u64 = 1;
pub const ADD_TO_ALBUM_COST: u64 = 1;
pub const CREATE_ALBUM_COST: u64 = 1;
pub const LIST_ALBUMS_PAGE_COST: u64 = 1;
/// Upload bytes + create media item + add to album.
pub const UPLOAD_UNIT_COST: u64 = UPLOAD_BYTES_COST + CREATE_MEDIA_ITEM_COST + ADD_TO_ALBUM_COST;

const WARNING_PERCENT: f64 = 80.0;

/// The remote quota resets at midnight in this zone.
const QUOTA_TIMEZONE: Tz = chrono_tz::US::Pacific;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub max_session_requests: u64,
    pub max_daily_requests: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_session_requests: DEFAULT_MAX_SESSION_REQUESTS,
            max_daily_requests: DEFAULT_MAX_DAILY_REQUESTS,
        }
    }
}

/// Which ceiling refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Daily,
    Session,
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaLimit::Daily => f.write_str("daily request quota reached"),
            QuotaLimit::Session => f.write_str("session request limit reached"),
        }
    }
}

/// Usage of one ceiling, for reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub used: u64,
    pub limit: u64,
}

impl Usage {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn percent(&self) -> f64 {
        if self.limit == 0 {
            100.0
        } else {
            self.used as f64 / self.limit as f64 * 100.0
        }
    }

    pub fn is_warning(&self) -> bool {
        self.percent() > WARNING_PERCENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaStatus {
    pub date: NaiveDate,
    pub daily: Usage,
    pub session: Usage,
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Daily ({}, Pacific): {}/{} used, {} remaining ({:.1}%)",
            self.date,
            self.daily.used,
            self.daily.limit,
            self.daily.remaining(),
            self.daily.percent()
        )?;
        write!(
            f,
            "  Session:            {}/{} used, {} remaining ({:.1}%)",
            self.session.used,
            self.session.limit,
            self.session.remaining(),
            self.session.percent()
        )
    }
}

#[derive(Debug, Clone)]
pub struct QuotaTracker {
    limits: QuotaLimits,
    tz: Tz,
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            tz: QUOTA_TIMEZONE,
        }
    }

    /// Current date on the service's quota clock.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    fn daily_used(&self, state: &BackupState) -> u64 {
        if state.daily_quota.date == self.today() {
            state.daily_quota.total_requests
        } else {
            0
        }
    }

    /// Check whether `n` more requests fit under both ceilings. Pure: nothing
    /// is recorded until [`commit`](Self::commit).
    pub fn reserve(&self, state: &BackupState, n: u64) -> Result<(), QuotaLimit> {
        if self.daily_used(state).saturating_add(n) > self.limits.max_daily_requests {
            return Err(QuotaLimit::Daily);
        }
        if state.session.requests_count.saturating_add(n) > self.limits.max_session_requests {
            return Err(QuotaLimit::Session);
        }
        Ok(())
    }

    /// Record `n` requests that reached the remote side.
    pub fn commit(&self, state: &mut BackupState, n: u64) {
        self.roll_over(state);
        state.session.requests_count = state.session.requests_count.saturating_add(n);
        state.daily_quota.total_requests = state.daily_quota.total_requests.saturating_add(n);
    }

    /// Start a new daily record when the quota date has changed. Returns
    /// whether a roll-over happened.
    pub fn roll_over(&self, state: &mut BackupState) -> bool {
        let today = self.today();
        if state.daily_quota.date == today {
            return false;
        }
        tracing::info!(
            "Quota day changed ({} -> {}), daily counter reset",
            state.daily_quota.date,
            today
        );
        state.daily_quota = DailyQuota {
            date: today,
            total_requests: 0,
        };
        true
    }

    pub fn remaining_daily(&self, state: &BackupState) -> u64 {
        self.limits
            .max_daily_requests
            .saturating_sub(self.daily_used(state))
    }

    pub fn remaining_session(&self, state: &BackupState) -> u64 {
        self.limits
            .max_session_requests
            .saturating_sub(state.session.requests_count)
    }

    /// Zero both counters, keeping upload progress.
    pub fn reset(&self, state: &mut BackupState) {
        state.daily_quota = DailyQuota {
            date: self.today(),
            total_requests: 0,
        };
        state.session.requests_count = 0;
        tracing::info!("Quota counters reset");
    }

    /// Overwrite today's usage with an externally observed value.
    pub fn set_daily_usage(&self, state: &mut BackupState, requests: u64) {
        state.daily_quota = DailyQuota {
            date: self.today(),
            total_requests: requests,
        };
        state.session.requests_count = 0;
        tracing::info!("Daily quota usage set to {}", requests);
    }

    pub fn status(&self, state: &BackupState) -> QuotaStatus {
        QuotaStatus {
            date: self.today(),
            daily: Usage {
                used: self.daily_used(state),
                limit: self.limits.max_daily_requests,
            },
            session: Usage {
                used: state.session.requests_count,
                limit: self.limits.max_session_requests,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn tracker(session: u64, daily: u64) -> QuotaTracker {
        QuotaTracker::new(QuotaLimits {
            max_session_requests: session,
            max_daily_requests: daily,
        })
    }

    fn state_for(tracker: &QuotaTracker) -> BackupState {
        BackupState::new(PathBuf::from("/photos"), tracker.today())
    }

    #[test]
    fn test_default_limits() {
        let limits = QuotaLimits::default();
        assert_eq!(limits.max_session_requests, 9_500);
        assert_eq!(limits.max_daily_requests, 10_000);
        assert_eq!(UPLOAD_UNIT_COST, 3);
    }

    #[test]
    fn test_reserve_is_pure() {
        let q = tracker(10, 100);
        let state = state_for(&q);
        assert!(q.reserve(&state, 3).is_ok());
        assert!(q.reserve(&state, 3).is_ok());
        assert_eq!(state.session.requests_count, 0);
        assert_eq!(state.daily_quota.total_requests, 0);
    }

    #[test]
    fn test_reserve_up_to_exact_ceiling() {
        let q = tracker(3, 100);
        let mut state = state_for(&q);
        assert!(q.reserve(&state, 3).is_ok());
        q.commit(&mut state, 2);
        assert!(q.reserve(&state, 1).is_ok());
        assert_eq!(q.reserve(&state, 2), Err(QuotaLimit::Session));
    }

    #[test]
    fn test_daily_checked_first() {
        let q = tracker(5, 5);
        let mut state = state_for(&q);
        q.commit(&mut state, 5);
        assert_eq!(q.reserve(&state, 1), Err(QuotaLimit::Daily));
    }

    #[test]
    fn test_commit_updates_both_counters() {
        let q = tracker(100, 100);
        let mut state = state_for(&q);
        q.commit(&mut state, 2);
        q.commit(&mut state, 1);
        assert_eq!(state.session.requests_count, 3);
        assert_eq!(state.daily_quota.total_requests, 3);
        assert_eq!(q.remaining_session(&state), 97);
        assert_eq!(q.remaining_daily(&state), 97);
    }

    #[test]
    fn test_stale_date_counts_as_zero_and_rolls_over() {
        let q = tracker(100, 10);
        let mut state = state_for(&q);
        state.daily_quota = DailyQuota {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            total_requests: 10,
        };
        assert!(q.reserve(&state, 5).is_ok());
        assert_eq!(q.remaining_daily(&state), 10);

        q.commit(&mut state, 1);
        assert_eq!(state.daily_quota.date, q.today());
        assert_eq!(state.daily_quota.total_requests, 1);
    }

    #[test]
    fn test_daily_counter_monotonic_within_date() {
        let q = tracker(1_000, 1_000);
        let mut state = state_for(&q);
        let mut last = 0;
        for n in [1, 2, 1, 3] {
            q.commit(&mut state, n);
            assert!(state.daily_quota.total_requests > last);
            last = state.daily_quota.total_requests;
        }
        assert!(!q.roll_over(&mut state));
        assert_eq!(state.daily_quota.total_requests, last);
    }

    #[test]
    fn test_reset_and_set_usage() {
        let q = tracker(100, 100);
        let mut state = state_for(&q);
        q.commit(&mut state, 40);
        q.reset(&mut state);
        assert_eq!(state.session.requests_count, 0);
        assert_eq!(state.daily_quota.total_requests, 0);

        q.commit(&mut state, 5);
        q.set_daily_usage(&mut state, 90);
        assert_eq!(state.daily_quota.total_requests, 90);
        assert_eq!(state.session.requests_count, 0);
        assert_eq!(q.reserve(&state, 11), Err(QuotaLimit::Daily));
    }

    #[test]
    fn test_status_warning_threshold() {
        let q = tracker(100, 100);
        let mut state = state_for(&q);
        q.commit(&mut state, 80);
        let status = q.status(&state);
        assert_eq!(status.daily.remaining(), 20);
        assert!(!status.daily.is_warning());

        q.commit(&mut state, 1);
        assert!(q.status(&state).daily.is_warning());
        assert!(q.status(&state).to_string().contains("81/100"));
    }
}
