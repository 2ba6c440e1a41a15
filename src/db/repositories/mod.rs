//! Repositories over the agent and conversation stores

pub mod agent;
pub mod conversation;

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Timestamp for a mutation of a record last touched at `previous`.
///
/// Stored times have microsecond resolution, so this never returns a value
/// at or before `previous`.
pub(crate) fn stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_moves_past_future_previous() {
        let ahead = Utc::now().trunc_subsecs(6) + Duration::seconds(10);
        assert_eq!(stamp(Some(ahead)), ahead + Duration::microseconds(1));
    }

    #[test]
    fn stamp_has_microsecond_resolution() {
        let t = stamp(None);
        assert_eq!(t.timestamp_subsec_nanos() % 1_000, 0);
    }
}
