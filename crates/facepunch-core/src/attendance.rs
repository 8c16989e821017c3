//! Attendance state machine.
//!
//! The state of an identity on a given day is never stored. It is derived
//! from that day's append-only event log every time a decision is needed:
//!
//! ```text
//! NoEventsToday --in--> PunchedIn --out--> PunchedOut --in--> PunchedIn ...
//! ```

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchKind {
    PunchIn,
    PunchOut,
}

impl PunchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchKind::PunchIn => "punch_in",
            PunchKind::PunchOut => "punch_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "punch_in" => Some(PunchKind::PunchIn),
            "punch_out" => Some(PunchKind::PunchOut),
            _ => None,
        }
    }

    /// Human-readable label used in reply messages.
    pub fn label(&self) -> &'static str {
        match self {
            PunchKind::PunchIn => "Punch In",
            PunchKind::PunchOut => "Punch Out",
        }
    }
}

impl fmt::Display for PunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded punch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub kind: PunchKind,
    pub timestamp: DateTime<Utc>,
    pub match_confidence: f32,
    pub liveness_passed: bool,
    pub liveness_confidence: f32,
}

impl AttendanceEvent {
    /// UTC calendar day the event belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendancePolicy {
    /// Minimum time between a punch-in and the following punch-out.
    pub min_hours_for_punch_out: u32,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            min_hours_for_punch_out: 6,
        }
    }
}

impl AttendancePolicy {
    pub fn min_dwell(&self) -> Duration {
        Duration::hours(i64::from(self.min_hours_for_punch_out))
    }
}

/// A punch-out attempted before the minimum dwell time elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TooSoon {
    pub last_punch_in: DateTime<Utc>,
    /// Whole seconds still to wait.
    pub remaining_secs: i64,
}

impl TooSoon {
    pub fn remaining(&self) -> Duration {
        Duration::seconds(self.remaining_secs)
    }

    pub fn hours(&self) -> i64 {
        self.remaining_secs / 3600
    }

    /// Minutes past the whole hours.
    pub fn minutes(&self) -> i64 {
        (self.remaining_secs % 3600) / 60
    }
}

impl fmt::Display for TooSoon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Already punched in. Punch out available in {}h {}m",
            self.hours(),
            self.minutes()
        )
    }
}

/// Most recent event; a timestamp tie goes to the later list entry.
fn last_event(events: &[AttendanceEvent]) -> Option<&AttendanceEvent> {
    events.iter().fold(None, |best, e| match best {
        Some(b) if b.timestamp > e.timestamp => Some(b),
        _ => Some(e),
    })
}

/// Decide the next punch for an identity given its events for today.
///
/// Pure: reads nothing but its arguments. Callers must hold the identity's
/// punch lock between reading `today` and appending the result.
pub fn decide(
    today: &[AttendanceEvent],
    now: DateTime<Utc>,
    policy: &AttendancePolicy,
) -> Result<PunchKind, TooSoon> {
    let Some(last) = last_event(today) else {
        return Ok(PunchKind::PunchIn);
    };

    match last.kind {
        PunchKind::PunchOut => Ok(PunchKind::PunchIn),
        PunchKind::PunchIn => {
            // A clock that stepped backwards counts as no time elapsed.
            let elapsed = (now - last.timestamp).max(Duration::zero());
            let min = policy.min_dwell();
            if elapsed >= min {
                Ok(PunchKind::PunchOut)
            } else {
                Err(TooSoon {
                    last_punch_in: last.timestamp,
                    remaining_secs: (min - elapsed).num_seconds(),
                })
            }
        }
    }
}

/// Derived per-day state, for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DayState {
    NoEventsToday,
    PunchedIn { since: DateTime<Utc> },
    PunchedOut { at: DateTime<Utc> },
}

impl DayState {
    pub fn from_events(today: &[AttendanceEvent]) -> Self {
        match last_event(today) {
            None => DayState::NoEventsToday,
            Some(e) if e.kind == PunchKind::PunchIn => DayState::PunchedIn { since: e.timestamp },
            Some(e) => DayState::PunchedOut { at: e.timestamp },
        }
    }
}

/// Attendance summary for one day across all identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayStats {
    /// Distinct identities with at least one punch-in.
    pub present: usize,
    /// Identities that punched in but have no punch-out yet.
    pub punched_in: usize,
    /// Distinct identities with at least one punch-out.
    pub punched_out: usize,
}

impl DayStats {
    pub fn from_events(events: &[AttendanceEvent]) -> Self {
        let mut ins = BTreeSet::new();
        let mut outs = BTreeSet::new();
        for e in events {
            match e.kind {
                PunchKind::PunchIn => ins.insert(e.identity_id.as_str()),
                PunchKind::PunchOut => outs.insert(e.identity_id.as_str()),
            };
        }
        Self {
            present: ins.len(),
            punched_in: ins.difference(&outs).count(),
            punched_out: outs.len(),
        }
    }
}
