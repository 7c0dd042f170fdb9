//! Session state machine.
//!
//! A session's state combines an origin (where the next job starts) with a
//! speed (work ahead or realtime). Completion of the previous job drives the
//! transition table in [`SessionState::next`]; the runner additionally
//! [`accelerate`](SessionState::accelerate)s or
//! [`throttle`](SessionState::throttle)s immediately before each job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-session transcode mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// The schedule changed; restart from wall-clock now.
    PlayoutUpdated,
    /// Start at wall-clock now, faster than realtime.
    SeekAndWorkAhead,
    /// Start at the beginning of the next item, faster than realtime.
    ZeroAndWorkAhead,
    /// Start at wall-clock now, at playback speed.
    SeekAndRealtime,
    /// Start at the beginning of the next item, at playback speed.
    ZeroAndRealtime,
    /// Continue mid-item from where the last job ended, faster than realtime.
    SlugAndWorkAhead,
    /// Continue mid-item from where the last job ended, at playback speed.
    SlugAndRealtime,
}

impl SessionState {
    /// Completion-driven transition.
    pub fn next(self, completed: bool) -> Self {
        use SessionState::*;

        match (self, completed) {
            (PlayoutUpdated, _) => SeekAndWorkAhead,
            (SeekAndWorkAhead, false) => SeekAndWorkAhead,
            (SeekAndWorkAhead, true) => ZeroAndWorkAhead,
            (ZeroAndWorkAhead, false) => SeekAndWorkAhead,
            (ZeroAndWorkAhead, true) => ZeroAndWorkAhead,
            (SeekAndRealtime, _) => ZeroAndRealtime,
            (ZeroAndRealtime, _) => ZeroAndRealtime,
            (SlugAndWorkAhead, false) => SlugAndWorkAhead,
            (SlugAndWorkAhead, true) => ZeroAndWorkAhead,
            (SlugAndRealtime, _) => ZeroAndRealtime,
        }
    }

    /// Switch a realtime state to its work-ahead counterpart.
    pub fn accelerate(self) -> Self {
        use SessionState::*;

        match self {
            SeekAndRealtime => SeekAndWorkAhead,
            ZeroAndRealtime => ZeroAndWorkAhead,
            SlugAndRealtime => SlugAndWorkAhead,
            other => other,
        }
    }

    /// Switch a work-ahead state to its realtime counterpart.
    pub fn throttle(self) -> Self {
        use SessionState::*;

        match self {
            SeekAndWorkAhead => SeekAndRealtime,
            ZeroAndWorkAhead => ZeroAndRealtime,
            SlugAndWorkAhead => SlugAndRealtime,
            other => other,
        }
    }

    pub fn is_realtime(self) -> bool {
        matches!(
            self,
            SessionState::SeekAndRealtime
                | SessionState::ZeroAndRealtime
                | SessionState::SlugAndRealtime
        )
    }

    pub fn starts_at_zero(self) -> bool {
        matches!(
            self,
            SessionState::ZeroAndWorkAhead | SessionState::ZeroAndRealtime
        )
    }

    fn is_seek(self) -> bool {
        matches!(
            self,
            SessionState::SeekAndWorkAhead | SessionState::SeekAndRealtime
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a session computes the starting point of mid-item jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Mid-item jobs seek to wall-clock now, or to the end of the buffer when
    /// it is already ahead of now.
    #[default]
    WallClock,
    /// Mid-item jobs always continue from the end of the buffer. Seek states
    /// produced by the transition table become slug states.
    Continuous,
}

impl Origin {
    /// First state of a new session.
    pub fn initial_state(self, work_ahead: bool) -> SessionState {
        if work_ahead {
            SessionState::SeekAndWorkAhead
        } else {
            SessionState::SeekAndRealtime
        }
    }

    /// Apply the transition table, then this origin's rewrite.
    ///
    /// A restart after [`SessionState::PlayoutUpdated`] always seeks.
    pub fn next_state(self, current: SessionState, completed: bool) -> SessionState {
        let next = current.next(completed);
        match (self, current, next) {
            (Origin::Continuous, SessionState::PlayoutUpdated, _) => next,
            (Origin::Continuous, _, SessionState::SeekAndWorkAhead) => SessionState::SlugAndWorkAhead,
            (Origin::Continuous, _, SessionState::SeekAndRealtime) => SessionState::SlugAndRealtime,
            _ => next,
        }
    }

    /// The channel time the next job should start at.
    pub fn reference_time(
        self,
        state: SessionState,
        now: DateTime<Utc>,
        transcoded_until: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match state {
            SessionState::PlayoutUpdated => now,
            s if s.is_seek() && self == Origin::WallClock => now.max(transcoded_until),
            _ => transcoded_until,
        }
    }
}
