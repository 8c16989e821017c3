use std::collections::HashMap;
use std::time::{Duration, Instant};

use facepunch_core::DetectorState;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown liveness session: {0}")]
    Unknown(String),
    #[error("liveness session expired: {0}")]
    Expired(String),
    #[error("liveness session is being evaluated: {0}")]
    Busy(String),
}

struct Slot {
    /// `None` while a check has the state checked out.
    state: Option<DetectorState>,
    touched: Instant,
}

/// Registry of liveness sessions.
///
/// A session owns the [`DetectorState`] accumulated over several bursts of
/// one attempt. The state is checked out for the duration of a check, so
/// two checks never evaluate against the same history. Sessions idle for
/// longer than the TTL expire.
pub struct LivenessSessions {
    ttl: Duration,
    slots: HashMap<String, Slot>,
}

impl LivenessSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: HashMap::new(),
        }
    }

    /// Open a session around a fresh state. Returns its id.
    pub fn start(&mut self, state: DetectorState, now: Instant) -> String {
        self.prune(now);
        let id = uuid::Uuid::new_v4().to_string();
        self.slots.insert(
            id.clone(),
            Slot {
                state: Some(state),
                touched: now,
            },
        );
        tracing::debug!(session = %id, open = self.slots.len(), "liveness session started");
        id
    }

    /// Check out the state of a session.
    pub fn take(&mut self, id: &str, now: Instant) -> Result<DetectorState, SessionError> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        if now.duration_since(slot.touched) > self.ttl {
            self.slots.remove(id);
            tracing::debug!(session = id, "liveness session expired");
            return Err(SessionError::Expired(id.to_string()));
        }
        let state = slot
            .state
            .take()
            .ok_or_else(|| SessionError::Busy(id.to_string()))?;
        slot.touched = now;
        Ok(state)
    }

    /// Return a checked-out state so later bursts build on it.
    ///
    /// A session that was finished in the meantime stays closed.
    pub fn restore(&mut self, id: &str, state: DetectorState, now: Instant) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.state = Some(state);
            slot.touched = now;
        }
    }

    /// Close a session, e.g. after a punch consumed it.
    pub fn finish(&mut self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Drop sessions idle for longer than the TTL. Checked-out sessions are kept.
    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.slots.len();
        self.slots
            .retain(|_, s| s.state.is_none() || now.duration_since(s.touched) <= ttl);
        if self.slots.len() < before {
            tracing::debug!(expired = before - self.slots.len(), "pruned liveness sessions");
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(120);

    #[test]
    fn test_take_and_restore() {
        let mut sessions = LivenessSessions::new(TTL);
        let t = Instant::now();
        let id = sessions.start(DetectorState::default(), t);

        let mut state = sessions.take(&id, t).unwrap();
        assert!(matches!(sessions.take(&id, t), Err(SessionError::Busy(_))));

        state.record_ear(0.3);
        sessions.restore(&id, state, t);
        let state = sessions.take(&id, t + Duration::from_secs(1)).unwrap();
        assert_eq!(state.ear_history().len(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let mut sessions = LivenessSessions::new(TTL);
        assert!(matches!(
            sessions.take("nope", Instant::now()),
            Err(SessionError::Unknown(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_expiry() {
        let mut sessions = LivenessSessions::new(TTL);
        let t = Instant::now();
        let id = sessions.start(DetectorState::default(), t);
        let late = t + TTL + Duration::from_secs(1);
        assert!(matches!(sessions.take(&id, late), Err(SessionError::Expired(_))));
        assert_eq!(sessions.open_sessions(), 0);
    }

    #[test]
    fn test_use_refreshes_ttl() {
        let mut sessions = LivenessSessions::new(TTL);
        let t = Instant::now();
        let id = sessions.start(DetectorState::default(), t);
        let state = sessions.take(&id, t + Duration::from_secs(100)).unwrap();
        sessions.restore(&id, state, t + Duration::from_secs(100));
        assert!(sessions.take(&id, t + Duration::from_secs(200)).is_ok());
    }

    #[test]
    fn test_prune_keeps_checked_out() {
        let mut sessions = LivenessSessions::new(TTL);
        let t = Instant::now();
        let idle = sessions.start(DetectorState::default(), t);
        let busy = sessions.start(DetectorState::default(), t);
        let _state = sessions.take(&busy, t).unwrap();

        sessions.prune(t + TTL * 2);
        assert_eq!(sessions.open_sessions(), 1);
        assert!(matches!(sessions.take(&idle, t), Err(SessionError::Unknown(_))));
    }

    #[test]
    fn test_finish_closes_session() {
        let mut sessions = LivenessSessions::new(TTL);
        let t = Instant::now();
        let id = sessions.start(DetectorState::default(), t);
        let state = sessions.take(&id, t).unwrap();
        assert!(sessions.finish(&id));
        sessions.restore(&id, state, t);
        assert_eq!(sessions.open_sessions(), 0);
    }
}
