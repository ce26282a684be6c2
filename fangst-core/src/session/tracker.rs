use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Default idle timeout before a session is considered expired.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 3600;

/// One tracked client session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub client: IpAddr,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of flows attributed to this session.
    pub observations: u64,
}

impl Session {
    fn new(client: IpAddr, user_agent: Option<String>, location: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client,
            user_agent,
            location,
            created_at: now,
            last_seen: now,
            observations: 0,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_seen > timeout
    }
}

/// Aggregate counters for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_created: u64,
    pub total_expired: u64,
}

#[derive(Default)]
struct TrackerState {
    sessions: HashMap<Uuid, Session>,
    by_client: HashMap<IpAddr, Uuid>,
    total_created: u64,
    total_expired: u64,
}

/// Maps client addresses to sessions, expiring idle ones.
pub struct SessionTracker {
    state: RwLock<TrackerState>,
    timeout: Duration,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::with_timeout_secs(DEFAULT_SESSION_TIMEOUT_SECS)
    }

    pub fn with_timeout_secs(timeout_secs: i64) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            timeout: Duration::seconds(timeout_secs),
        }
    }

    /// Returns the client's active session id, refreshing its activity
    /// timestamp, or creates a fresh session when none exists or the
    /// existing one has expired.
    pub fn get_or_create_session(
        &self,
        client: IpAddr,
        user_agent: Option<String>,
        location: Option<String>,
    ) -> Uuid {
        let now = Utc::now();
        let mut state = self.state.write();

        if let Some(&id) = state.by_client.get(&client) {
            if let Some(session) = state.sessions.get_mut(&id) {
                if !session.is_expired(now, self.timeout) {
                    session.last_seen = now;
                    session.observations += 1;
                    if session.user_agent.is_none() {
                        session.user_agent = user_agent;
                    }
                    return id;
                }
            }
            if state.sessions.remove(&id).is_some() {
                state.total_expired += 1;
                debug!(session_id = %id, client = %client, "Expired session replaced");
            }
        }

        let session = Session::new(client, user_agent, location);
        let id = session.id;
        state.by_client.insert(client, id);
        state.sessions.insert(id, session);
        state.total_created += 1;
        info!(session_id = %id, client = %client, "Session created");
        id
    }

    pub fn get_session(&self, id: Uuid) -> Option<Session> {
        self.state.read().sessions.get(&id).cloned()
    }

    pub fn get_all_sessions(&self) -> Vec<Session> {
        self.state.read().sessions.values().cloned().collect()
    }

    /// Removes sessions idle past the timeout, returning how many were
    /// dropped. Activity is re-checked under the write lock so a session
    /// refreshed between sweeps survives.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write();
        let expired: Vec<(Uuid, IpAddr)> = state
            .sessions
            .values()
            .filter(|s| s.is_expired(now, self.timeout))
            .map(|s| (s.id, s.client))
            .collect();
        for (id, client) in &expired {
            state.sessions.remove(id);
            if state.by_client.get(client) == Some(id) {
                state.by_client.remove(client);
            }
        }
        state.total_expired += expired.len() as u64;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired idle sessions");
        }
        expired.len()
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.state.read();
        SessionStats {
            active_sessions: state.sessions.len(),
            total_created: state.total_created,
            total_expired: state.total_expired,
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn same_client_reuses_session() {
        let tracker = SessionTracker::new();
        let a = tracker.get_or_create_session(client(1), None, None);
        let b = tracker.get_or_create_session(client(1), None, None);
        assert_eq!(a, b);
        assert_eq!(tracker.stats().active_sessions, 1);
        assert_eq!(tracker.get_session(a).unwrap().observations, 1);
    }

    #[test]
    fn distinct_clients_get_distinct_sessions() {
        let tracker = SessionTracker::new();
        let a = tracker.get_or_create_session(client(1), None, None);
        let b = tracker.get_or_create_session(client(2), None, None);
        assert_ne!(a, b);
        assert_eq!(tracker.stats().active_sessions, 2);
    }

    #[test]
    fn expired_session_is_replaced_on_next_appearance() {
        let tracker = SessionTracker::with_timeout_secs(0);
        let a = tracker.get_or_create_session(client(1), None, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = tracker.get_or_create_session(client(1), None, None);
        assert_ne!(a, b);
        assert!(tracker.get_session(a).is_none());
        let stats = tracker.stats();
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.total_expired, 1);
    }

    #[test]
    fn cleanup_removes_only_idle_sessions() {
        let tracker = SessionTracker::with_timeout_secs(0);
        tracker.get_or_create_session(client(1), None, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(tracker.cleanup_expired_sessions(), 1);
        assert_eq!(tracker.stats().active_sessions, 0);

        let fresh = SessionTracker::new();
        fresh.get_or_create_session(client(2), None, None);
        assert_eq!(fresh.cleanup_expired_sessions(), 0);
        assert_eq!(fresh.stats().active_sessions, 1);
    }

    #[test]
    fn user_agent_backfilled_on_later_observation() {
        let tracker = SessionTracker::new();
        let id = tracker.get_or_create_session(client(1), None, None);
        tracker.get_or_create_session(client(1), Some("curl/8.0".into()), None);
        assert_eq!(
            tracker.get_session(id).unwrap().user_agent.as_deref(),
            Some("curl/8.0")
        );
    }
}
