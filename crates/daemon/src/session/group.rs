//! Sessions belonging to one client group.

use std::sync::Arc;

use dashmap::DashMap;
use protocol::SessionInfo;

use super::session::Session;
use super::{GroupId, SessionId};

/// Concurrent map of session ID to session for one group.
#[derive(Debug)]
pub struct SessionGroup {
    id: GroupId,
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionGroup {
    /// Creates an empty group.
    pub fn new(id: impl Into<GroupId>) -> Self {
        Self {
            id: id.into(),
            sessions: DashMap::new(),
        }
    }

    /// Returns the group ID.
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Adds a session under its own ID.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().clone(), session);
    }

    /// Looks up a session.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and releases a session.
    ///
    /// Returns false if the ID was not present.
    pub fn remove(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.release();
                tracing::info!(
                    group_id = %self.id,
                    session_id = %session_id,
                    "Released session"
                );
                true
            }
            None => false,
        }
    }

    /// Removes and releases every session matching `predicate`.
    ///
    /// Returns the number removed.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        // Collect first; removing while iterating would deadlock the shard.
        let doomed: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        doomed.iter().filter(|id| self.remove(id)).count()
    }

    /// Snapshot of the sessions currently in the group.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Public metadata of every session.
    pub fn infos(&self) -> Vec<SessionInfo> {
        self.sessions().iter().map(|session| session.info()).collect()
    }

    /// Returns true if the group holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Removes and releases every session.
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ShellEndpoint, ShellHandle};
    use protocol::ShellTarget;

    fn session(group: &str) -> (Arc<Session>, ShellEndpoint) {
        let (handle, endpoint) = ShellHandle::pair();
        let (session, _events) =
            Session::new(group, ShellTarget::new("host", "user"), handle, 8).unwrap();
        (Arc::new(session), endpoint)
    }

    #[test]
    fn test_insert_get_remove() {
        let group = SessionGroup::new("g1");
        let (s1, endpoint) = session("g1");
        let id = s1.id().clone();

        group.insert(s1);
        assert_eq!(group.len(), 1);
        assert!(group.get(&id).is_some());

        assert!(group.remove(&id));
        assert!(group.is_empty());
        assert!(endpoint.is_released());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let group = SessionGroup::new("g1");
        let (s1, endpoint) = session("g1");
        group.insert(s1);

        assert!(!group.remove("missing"));
        assert_eq!(group.len(), 1);
        assert!(!endpoint.is_released());
    }

    #[test]
    fn test_remove_where_only_matching() {
        let group = SessionGroup::new("g1");
        let (live, live_endpoint) = session("g1");
        let (dead, dead_endpoint) = session("g1");
        dead_endpoint.mark_disconnected();
        let live_id = live.id().clone();

        group.insert(live);
        group.insert(dead);

        assert_eq!(group.remove_where(|s| !s.is_connected()), 1);
        assert_eq!(group.len(), 1);
        assert!(group.get(&live_id).is_some());
        assert!(!live_endpoint.is_released());
        assert!(dead_endpoint.is_released());
    }

    #[test]
    fn test_clear_releases_all() {
        let group = SessionGroup::new("g1");
        let (a, ea) = session("g1");
        let (b, eb) = session("g1");
        group.insert(a);
        group.insert(b);

        assert_eq!(group.clear(), 2);
        assert!(group.is_empty());
        assert!(ea.is_released());
        assert!(eb.is_released());
    }

    #[test]
    fn test_infos() {
        let group = SessionGroup::new("g1");
        let (a, _ea) = session("g1");
        let id = a.id().clone();
        group.insert(a);

        let infos = group.infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].session_id, id);
        assert_eq!(infos[0].host, "host");
    }
}
