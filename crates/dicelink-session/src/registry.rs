//! The session registry: every hosted session and who is in it.
//!
//! A relay hub owns exactly one registry and passes it (behind a lock) to
//! its connection tasks. There is no process-wide table.
//!
//! `SessionRegistry` is not thread-safe by itself; it is a plain pair of
//! `HashMap`s meant to sit behind a mutex at a higher level.

use std::collections::HashMap;

use dicelink_protocol::{
    ConnectionState, PeerId, PeerInfo, SessionId, SessionInfo, TransportKind,
};

use crate::SessionError;

/// One hosted session and its members, host first.
struct Entry {
    info: SessionInfo,
    members: Vec<PeerInfo>,
}

/// What happened when a peer left.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    /// The session the peer was in.
    pub session_id: SessionId,
    /// Members still to be told about the departure.
    pub remaining: Vec<PeerId>,
    /// `true` if the session no longer exists (host left or it emptied).
    pub closed: bool,
}

/// Tracks hosted sessions and their membership.
///
/// ```text
/// create() ──→ join()* ──→ mark_started() ──→ leave()* ──→ [removed]
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Entry>,
    /// Index from member to the session they're in.
    membership: HashMap<PeerId, SessionId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`, hosted by `host`.
    ///
    /// The registry takes over the bookkeeping fields: host id, player
    /// count, password flag and address are all overwritten.
    ///
    /// # Errors
    /// [`SessionError::AlreadyInSession`] if the host is already a member
    /// somewhere.
    pub fn create(
        &mut self,
        mut host: PeerInfo,
        mut session: SessionInfo,
        password: Option<String>,
    ) -> Result<SessionInfo, SessionError> {
        if self.membership.contains_key(&host.peer_id) {
            return Err(SessionError::AlreadyInSession(host.peer_id));
        }

        let password = password.filter(|p| !p.is_empty());
        host.is_host = true;
        host.state = ConnectionState::Connected;
        session.host_id = host.peer_id.clone();
        session.current_players = 1;
        session.started = false;
        session.requires_password = password.is_some();
        session.password = password;
        session.address = session.session_id.to_string();
        session.transport = TransportKind::Relay;

        tracing::info!(
            session_id = %session.session_id,
            host = %host.peer_id,
            name = %session.name,
            "session registered"
        );

        self.membership
            .insert(host.peer_id.clone(), session.session_id.clone());
        self.sessions.insert(
            session.session_id.clone(),
            Entry {
                info: session.clone(),
                members: vec![host],
            },
        );
        Ok(session)
    }

    /// Adds `peer` to a session.
    ///
    /// Returns the updated descriptor and the members that were already
    /// there (so the joiner learns who it's playing with).
    ///
    /// # Errors
    /// Unknown session, already started, full, wrong password, or the
    /// peer is already in a session.
    pub fn join(
        &mut self,
        session_id: &SessionId,
        mut peer: PeerInfo,
        password: Option<&str>,
    ) -> Result<(SessionInfo, Vec<PeerInfo>), SessionError> {
        if self.membership.contains_key(&peer.peer_id) {
            return Err(SessionError::AlreadyInSession(peer.peer_id));
        }
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        if entry.info.started {
            return Err(SessionError::AlreadyStarted(session_id.clone()));
        }
        if entry.info.is_full() {
            return Err(SessionError::SessionFull(session_id.clone()));
        }
        if !entry.info.password_matches(password) {
            return Err(SessionError::WrongPassword(session_id.clone()));
        }

        let existing = entry.members.clone();
        peer.is_host = false;
        peer.state = ConnectionState::Connected;
        tracing::info!(
            %session_id,
            peer_id = %peer.peer_id,
            name = %peer.display_name(),
            "peer joined session"
        );
        self.membership.insert(peer.peer_id.clone(), session_id.clone());
        entry.members.push(peer);
        entry.info.current_players = entry.members.len();

        Ok((entry.info.clone(), existing))
    }

    /// Removes `peer_id` from its session.
    ///
    /// When the host leaves, or the last member does, the session is torn
    /// down and every remaining member is unregistered with it. Returns
    /// `None` if the peer was in no session.
    pub fn leave(&mut self, peer_id: &PeerId) -> Option<Departure> {
        let session_id = self.membership.remove(peer_id)?;
        let entry = self.sessions.get_mut(&session_id)?;

        entry.members.retain(|m| &m.peer_id != peer_id);
        entry.info.current_players = entry.members.len();
        let remaining: Vec<PeerId> =
            entry.members.iter().map(|m| m.peer_id.clone()).collect();
        let closed = &entry.info.host_id == peer_id || remaining.is_empty();

        if closed {
            self.sessions.remove(&session_id);
            for member in &remaining {
                self.membership.remove(member);
            }
            tracing::info!(%session_id, "session closed");
        } else {
            tracing::info!(%session_id, %peer_id, "peer left session");
        }

        Some(Departure {
            session_id,
            remaining,
            closed,
        })
    }

    /// Flags a session as started so it stops being listed.
    ///
    /// # Errors
    /// [`SessionError::NotInSession`] or [`SessionError::NotHost`].
    pub fn mark_started(
        &mut self,
        peer_id: &PeerId,
    ) -> Result<SessionInfo, SessionError> {
        let session_id = self
            .membership
            .get(peer_id)
            .ok_or_else(|| SessionError::NotInSession(peer_id.clone()))?;
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        if &entry.info.host_id != peer_id {
            return Err(SessionError::NotHost(peer_id.clone()));
        }
        entry.info.started = true;
        Ok(entry.info.clone())
    }

    /// Joinable sessions (not started, not full), newest first.
    pub fn available(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .sessions
            .values()
            .filter(|e| e.info.is_joinable())
            .map(|e| e.info.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// The session `peer_id` is in, if any.
    pub fn session_of(&self, peer_id: &PeerId) -> Option<&SessionId> {
        self.membership.get(peer_id)
    }

    /// Ids of every member of a session, host first.
    pub fn members(&self, session_id: &SessionId) -> Vec<PeerId> {
        self.sessions
            .get(session_id)
            .map(|e| e.members.iter().map(|m| m.peer_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether two peers share a session.
    pub fn same_session(&self, a: &PeerId, b: &PeerId) -> bool {
        match (self.membership.get(a), self.membership.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Descriptor of a session.
    pub fn get(&self, session_id: &SessionId) -> Option<&SessionInfo> {
        self.sessions.get(session_id).map(|e| &e.info)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn peer(id: &str) -> PeerInfo {
        let mut p = PeerInfo::connecting(PeerId::new(id), "relay");
        p.player_name = id.to_uppercase();
        p
    }

    fn descriptor(name: &str, max: usize) -> SessionInfo {
        SessionInfo::hosted(
            PeerId::new("ignored"),
            "Host",
            name,
            max,
            None,
            TransportKind::Relay,
        )
    }

    fn hosted(reg: &mut SessionRegistry, host: &str, max: usize) -> SessionId {
        reg.create(peer(host), descriptor("game", max), None)
            .unwrap()
            .session_id
    }

    #[test]
    fn test_create_sets_host_and_count() {
        let mut reg = SessionRegistry::new();
        let info = reg
            .create(peer("h"), descriptor("Julbord", 4), Some("pw".into()))
            .unwrap();
        assert_eq!(info.host_id, PeerId::new("h"));
        assert_eq!(info.current_players, 1);
        assert!(info.requires_password);
        assert_eq!(info.transport, TransportKind::Relay);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_create_twice_by_same_host_fails() {
        let mut reg = SessionRegistry::new();
        hosted(&mut reg, "h", 4);
        let err = reg.create(peer("h"), descriptor("again", 4), None);
        assert!(matches!(err, Err(SessionError::AlreadyInSession(_))));
    }

    #[test]
    fn test_join_returns_existing_members_and_increments() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 4);

        let (info, existing) = reg.join(&sid, peer("a"), None).unwrap();
        assert_eq!(info.current_players, 2);
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].peer_id, PeerId::new("h"));
        assert!(existing[0].is_host);

        assert_eq!(
            reg.members(&sid),
            vec![PeerId::new("h"), PeerId::new("a")]
        );
        assert!(reg.same_session(&PeerId::new("h"), &PeerId::new("a")));
    }

    #[test]
    fn test_join_full_session_rejected() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 2);
        reg.join(&sid, peer("a"), None).unwrap();
        let err = reg.join(&sid, peer("b"), None);
        assert!(matches!(err, Err(SessionError::SessionFull(_))));
    }

    #[test]
    fn test_join_wrong_password_rejected() {
        let mut reg = SessionRegistry::new();
        let sid = reg
            .create(peer("h"), descriptor("g", 4), Some("tomte".into()))
            .unwrap()
            .session_id;
        assert!(matches!(
            reg.join(&sid, peer("a"), Some("nisse")),
            Err(SessionError::WrongPassword(_))
        ));
        assert!(matches!(
            reg.join(&sid, peer("a"), None),
            Err(SessionError::WrongPassword(_))
        ));
        assert!(reg.join(&sid, peer("a"), Some("tomte")).is_ok());
    }

    #[test]
    fn test_join_started_session_rejected() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 4);
        reg.mark_started(&PeerId::new("h")).unwrap();
        assert!(matches!(
            reg.join(&sid, peer("a"), None),
            Err(SessionError::AlreadyStarted(_))
        ));
    }

    #[test]
    fn test_join_unknown_session_rejected() {
        let mut reg = SessionRegistry::new();
        assert!(matches!(
            reg.join(&SessionId::new("nope"), peer("a"), None),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_mark_started_by_non_host_rejected() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 4);
        reg.join(&sid, peer("a"), None).unwrap();
        assert!(matches!(
            reg.mark_started(&PeerId::new("a")),
            Err(SessionError::NotHost(_))
        ));
    }

    #[test]
    fn test_leave_non_host_keeps_session() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 4);
        reg.join(&sid, peer("a"), None).unwrap();

        let dep = reg.leave(&PeerId::new("a")).unwrap();
        assert!(!dep.closed);
        assert_eq!(dep.remaining, vec![PeerId::new("h")]);
        assert_eq!(reg.get(&sid).unwrap().current_players, 1);
        assert!(reg.session_of(&PeerId::new("a")).is_none());
    }

    #[test]
    fn test_leave_host_closes_session_for_everyone() {
        let mut reg = SessionRegistry::new();
        let sid = hosted(&mut reg, "h", 4);
        reg.join(&sid, peer("a"), None).unwrap();

        let dep = reg.leave(&PeerId::new("h")).unwrap();
        assert!(dep.closed);
        assert_eq!(dep.remaining, vec![PeerId::new("a")]);
        assert!(reg.is_empty());
        assert!(reg.session_of(&PeerId::new("a")).is_none());
    }

    #[test]
    fn test_leave_unknown_peer_returns_none() {
        let mut reg = SessionRegistry::new();
        assert!(reg.leave(&PeerId::new("ghost")).is_none());
    }

    #[test]
    fn test_available_hides_full_and_started_newest_first() {
        let mut reg = SessionRegistry::new();

        let mut old = descriptor("old", 4);
        old.created_at = Utc::now() - Duration::minutes(5);
        reg.create(peer("h1"), old, None).unwrap();

        let new = descriptor("new", 4);
        reg.create(peer("h2"), new, None).unwrap();

        let full = hosted(&mut reg, "h3", 2);
        reg.join(&full, peer("x"), None).unwrap();

        hosted(&mut reg, "h4", 4);
        reg.mark_started(&PeerId::new("h4")).unwrap();

        let names: Vec<String> =
            reg.available().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["new".to_string(), "old".to_string()]);
    }
}
