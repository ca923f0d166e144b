//! Session registry: one slot per host tab id.
//!
//! Tab ids are reused by the host across tab lifetimes, so a tab-creation
//! event overwrites the slot instead of merging into it.

use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::types::{Session, SessionSummary};

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: HashMap<i64, Session>,
}

impl SessionRegistry {
    pub fn from_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|session| (session.tab_id, session))
                .collect(),
        }
    }

    /// Starts a fresh session for `tab_id`, replacing whatever the slot held.
    pub fn replace(
        &mut self,
        tab_id: i64,
        parent_tab_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> &mut Session {
        let session = Session::new(tab_id, parent_tab_id, now);
        match self.sessions.entry(tab_id) {
            Entry::Occupied(mut slot) => {
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        }
    }

    pub fn get_or_create(&mut self, tab_id: i64, now: DateTime<Utc>) -> &mut Session {
        self.sessions.entry(tab_id).or_insert_with(|| {
            tracing::debug!(tab_id, "Session created lazily on navigation");
            Session::new(tab_id, None, now)
        })
    }

    pub fn get(&self, tab_id: i64) -> Option<&Session> {
        self.sessions.get(&tab_id)
    }

    pub fn get_mut(&mut self, tab_id: i64) -> Option<&mut Session> {
        self.sessions.get_mut(&tab_id)
    }

    /// Marks the session closed. The record stays until garbage collection.
    pub fn mark_closed(&mut self, tab_id: i64, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(&tab_id) {
            Some(session) => {
                session.closed = Some(now);
                session.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, tab_id: i64, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(&tab_id) {
            Some(session) => {
                session.touch(now);
                true
            }
            None => false,
        }
    }

    /// Removes sessions last updated before `cutoff` and returns their tab ids.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<i64> {
        let expired: Vec<i64> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.last_update < cutoff)
            .map(|(tab_id, _)| *tab_id)
            .collect();
        for tab_id in &expired {
            self.sessions.remove(tab_id);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Session)> {
        self.sessions.iter()
    }

    /// Consumer copy: sessions with at least one visit, newest update first.
    pub fn snapshot(&self, now: DateTime<Utc>, active_window: Duration) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .values()
            .filter(|session| !session.url_sequence.is_empty())
            .map(|session| SessionSummary {
                is_active: session.is_active(now, active_window),
                session: session.clone(),
            })
            .collect();
        sessions.sort_by(|left, right| {
            right
                .session
                .last_update
                .cmp(&left.session.last_update)
                .then_with(|| left.session.tab_id.cmp(&right.session.tab_id))
        });
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn get_or_create_reuses_existing_session() {
        let mut registry = SessionRegistry::default();
        let first_id = registry.get_or_create(5, t0()).session_id.clone();
        let second_id = registry
            .get_or_create(5, t0() + Duration::seconds(1))
            .session_id
            .clone();
        assert_eq!(first_id, second_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replace_overwrites_reused_tab_id() {
        let mut registry = SessionRegistry::default();
        let session = registry.get_or_create(5, t0());
        session.push_visit("https://old.test/", "old.test", t0(), false);
        let old_id = session.session_id.clone();

        let replaced = registry.replace(5, Some(1), t0() + Duration::minutes(1));
        assert_ne!(replaced.session_id, old_id);
        assert!(replaced.url_sequence.is_empty());
        assert_eq!(replaced.parent_tab_id, Some(1));
    }

    #[test]
    fn mark_closed_keeps_record() {
        let mut registry = SessionRegistry::default();
        registry.get_or_create(5, t0());
        assert!(registry.mark_closed(5, t0() + Duration::seconds(2)));
        let session = registry.get(5).expect("session retained");
        assert_eq!(session.closed, Some(t0() + Duration::seconds(2)));
        assert!(!registry.mark_closed(99, t0()));
    }

    #[test]
    fn snapshot_filters_empty_and_sorts_newest_first() {
        let mut registry = SessionRegistry::default();
        registry.get_or_create(1, t0());
        let older = registry.get_or_create(2, t0());
        older.push_visit("https://a.test/", "a.test", t0(), false);
        let newer = registry.get_or_create(3, t0());
        newer.push_visit("https://b.test/", "b.test", t0(), false);
        newer.touch(t0() + Duration::minutes(5));

        let snapshot = registry.snapshot(t0() + Duration::minutes(5), Duration::minutes(30));
        let tabs: Vec<i64> = snapshot.iter().map(|entry| entry.session.tab_id).collect();
        assert_eq!(tabs, vec![3, 2]);
        assert!(snapshot.iter().all(|entry| entry.is_active));
    }

    #[test]
    fn evict_older_than_returns_removed_tabs() {
        let mut registry = SessionRegistry::default();
        registry.get_or_create(1, t0());
        registry.get_or_create(2, t0() + Duration::hours(2));

        let removed = registry.evict_older_than(t0() + Duration::hours(1));
        assert_eq!(removed, vec![1]);
        assert!(registry.get(2).is_some());
    }
}
