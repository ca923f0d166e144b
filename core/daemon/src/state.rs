//! In-memory state owned by the tracker.
//!
//! Everything here is mutated only from the engine thread, so none of it is
//! behind a lock. Consumers get deep copies via [`TrackerState::current_data`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::active_page::ActivePageTracker;
use crate::edges::EdgeLog;
use crate::focus::FocusCoordinator;
use crate::registry::SessionRegistry;
use crate::relationships::RelationshipLog;
use crate::types::CurrentData;

#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    pub sessions: SessionRegistry,
    pub pages: ActivePageTracker,
    pub focus: FocusCoordinator,
    pub relationships: RelationshipLog,
    pub edges: EdgeLog,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub sessions_removed: usize,
    pub pages_dropped: usize,
    pub relationships_removed: usize,
    pub edges_removed: usize,
}

impl GcStats {
    pub fn removed_anything(&self) -> bool {
        self.sessions_removed > 0 || self.relationships_removed > 0 || self.edges_removed > 0
    }
}

impl TrackerState {
    pub fn current_data(&self, now: DateTime<Utc>, active_window: Duration) -> CurrentData {
        let sessions = self.sessions.snapshot(now, active_window);
        let active_sessions = sessions.iter().filter(|entry| entry.is_active).count();
        let total_visits = sessions
            .iter()
            .map(|entry| entry.session.url_sequence.len())
            .sum();

        CurrentData {
            active_sessions,
            total_sessions: sessions.len(),
            total_edges: self.edges.len(),
            total_visits,
            tab_relationships: self.relationships.records().to_vec(),
            sessions,
        }
    }

    /// Removes sessions, relationships and edges older than `max_age`.
    /// Active pages of removed sessions go with them.
    pub fn collect_garbage(&mut self, now: DateTime<Utc>, max_age: Duration) -> GcStats {
        let cutoff = now - max_age;
        let removed_tabs = self.sessions.evict_older_than(cutoff);
        let pages_dropped = removed_tabs
            .iter()
            .filter(|tab_id| self.pages.forget(**tab_id))
            .count();

        GcStats {
            sessions_removed: removed_tabs.len(),
            pages_dropped,
            relationships_removed: self.relationships.evict_older_than(cutoff),
            edges_removed: self.edges.evict_older_than(cutoff),
        }
    }

    /// Drops every record. Focus state survives; it describes the browser,
    /// not the history.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.pages.clear();
        self.relationships.clear();
        self.edges.clear();
    }
}
