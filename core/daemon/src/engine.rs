//! The tracker engine: one owned instance holding all state, its clock,
//! its store, and its timers.
//!
//! Event handlers never return errors to the caller. The event source cannot
//! retry or be blocked, so a fault is logged and the tab simply misses that
//! update.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tabtrail_protocol::{EventEnvelope, EventType};

use crate::clock::{earliest, Clock, Debounce, Interval};
use crate::config::TrackerConfig;
use crate::navigation::apply_navigation;
use crate::persistence;
use crate::relationships::PendingRelationship;
use crate::state::{GcStats, TrackerState};
use crate::store::SnapshotStore;
use crate::types::CurrentData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerHealth {
    pub sessions: usize,
    pub active_pages: usize,
    pub running_pages: usize,
    pub relationships: usize,
    pub edges: usize,
    pub focused_tab_id: Option<i64>,
    pub browser_has_focus: bool,
    pub save_pending: bool,
}

pub struct Tracker {
    state: TrackerState,
    clock: Box<dyn Clock>,
    store: Box<dyn SnapshotStore>,
    config: TrackerConfig,
    save_timer: Debounce,
    gc_timer: Interval,
}

impl Tracker {
    /// Loads the persisted snapshot (repairing it if needed), runs one
    /// garbage-collection pass, and arms the periodic sweep.
    pub fn init(
        clock: Box<dyn Clock>,
        store: Box<dyn SnapshotStore>,
        config: TrackerConfig,
    ) -> Self {
        let state = match store.load() {
            Ok(Some(snapshot)) => {
                let (state, report) = persistence::decode(&snapshot);
                if !report.is_clean() {
                    tracing::warn!(
                        sections_reset = ?report.sections_reset,
                        sessions_dropped = report.sessions_dropped,
                        visits_dropped = report.visits_dropped,
                        visits_closed = report.visits_closed,
                        visits_reindexed = report.visits_reindexed,
                        dwell_floored = report.dwell_floored,
                        relationships_dropped = report.relationships_dropped,
                        edges_dropped = report.edges_dropped,
                        "Repaired persisted snapshot"
                    );
                }
                state
            }
            Ok(None) => TrackerState::default(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load snapshot; starting empty");
                TrackerState::default()
            }
        };

        if state.sessions.is_empty() && state.relationships.is_empty() && state.edges.is_empty() {
            tracing::info!("No persisted tracking data; starting fresh");
        } else {
            tracing::info!(
                sessions = state.sessions.len(),
                relationships = state.relationships.len(),
                edges = state.edges.len(),
                "Tracker state loaded"
            );
        }

        let mut tracker = Self {
            save_timer: Debounce::new(config.save_debounce()),
            gc_timer: Interval::new(config.gc_interval()),
            state,
            clock,
            store,
            config,
        };
        tracker.gc();
        let now = tracker.clock.now();
        tracker.gc_timer.start(now);
        tracker
    }

    /// Dispatches a validated host event.
    pub fn handle_event(&mut self, event: &EventEnvelope) {
        match event.event_type {
            EventType::TabCreated => {
                let Some(tab_id) = self.require_tab(event) else { return };
                if let Some(pending) = self.on_tab_created(tab_id, event.opener_tab_id) {
                    let opener_url = event
                        .opener_url
                        .clone()
                        .filter(|url| !url.trim().is_empty())
                        .or_else(|| self.known_url(pending.parent_tab_id));
                    self.complete_relationship(pending, opener_url);
                }
            }
            EventType::NavigationComplete => {
                let Some(tab_id) = self.require_tab(event) else { return };
                match event.url.as_deref() {
                    Some(url) => self.on_navigation_complete(tab_id, url),
                    None => tracing::warn!(tab_id, "Navigation event without url ignored"),
                }
            }
            EventType::TabActivated => {
                let Some(tab_id) = self.require_tab(event) else { return };
                self.on_tab_activated(tab_id);
            }
            EventType::BrowserFocusChanged => match event.has_focus {
                Some(has_focus) => self.on_browser_focus_changed(has_focus),
                None => tracing::warn!("Focus event without has_focus ignored"),
            },
            EventType::TabRemoved => {
                let Some(tab_id) = self.require_tab(event) else { return };
                self.on_tab_removed(tab_id);
            }
        }
    }

    /// Starts a fresh session in the tab's slot. When the tab has an opener,
    /// returns the pending relationship whose opener URL is still to be
    /// resolved.
    pub fn on_tab_created(
        &mut self,
        tab_id: i64,
        opener_tab_id: Option<i64>,
    ) -> Option<PendingRelationship> {
        let now = self.clock.now();
        let state = &mut self.state;
        if let Err(err) = state.pages.finalize(&mut state.sessions, tab_id, now) {
            tracing::warn!(error = %err, tab_id, "Dropped stale active page for reused tab id");
        }
        state.sessions.replace(tab_id, opener_tab_id, now);
        tracing::info!(tab_id, opener_tab_id = ?opener_tab_id, "Tab created");

        let pending = state.relationships.on_tab_created(tab_id, opener_tab_id);
        self.schedule_save();
        pending
    }

    /// Continuation of [`Tracker::on_tab_created`] once the opener URL is
    /// known (or known to be unavailable).
    pub fn complete_relationship(&mut self, pending: PendingRelationship, opener_url: Option<String>) {
        let now = self.clock.now();
        self.state.relationships.complete(pending, opener_url, now);
        self.schedule_save();
    }

    pub fn on_navigation_complete(&mut self, tab_id: i64, url: &str) {
        let now = self.clock.now();
        match apply_navigation(&mut self.state, tab_id, url, now) {
            Ok(outcome) => {
                tracing::debug!(
                    tab_id,
                    visit_index = outcome.visit_index,
                    edge_recorded = outcome.edge_recorded,
                    relationships_filled = outcome.relationships_filled,
                    "Navigation applied"
                );
                self.schedule_save();
            }
            Err(err) => {
                tracing::warn!(error = %err, tab_id, "Failed to process navigation");
            }
        }
    }

    pub fn on_tab_activated(&mut self, tab_id: i64) {
        let now = self.clock.now();
        let state = &mut self.state;
        state
            .focus
            .on_tab_activated(&mut state.pages, &mut state.sessions, tab_id, now);
        tracing::debug!(tab_id, "Tab activated");
        self.schedule_save();
    }

    pub fn on_browser_focus_changed(&mut self, has_focus: bool) {
        let now = self.clock.now();
        let state = &mut self.state;
        state
            .focus
            .on_browser_focus_changed(&mut state.pages, &mut state.sessions, has_focus, now);
        tracing::debug!(has_focus, "Browser focus changed");
        self.schedule_save();
    }

    pub fn on_tab_removed(&mut self, tab_id: i64) {
        let now = self.clock.now();
        let state = &mut self.state;
        if let Err(err) = state
            .focus
            .on_tab_removed(&mut state.pages, &mut state.sessions, tab_id, now)
        {
            tracing::warn!(error = %err, tab_id, "Failed to finalize removed tab");
        }
        if !state.sessions.mark_closed(tab_id, now) {
            tracing::debug!(tab_id, "Removed tab had no session");
        }
        tracing::info!(tab_id, "Tab removed");
        self.schedule_save();
    }

    /// Current URL the tracker knows for a tab: its active page, else its
    /// latest visit.
    pub fn known_url(&self, tab_id: i64) -> Option<String> {
        if let Some(page) = self.state.pages.get(tab_id) {
            return Some(page.url.clone());
        }
        self.state
            .sessions
            .get(tab_id)
            .and_then(|session| session.last_visit())
            .map(|visit| visit.url.clone())
    }

    pub fn current_data(&self) -> CurrentData {
        self.state
            .current_data(self.clock.now(), self.config.active_window())
    }

    /// Empties every record and writes the empty snapshot right away.
    pub fn clear_data(&mut self) {
        self.state.clear();
        self.save_timer.cancel();
        tracing::info!("Tracker data cleared");
        self.save();
    }

    pub fn schedule_save(&mut self) {
        let now = self.clock.now();
        self.save_timer.schedule(now);
    }

    /// Writes the full snapshot. Failures are logged; the next scheduled
    /// save is the retry.
    pub fn save(&mut self) -> bool {
        let now = self.clock.now();
        let snapshot = match persistence::encode(&self.state, now) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode snapshot");
                return false;
            }
        };
        match self.store.save(&snapshot) {
            Ok(()) => {
                tracing::debug!(sessions = self.state.sessions.len(), "Snapshot saved");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to save snapshot");
                false
            }
        }
    }

    pub fn gc(&mut self) -> GcStats {
        let now = self.clock.now();
        let stats = self.state.collect_garbage(now, self.config.max_age());
        if stats.removed_anything() {
            tracing::info!(
                sessions_removed = stats.sessions_removed,
                pages_dropped = stats.pages_dropped,
                relationships_removed = stats.relationships_removed,
                edges_removed = stats.edges_removed,
                "Garbage collection removed expired records"
            );
            self.schedule_save();
        }
        stats
    }

    /// Earliest instant at which [`Tracker::run_due_timers`] has work.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        earliest(self.save_timer.deadline(), self.gc_timer.deadline())
    }

    /// How long the engine loop may block before a timer is due.
    pub fn time_until_next_deadline(&self) -> Option<std::time::Duration> {
        let deadline = self.next_deadline()?;
        Some(
            deadline
                .signed_duration_since(self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO),
        )
    }

    pub fn run_due_timers(&mut self) {
        let now = self.clock.now();
        if self.gc_timer.take_due(now) {
            self.gc();
        }
        if self.save_timer.take_due(now) {
            self.save();
        }
    }

    /// Cancels both timers, flushing a save that was still pending.
    pub fn teardown(&mut self) {
        self.gc_timer.cancel();
        if !self.state.pages.is_empty() {
            tracing::debug!(
                pages = self.state.pages.len(),
                "Active pages left open; the next load closes them"
            );
        }
        if self.save_timer.cancel() {
            self.save();
        }
        tracing::info!("Tracker torn down");
    }

    pub fn health(&self) -> TrackerHealth {
        TrackerHealth {
            sessions: self.state.sessions.len(),
            active_pages: self.state.pages.len(),
            running_pages: self.state.pages.running_count(),
            relationships: self.state.relationships.len(),
            edges: self.state.edges.len(),
            focused_tab_id: self.state.focus.focused_tab_id(),
            browser_has_focus: self.state.focus.browser_has_focus(),
            save_pending: self.save_timer.is_pending(),
        }
    }

    fn require_tab(&self, event: &EventEnvelope) -> Option<i64> {
        if event.tab_id.is_none() {
            tracing::warn!(event_type = ?event.event_type, "Event without tab_id ignored");
        }
        event.tab_id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TrackerState {
        &self.state
    }
}
