//! Active-page tracking: the one unfinalized visit per tab and its timer.
//!
//! Dwell time accumulates in segments. `pause` banks the running segment
//! into the visit, `resume` opens a new one, and `finalize` banks whatever
//! is still running and closes the visit. A tab with no entry here has no
//! active page.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{Result, TrackerError};
use crate::registry::SessionRegistry;
use crate::types::{seconds_between, UrlVisit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTimer {
    Running { since: DateTime<Utc> },
    Paused { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePage {
    pub tab_id: i64,
    pub url: String,
    pub domain: String,
    /// Lookup key into the owning session's `url_sequence`, not ownership.
    pub url_visit_index: usize,
    pub timer: PageTimer,
}

impl ActivePage {
    pub fn is_running(&self) -> bool {
        matches!(self.timer, PageTimer::Running { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivePageTracker {
    pages: HashMap<i64, ActivePage>,
}

impl ActivePageTracker {
    /// Finalizes any page already tracked for the tab, then starts timing
    /// the visit at `visit_index`.
    pub fn begin(
        &mut self,
        sessions: &mut SessionRegistry,
        tab_id: i64,
        visit_index: usize,
        running: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.finalize(sessions, tab_id, now)?;

        let session = sessions
            .get(tab_id)
            .ok_or(TrackerError::UnknownTab { tab_id })?;
        let visit = session
            .url_sequence
            .get(visit_index)
            .filter(|visit| visit.is_open())
            .ok_or(TrackerError::VisitMissing {
                tab_id,
                index: visit_index,
            })?;

        let timer = if running {
            PageTimer::Running { since: now }
        } else {
            PageTimer::Paused { at: now }
        };
        self.pages.insert(
            tab_id,
            ActivePage {
                tab_id,
                url: visit.url.clone(),
                domain: visit.domain.clone(),
                url_visit_index: visit_index,
                timer,
            },
        );
        tracing::debug!(tab_id, visit_index, running, "Active page started");
        Ok(())
    }

    /// Banks the running segment. Returns false when there was nothing to
    /// pause.
    pub fn pause(
        &mut self,
        sessions: &mut SessionRegistry,
        tab_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(page) = self.pages.get(&tab_id) else {
            return Ok(false);
        };
        let PageTimer::Running { since } = page.timer else {
            return Ok(false);
        };

        let visit = match resolve_visit(sessions, page) {
            Ok(visit) => visit,
            Err(err) => {
                self.pages.remove(&tab_id);
                return Err(err);
            }
        };
        visit.add_dwell(seconds_between(since, now));

        if let Some(page) = self.pages.get_mut(&tab_id) {
            page.timer = PageTimer::Paused { at: now };
        }
        Ok(true)
    }

    /// Starts a new segment for a paused page. A page that is already
    /// running keeps its segment start so no elapsed time is dropped.
    pub fn resume(&mut self, tab_id: i64, now: DateTime<Utc>) -> bool {
        match self.pages.get_mut(&tab_id) {
            Some(page) => match page.timer {
                PageTimer::Paused { .. } => {
                    page.timer = PageTimer::Running { since: now };
                    true
                }
                PageTimer::Running { .. } => false,
            },
            None => false,
        }
    }

    /// Closes the tab's active visit and forgets the page. Returns false when
    /// the tab had no active page.
    pub fn finalize(
        &mut self,
        sessions: &mut SessionRegistry,
        tab_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(page) = self.pages.remove(&tab_id) else {
            return Ok(false);
        };

        let visit = resolve_visit(sessions, &page)?;
        if let PageTimer::Running { since } = page.timer {
            visit.add_dwell(seconds_between(since, now));
        }
        visit.close(now);
        tracing::debug!(
            tab_id,
            visit_index = page.url_visit_index,
            dwell_secs = visit.dwell_time.unwrap_or_default(),
            "Active page finalized"
        );
        Ok(true)
    }

    pub fn get(&self, tab_id: i64) -> Option<&ActivePage> {
        self.pages.get(&tab_id)
    }

    pub fn running_count(&self) -> usize {
        self.pages.values().filter(|page| page.is_running()).count()
    }

    pub fn tab_ids(&self) -> Vec<i64> {
        let mut tab_ids: Vec<i64> = self.pages.keys().copied().collect();
        tab_ids.sort_unstable();
        tab_ids
    }

    /// Drops pages without touching their visits; used when the owning
    /// session no longer exists.
    pub fn forget(&mut self, tab_id: i64) -> bool {
        self.pages.remove(&tab_id).is_some()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Re-resolves the page's visit by key. A slot that was replaced or a visit
/// that was already closed counts as missing.
fn resolve_visit<'a>(
    sessions: &'a mut SessionRegistry,
    page: &ActivePage,
) -> Result<&'a mut UrlVisit> {
    let tab_id = page.tab_id;
    let session = sessions
        .get_mut(tab_id)
        .ok_or(TrackerError::UnknownTab { tab_id })?;
    session
        .url_sequence
        .get_mut(page.url_visit_index)
        .filter(|visit| visit.is_open() && visit.url == page.url)
        .ok_or(TrackerError::VisitMissing {
            tab_id,
            index: page.url_visit_index,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn registry_with_visit(tab_id: i64) -> (SessionRegistry, usize) {
        let mut registry = SessionRegistry::default();
        let index = registry
            .get_or_create(tab_id, t0())
            .push_visit("https://a.test/", "a.test", t0(), true);
        (registry, index)
    }

    fn dwell(registry: &SessionRegistry, tab_id: i64, index: usize) -> Option<f64> {
        registry.get(tab_id).expect("session").url_sequence[index].dwell_time
    }

    #[test]
    fn pause_and_resume_accumulate_segments() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(0))
            .expect("begin");

        assert!(pages.pause(&mut registry, 1, at(4)).expect("pause"));
        assert!(!pages.pause(&mut registry, 1, at(6)).expect("second pause"));
        assert!(pages.resume(1, at(10)));
        assert!(pages.finalize(&mut registry, 1, at(13)).expect("finalize"));

        assert_eq!(dwell(&registry, 1, index), Some(7.0));
        let visit = &registry.get(1).expect("session").url_sequence[index];
        assert_eq!(visit.end_time, Some(at(13)));
        assert!(pages.get(1).is_none());
    }

    #[test]
    fn finalize_while_paused_adds_nothing_more() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(0))
            .expect("begin");
        pages.pause(&mut registry, 1, at(3)).expect("pause");
        pages.finalize(&mut registry, 1, at(60)).expect("finalize");

        assert_eq!(dwell(&registry, 1, index), Some(3.0));
    }

    #[test]
    fn resume_while_running_keeps_segment_start() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(0))
            .expect("begin");
        assert!(!pages.resume(1, at(5)));
        pages.finalize(&mut registry, 1, at(8)).expect("finalize");

        assert_eq!(dwell(&registry, 1, index), Some(8.0));
    }

    #[test]
    fn begin_paused_accrues_nothing_until_resumed() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, false, at(0))
            .expect("begin");
        pages.resume(1, at(20));
        pages.finalize(&mut registry, 1, at(22)).expect("finalize");

        assert_eq!(dwell(&registry, 1, index), Some(2.0));
    }

    #[test]
    fn near_instant_visit_gets_floor() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(0))
            .expect("begin");
        pages.finalize(&mut registry, 1, at(0)).expect("finalize");

        assert_eq!(dwell(&registry, 1, index), Some(0.1));
    }

    #[test]
    fn clock_skew_never_produces_negative_dwell() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(10))
            .expect("begin");
        pages.finalize(&mut registry, 1, at(4)).expect("finalize");

        assert_eq!(dwell(&registry, 1, index), Some(0.1));
    }

    #[test]
    fn operations_without_active_page_are_noops() {
        let mut registry = SessionRegistry::default();
        let mut pages = ActivePageTracker::default();
        assert!(!pages.pause(&mut registry, 9, at(0)).expect("pause"));
        assert!(!pages.resume(9, at(0)));
        assert!(!pages.finalize(&mut registry, 9, at(0)).expect("finalize"));
    }

    #[test]
    fn finalize_reports_missing_session_and_drops_page() {
        let (mut registry, index) = registry_with_visit(1);
        let mut pages = ActivePageTracker::default();
        pages
            .begin(&mut registry, 1, index, true, at(0))
            .expect("begin");
        registry.clear();

        let err = pages
            .finalize(&mut registry, 1, at(5))
            .expect_err("session gone");
        assert!(matches!(err, TrackerError::UnknownTab { tab_id: 1 }));
        assert!(pages.is_empty());
    }

    #[test]
    fn begin_rejects_closed_visit() {
        let (mut registry, index) = registry_with_visit(1);
        registry.get_mut(1).expect("session").url_sequence[index].close(at(1));
        let mut pages = ActivePageTracker::default();

        let err = pages
            .begin(&mut registry, 1, index, true, at(2))
            .expect_err("closed visit");
        assert!(matches!(err, TrackerError::VisitMissing { .. }));
    }
}
