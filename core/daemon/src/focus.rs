//! Focus coordination.
//!
//! Two independent axes decide whether a page accrues dwell time: which tab
//! is selected, and whether the browser window is foreground. Both collapse
//! into pause/resume calls on the active-page tracker.

use chrono::{DateTime, Utc};

use crate::active_page::ActivePageTracker;
use crate::error::Result;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone)]
pub struct FocusCoordinator {
    focused_tab_id: Option<i64>,
    browser_has_focus: bool,
}

impl Default for FocusCoordinator {
    fn default() -> Self {
        Self {
            focused_tab_id: None,
            browser_has_focus: true,
        }
    }
}

impl FocusCoordinator {
    pub fn focused_tab_id(&self) -> Option<i64> {
        self.focused_tab_id
    }

    pub fn browser_has_focus(&self) -> bool {
        self.browser_has_focus
    }

    pub fn is_focused(&self, tab_id: i64) -> bool {
        self.focused_tab_id == Some(tab_id)
    }

    /// Whether a page starting now in `tab_id` should start its timer.
    /// Before the first activation the selected tab is unknown, so any
    /// foreground tab counts.
    pub fn should_run(&self, tab_id: i64) -> bool {
        self.browser_has_focus
            && self
                .focused_tab_id
                .map(|focused| focused == tab_id)
                .unwrap_or(true)
    }

    pub fn on_tab_activated(
        &mut self,
        pages: &mut ActivePageTracker,
        sessions: &mut SessionRegistry,
        tab_id: i64,
        now: DateTime<Utc>,
    ) {
        // Pages loaded before the first activation run with no focused tab,
        // so every other page is paused here, not only the previous one.
        for other in pages.tab_ids().into_iter().filter(|other| *other != tab_id) {
            if let Err(err) = pages.pause(sessions, other, now) {
                tracing::warn!(error = %err, tab_id = other, "Failed to pause unselected tab");
            }
        }

        if self.browser_has_focus {
            pages.resume(tab_id, now);
        }
        self.focused_tab_id = Some(tab_id);
        sessions.touch(tab_id, now);
    }

    pub fn on_browser_focus_changed(
        &mut self,
        pages: &mut ActivePageTracker,
        sessions: &mut SessionRegistry,
        has_focus: bool,
        now: DateTime<Utc>,
    ) {
        self.browser_has_focus = has_focus;

        if !has_focus {
            for tab_id in pages.tab_ids() {
                if let Err(err) = pages.pause(sessions, tab_id, now) {
                    tracing::warn!(error = %err, tab_id, "Failed to pause tab on focus loss");
                }
            }
            return;
        }

        if let Some(tab_id) = self.focused_tab_id {
            pages.resume(tab_id, now);
        }
    }

    pub fn on_tab_removed(
        &mut self,
        pages: &mut ActivePageTracker,
        sessions: &mut SessionRegistry,
        tab_id: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let finalized = pages.finalize(sessions, tab_id, now);
        if self.focused_tab_id == Some(tab_id) {
            self.focused_tab_id = None;
        }
        finalized.map(|_| ())
    }
}
