//! Navigation-complete processing.
//!
//! Scheme filtering happens before this point (protocol validation), so
//! every URL reaching here is an http(s) address with a host.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{Result, TrackerError};
use crate::state::TrackerState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub visit_index: usize,
    pub edge_recorded: bool,
    pub relationships_filled: usize,
}

/// Hostname of `url`, or an empty string when it has none.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Closes out the page being left and opens a visit for `url`.
pub fn apply_navigation(
    state: &mut TrackerState,
    tab_id: i64,
    url: &str,
    now: DateTime<Utc>,
) -> Result<NavigationOutcome> {
    if let Err(err) = state.pages.finalize(&mut state.sessions, tab_id, now) {
        tracing::warn!(error = %err, tab_id, "Dropped stale active page before navigation");
    }

    let domain = domain_of(url);
    let was_active = state.focus.is_focused(tab_id);
    let session = state.sessions.get_or_create(tab_id, now);
    let visit_index = session.push_visit(url, &domain, now, was_active);
    let open_visits = session.open_visit_count();
    if open_visits > 1 {
        tracing::warn!(tab_id, open_visits, "Tab has more than one open visit");
    }

    let edge_recorded = match visit_index
        .checked_sub(1)
        .and_then(|previous| session.url_sequence.get(previous))
    {
        Some(previous) => {
            let current = session
                .url_sequence
                .get(visit_index)
                .ok_or(TrackerError::VisitMissing {
                    tab_id,
                    index: visit_index,
                })?;
            state.edges.record(tab_id, previous, current, now);
            true
        }
        None => false,
    };

    let running = state.focus.should_run(tab_id);
    state
        .pages
        .begin(&mut state.sessions, tab_id, visit_index, running, now)?;
    state.sessions.touch(tab_id, now);

    let relationships_filled = state.relationships.backfill_target(tab_id, url);

    tracing::info!(
        tab_id,
        domain = %domain,
        visit_index,
        was_active,
        running,
        relationships_filled,
        "Navigation recorded"
    );

    Ok(NavigationOutcome {
        visit_index,
        edge_recorded,
        relationships_filled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    #[test]
    fn domain_of_extracts_lowercase_host() {
        assert_eq!(domain_of("https://News.Example.com:8443/a?b"), "news.example.com");
        assert_eq!(domain_of("garbage"), "");
    }

    #[test]
    fn navigation_closes_previous_visit_and_opens_new_one() {
        let mut state = TrackerState::default();
        apply_navigation(&mut state, 1, "https://a.test/", at(0)).expect("first");
        let outcome = apply_navigation(&mut state, 1, "https://b.test/x", at(3)).expect("second");

        assert_eq!(outcome.visit_index, 1);
        assert!(outcome.edge_recorded);
        let session = state.sessions.get(1).expect("session");
        assert_eq!(session.url_sequence[0].end_time, Some(at(3)));
        assert_eq!(session.url_sequence[0].dwell_time, Some(3.0));
        assert!(session.url_sequence[1].is_open());
        assert_eq!(session.url_sequence[1].domain, "b.test");
        assert_eq!(session.open_visit_count(), 1);
        assert_eq!(state.edges.len(), 1);
        assert_eq!(state.edges.edges()[0].from_domain, "a.test");
    }

    #[test]
    fn was_active_reflects_focused_tab() {
        let mut state = TrackerState::default();
        state
            .focus
            .on_tab_activated(&mut state.pages, &mut state.sessions, 2, at(0));
        apply_navigation(&mut state, 1, "https://a.test/", at(1)).expect("background");
        apply_navigation(&mut state, 2, "https://b.test/", at(1)).expect("foreground");

        assert!(!state.sessions.get(1).expect("tab 1").url_sequence[0].was_active);
        assert!(state.sessions.get(2).expect("tab 2").url_sequence[0].was_active);
        assert!(!state.pages.get(1).expect("page 1").is_running());
    }

    #[test]
    fn sequence_indices_match_positions() {
        let mut state = TrackerState::default();
        for (offset, url) in ["https://a.test/", "https://b.test/", "https://c.test/"]
            .iter()
            .enumerate()
        {
            apply_navigation(&mut state, 1, url, at(offset as i64)).expect("navigate");
        }

        let session = state.sessions.get(1).expect("session");
        for (index, visit) in session.url_sequence.iter().enumerate() {
            assert_eq!(visit.sequence_index, index);
        }
        assert!(session
            .url_sequence
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }
}
