//! Snapshot encoding and defensive reconstruction.
//!
//! # Snapshot Format
//!
//! ```json
//! {
//!   "sessions": [[12, { "sessionId": "...", "tabId": 12, "urlSequence": [ ... ] }]],
//!   "edges": [ ... ],
//!   "tabRelationships": [ ... ],
//!   "lastUpdated": "2026-02-01T10:00:00Z"
//! }
//! ```
//!
//! Sessions are stored as `[tabId, session]` pairs rather than a map so tab
//! ids survive as integers.
//!
//! # Defensive Load
//!
//! The stored document may be stale, hand-edited, or written by an older
//! build. Loading never fails:
//! - A missing or mistyped section becomes an empty container
//! - A malformed entry is dropped on its own, not with its section
//! - A session missing `lastUpdate` falls back to `created` (and vice versa)
//! - `sequenceIndex` is rewritten to match position
//! - Visits left open by a previous process are closed at the session's
//!   `lastUpdate`, since no active page survives a restart
//! - Closed visits with a missing or sub-floor `dwellTime` are raised to
//!   the floor

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edges::EdgeLog;
use crate::registry::SessionRegistry;
use crate::relationships::RelationshipLog;
use crate::state::TrackerState;
use crate::types::{NavigationEdge, Session, TabRelationship, UrlVisit, DWELL_FLOOR_SECS};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotOut<'a> {
    sessions: Vec<(i64, &'a Session)>,
    edges: &'a [NavigationEdge],
    tab_relationships: &'a [TabRelationship],
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredSession {
    session_id: Option<String>,
    tab_id: Option<i64>,
    parent_tab_id: Option<i64>,
    created: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    closed: Option<DateTime<Utc>>,
    url_sequence: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub sections_reset: Vec<&'static str>,
    pub sessions_dropped: usize,
    pub visits_dropped: usize,
    pub visits_closed: usize,
    pub visits_reindexed: usize,
    pub dwell_floored: usize,
    pub relationships_dropped: usize,
    pub edges_dropped: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }
}

pub fn encode(state: &TrackerState, now: DateTime<Utc>) -> serde_json::Result<Value> {
    let mut sessions: Vec<(i64, &Session)> = state
        .sessions
        .iter()
        .map(|(tab_id, session)| (*tab_id, session))
        .collect();
    sessions.sort_by_key(|(tab_id, _)| *tab_id);

    serde_json::to_value(SnapshotOut {
        sessions,
        edges: state.edges.edges(),
        tab_relationships: state.relationships.records(),
        last_updated: now,
    })
}

/// Rebuilds tracker state from a stored snapshot, repairing what it can.
pub fn decode(snapshot: &Value) -> (TrackerState, RepairReport) {
    let mut report = RepairReport::default();
    if !snapshot.is_object() {
        report.sections_reset = vec!["sessions", "edges", "tabRelationships"];
        return (TrackerState::default(), report);
    }

    let sessions = decode_sessions(snapshot.get("sessions"), &mut report);
    let (relationships, dropped) =
        decode_list::<TabRelationship>(snapshot.get("tabRelationships"), "tabRelationships", &mut report);
    report.relationships_dropped = dropped;
    let (edges, dropped) = decode_list::<NavigationEdge>(snapshot.get("edges"), "edges", &mut report);
    report.edges_dropped = dropped;

    let state = TrackerState {
        sessions: SessionRegistry::from_sessions(sessions),
        relationships: RelationshipLog::from_records(relationships),
        edges: EdgeLog::from_edges(edges),
        ..TrackerState::default()
    };
    (state, report)
}

fn decode_list<T: DeserializeOwned>(
    section: Option<&Value>,
    name: &'static str,
    report: &mut RepairReport,
) -> (Vec<T>, usize) {
    let Some(items) = section.and_then(Value::as_array) else {
        report.sections_reset.push(name);
        return (Vec::new(), 0);
    };

    let mut decoded = Vec::with_capacity(items.len());
    let mut dropped = 0;
    for item in items {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(value) => decoded.push(value),
            Err(err) => {
                tracing::debug!(section = name, error = %err, "Dropping malformed entry");
                dropped += 1;
            }
        }
    }
    (decoded, dropped)
}

fn decode_sessions(section: Option<&Value>, report: &mut RepairReport) -> Vec<Session> {
    let Some(pairs) = section.and_then(Value::as_array) else {
        report.sections_reset.push("sessions");
        return Vec::new();
    };

    let mut sessions: Vec<Session> = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match decode_session_pair(pair, report) {
            Some(session) => {
                sessions.retain(|existing| existing.tab_id != session.tab_id);
                sessions.push(session);
            }
            None => report.sessions_dropped += 1,
        }
    }
    sessions
}

fn decode_session_pair(pair: &Value, report: &mut RepairReport) -> Option<Session> {
    let (key, body) = match pair.as_array().map(Vec::as_slice) {
        Some([key, body]) => (key, body),
        _ => return None,
    };
    let stored: StoredSession = serde_json::from_value(body.clone()).ok()?;
    let tab_id = key.as_i64().or(stored.tab_id)?;
    let created = stored.created.or(stored.last_update)?;
    let last_update = stored.last_update.unwrap_or(created).max(created);

    let mut url_sequence = Vec::new();
    if let Some(raw_visits) = stored.url_sequence.as_ref().and_then(Value::as_array) {
        for raw in raw_visits {
            match serde_json::from_value::<UrlVisit>(raw.clone()) {
                Ok(visit) => url_sequence.push(visit),
                Err(_) => report.visits_dropped += 1,
            }
        }
    }

    for (index, visit) in url_sequence.iter_mut().enumerate() {
        if visit.sequence_index != index {
            visit.sequence_index = index;
            report.visits_reindexed += 1;
        }
        if visit.is_open() {
            visit.close(last_update.max(visit.timestamp));
            report.visits_closed += 1;
        } else if !visit.dwell_time.is_some_and(|dwell| dwell >= DWELL_FLOOR_SECS) {
            visit.dwell_time = Some(DWELL_FLOOR_SECS);
            report.dwell_floored += 1;
        }
    }

    Some(Session {
        session_id: stored
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| ulid::Ulid::new().to_string()),
        tab_id,
        parent_tab_id: stored.parent_tab_id,
        created,
        last_update,
        closed: stored.closed,
        url_sequence,
    })
}
