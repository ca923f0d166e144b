//! Records owned by the tracker and exposed to consumers.
//!
//! Field names are camelCase on the wire; the visualizer reads them as-is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Smallest dwell time recorded for a finalized visit, in seconds.
pub const DWELL_FLOOR_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlVisit {
    pub url: String,
    pub domain: String,
    /// When the navigation completed.
    #[serde(alias = "startTime")]
    pub timestamp: DateTime<Utc>,
    /// `None` while this is the tab's open visit.
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated foreground seconds.
    pub dwell_time: Option<f64>,
    pub sequence_index: usize,
    pub was_active: bool,
}

impl UrlVisit {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn add_dwell(&mut self, seconds: f64) {
        let current = self.dwell_time.unwrap_or(0.0);
        self.dwell_time = Some(current + seconds.max(0.0));
    }

    /// Closes the visit, applying the dwell floor.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
        self.dwell_time = Some(self.dwell_time.unwrap_or(0.0).max(DWELL_FLOOR_SECS));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub tab_id: i64,
    pub parent_tab_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
    pub url_sequence: Vec<UrlVisit>,
}

impl Session {
    pub fn new(tab_id: i64, parent_tab_id: Option<i64>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: ulid::Ulid::new().to_string(),
            tab_id,
            parent_tab_id,
            created: now,
            last_update: now,
            closed: None,
            url_sequence: Vec::new(),
        }
    }

    /// Computed on read; never persisted.
    pub fn is_active(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.closed.is_none() && now.signed_duration_since(self.last_update) < window
    }

    /// Moves `last_update` forward; an earlier `now` is ignored.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_update {
            self.last_update = now;
        }
    }

    pub fn last_visit(&self) -> Option<&UrlVisit> {
        self.url_sequence.last()
    }

    pub fn open_visit_count(&self) -> usize {
        self.url_sequence.iter().filter(|visit| visit.is_open()).count()
    }

    /// Appends a visit with the next sequence index and returns that index.
    pub fn push_visit(
        &mut self,
        url: &str,
        domain: &str,
        now: DateTime<Utc>,
        was_active: bool,
    ) -> usize {
        let index = self.url_sequence.len();
        self.url_sequence.push(UrlVisit {
            url: url.to_string(),
            domain: domain.to_string(),
            timestamp: now,
            end_time: None,
            dwell_time: None,
            sequence_index: index,
            was_active,
        });
        index
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRelationship {
    pub parent_tab_id: i64,
    pub child_tab_id: i64,
    pub timestamp: DateTime<Utc>,
    pub opener_url: Option<String>,
    /// Set once, by the child's first completed navigation.
    pub target_url: Option<String>,
}

/// Derived view of consecutive visits within one tab. `urlSequence` stays
/// the authoritative record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEdge {
    pub tab_id: i64,
    pub from_url: String,
    pub to_url: String,
    pub from_domain: String,
    pub to_domain: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub is_active: bool,
}

/// Point-in-time copy handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentData {
    pub sessions: Vec<SessionSummary>,
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub total_edges: usize,
    pub total_visits: usize,
    pub tab_relationships: Vec<TabRelationship>,
}

pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
}
