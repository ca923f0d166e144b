//! Opener → child tab spawn log.
//!
//! Recording a spawn is a two-step continuation: `on_tab_created` hands back
//! a [`PendingRelationship`] while the opener URL is being resolved, and
//! `complete` appends the record once it is known. Later events are free to
//! run in between; back-fill only ever looks records up by child tab id.

use chrono::{DateTime, Utc};

use crate::types::TabRelationship;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRelationship {
    pub parent_tab_id: i64,
    pub child_tab_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipLog {
    records: Vec<TabRelationship>,
}

impl RelationshipLog {
    pub fn from_records(records: Vec<TabRelationship>) -> Self {
        Self { records }
    }

    pub fn on_tab_created(
        &self,
        tab_id: i64,
        opener_tab_id: Option<i64>,
    ) -> Option<PendingRelationship> {
        opener_tab_id.map(|parent_tab_id| PendingRelationship {
            parent_tab_id,
            child_tab_id: tab_id,
        })
    }

    pub fn complete(
        &mut self,
        pending: PendingRelationship,
        opener_url: Option<String>,
        now: DateTime<Utc>,
    ) {
        tracing::debug!(
            parent_tab_id = pending.parent_tab_id,
            child_tab_id = pending.child_tab_id,
            has_opener_url = opener_url.is_some(),
            "Tab relationship recorded"
        );
        self.records.push(TabRelationship {
            parent_tab_id: pending.parent_tab_id,
            child_tab_id: pending.child_tab_id,
            timestamp: now,
            opener_url,
            target_url: None,
        });
    }

    /// Fills `target_url` on every unfilled record for the child tab.
    /// Records that already have a target are left alone.
    pub fn backfill_target(&mut self, child_tab_id: i64, url: &str) -> usize {
        let mut updated = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|record| record.child_tab_id == child_tab_id && record.target_url.is_none())
        {
            record.target_url = Some(url.to_string());
            updated += 1;
        }
        updated
    }

    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|record| record.timestamp >= cutoff);
        before - self.records.len()
    }

    pub fn records(&self) -> &[TabRelationship] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
