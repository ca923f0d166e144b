//! Derived navigation edges between consecutive visits in a tab.

use chrono::{DateTime, Utc};

use crate::types::{NavigationEdge, UrlVisit};

#[derive(Debug, Clone, Default)]
pub struct EdgeLog {
    edges: Vec<NavigationEdge>,
}

impl EdgeLog {
    pub fn from_edges(edges: Vec<NavigationEdge>) -> Self {
        Self { edges }
    }

    pub fn record(&mut self, tab_id: i64, from: &UrlVisit, to: &UrlVisit, now: DateTime<Utc>) {
        self.edges.push(NavigationEdge {
            tab_id,
            from_url: from.url.clone(),
            to_url: to.url.clone(),
            from_domain: from.domain.clone(),
            to_domain: to.domain.clone(),
            timestamp: now,
        });
    }

    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.timestamp >= cutoff);
        before - self.edges.len()
    }

    pub fn edges(&self) -> &[NavigationEdge] {
        &self.edges
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
