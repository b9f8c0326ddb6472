//! Taxonomy snapshot
//!
//! Answers is-a questions against one taxonomy assemblage as seen through a
//! [`ViewCoordinate`]. An edge counts when the latest STAMP for it that the
//! view can see (of either status) is active, so retiring an edge means
//! adding an inactive STAMP for the same target.

use crate::provider::CacheThroughProvider;
use chronicle_core::{
    Nid, Result, StampFilter, StatusSet, TaxonomyRecord, ViewCoordinate, CHILD_FLAG, PARENT_FLAG,
};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

/// Taxonomy view bound to a provider and a coordinate
#[derive(Debug, Clone)]
pub struct TaxonomySnapshot {
    provider: Arc<CacheThroughProvider>,
    view: ViewCoordinate,
    assemblage: Nid,
    edge_filter: StampFilter,
}

impl TaxonomySnapshot {
    /// Snapshot of the taxonomy selected by `view`'s premise
    pub fn new(provider: Arc<CacheThroughProvider>, view: ViewCoordinate) -> Self {
        let assemblage = view.taxonomy_assemblage();
        Self::for_assemblage(provider, view, assemblage)
    }

    /// Snapshot of an explicit taxonomy assemblage
    pub fn for_assemblage(provider: Arc<CacheThroughProvider>, view: ViewCoordinate, assemblage: Nid) -> Self {
        let edge_filter = view
            .stamp_filter
            .with_allowed_statuses(StatusSet::ACTIVE_AND_INACTIVE);
        Self {
            provider,
            view,
            assemblage,
            edge_filter,
        }
    }

    /// View this snapshot resolves under
    pub fn view(&self) -> &ViewCoordinate {
        &self.view
    }

    /// Taxonomy assemblage
    pub fn assemblage(&self) -> Nid {
        self.assemblage
    }

    /// Direct parents of `nid`, ascending
    pub fn parents(&self, nid: Nid) -> Result<Vec<Nid>> {
        self.targets(nid, PARENT_FLAG)
    }

    /// Direct children of `nid`, ascending
    pub fn children(&self, nid: Nid) -> Result<Vec<Nid>> {
        self.targets(nid, CHILD_FLAG)
    }

    /// Whether `nid` is `ancestor` or one of its descendants
    pub fn is_kind_of(&self, nid: Nid, ancestor: Nid) -> Result<bool> {
        if nid == ancestor {
            return Ok(true);
        }
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([nid]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for parent in self.parents(current)? {
                if parent == ancestor {
                    return Ok(true);
                }
                queue.push_back(parent);
            }
        }
        Ok(false)
    }

    /// Every proper ancestor of `nid`, in breadth-first order
    pub fn ancestors(&self, nid: Nid) -> Result<Vec<Nid>> {
        let mut seen = FxHashSet::default();
        seen.insert(nid);
        let mut out = Vec::new();
        let mut queue = VecDeque::from([nid]);
        while let Some(current) = queue.pop_front() {
            for parent in self.parents(current)? {
                if seen.insert(parent) {
                    out.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        Ok(out)
    }

    fn targets(&self, nid: Nid, flag: i32) -> Result<Vec<Nid>> {
        let Some(data) = self.provider.taxonomy_data(self.assemblage, nid)? else {
            return Ok(Vec::new());
        };
        let record = TaxonomyRecord::from_array(&data)?;
        let resolver = self.provider.resolver();
        let mut present = Vec::new();
        for target in record.targets(flag).iter() {
            let stamps = record.stamps_for(target, flag);
            let visible = resolver
                .latest_stamp(&stamps, &self.edge_filter)
                .and_then(|sequence| self.provider.stamp(sequence))
                .map(|stamp| stamp.status.is_active())
                .unwrap_or(false);
            if visible {
                present.push(target);
            }
        }
        present.sort_unstable();
        Ok(present)
    }
}
