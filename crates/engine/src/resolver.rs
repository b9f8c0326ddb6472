//! STAMP filter resolution
//!
//! Picks the single latest version a [`StampFilter`] can see.
//!
//! # Algorithm
//!
//! 1. Drop versions whose status is not allowed.
//! 2. Drop versions whose time is after the position time. Canceled
//!    STAMPs are never visible.
//! 3. Drop versions whose module fails the inclusion/exclusion lists.
//! 4. Group by path:
//!    - `Path` precedence: the filter's own path first, then each origin
//!      in breadth-first ancestry order; the first non-empty group wins.
//!    - `Time` precedence: one pool of every path in the ancestry.
//!
//!    Versions on an origin path are only visible up to that origin's
//!    (capped) time.
//! 5. Latest time wins; ties go to the earlier module in the priority
//!    list, then to the lower STAMP handle.
//!
//! The result depends only on the STAMP tuples, the path origins and the
//! filter, so concurrent resolutions never interfere.

use crate::path::PathRegistry;
use chronicle_core::{
    LanguageCoordinate, Nid, ShiftedIntSet, Stamp, StampFilter, StampPosition, StampPrecedence,
    StampSequence, Versioned,
};
use chronicle_storage::StampInterner;
use std::cmp::Reverse;
use std::sync::Arc;

/// Resolves versions against STAMP filters
#[derive(Debug, Clone)]
pub struct StampResolver {
    stamps: Arc<StampInterner>,
    paths: Arc<PathRegistry>,
}

struct Candidate<'v, V> {
    version: &'v V,
    sequence: StampSequence,
    stamp: Stamp,
}

impl StampResolver {
    /// Resolver over an interner and path registry
    pub fn new(stamps: Arc<StampInterner>, paths: Arc<PathRegistry>) -> Self {
        Self { stamps, paths }
    }

    /// Whether `stamp` passes the status, time and module checks
    pub fn passes(stamp: &Stamp, filter: &StampFilter) -> bool {
        !stamp.is_canceled()
            && filter.allowed_statuses().contains(stamp.status)
            && stamp.time <= filter.position().time
            && filter.allows_module(stamp.module)
    }

    /// Latest version visible to `filter`, or `None`
    pub fn latest<'v, V: Versioned>(&self, versions: &'v [V], filter: &StampFilter) -> Option<&'v V> {
        let candidates: Vec<Candidate<'v, V>> = versions
            .iter()
            .filter_map(|version| {
                let sequence = version.stamp_sequence();
                let stamp = self.stamps.stamp(sequence)?;
                Self::passes(&stamp, filter).then_some(Candidate {
                    version,
                    sequence,
                    stamp,
                })
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let ancestry = self.paths.ancestry(filter.position());
        match filter.precedence() {
            StampPrecedence::Path => ancestry.iter().find_map(|position| {
                best(
                    candidates.iter().filter(|c| on_position(&c.stamp, position)),
                    filter,
                )
            }),
            StampPrecedence::Time => best(
                candidates
                    .iter()
                    .filter(|c| ancestry.iter().any(|p| on_position(&c.stamp, p))),
                filter,
            ),
        }
    }

    /// Latest visible handle among `sequences`
    pub fn latest_stamp(&self, sequences: &[StampSequence], filter: &StampFilter) -> Option<StampSequence> {
        self.latest(sequences, filter).copied()
    }

    /// Every version visible to `filter` on its path or an ancestor, oldest first
    pub fn visible<'v, V: Versioned>(&self, versions: &'v [V], filter: &StampFilter) -> Vec<&'v V> {
        let ancestry = self.paths.ancestry(filter.position());
        let mut visible: Vec<(i64, StampSequence, &'v V)> = versions
            .iter()
            .filter_map(|version| {
                let stamp = self.stamps.stamp(version.stamp_sequence())?;
                (Self::passes(&stamp, filter) && ancestry.iter().any(|p| on_position(&stamp, p)))
                    .then_some((stamp.time, version.stamp_sequence(), version))
            })
            .collect();
        visible.sort_by_key(|(time, sequence, _)| (*time, *sequence));
        visible.into_iter().map(|(_, _, v)| v).collect()
    }

    /// Preferred description under `language`
    ///
    /// Candidates in another language are skipped. Ranking: description
    /// type priority, then the best-ranked dialect that accepts the
    /// description, then lowest nid.
    pub fn preferred_description<'d>(
        &self,
        candidates: &'d [DescriptionCandidate],
        language: &LanguageCoordinate,
    ) -> Option<&'d DescriptionCandidate> {
        candidates
            .iter()
            .filter(|c| c.language == language.language)
            .min_by_key(|c| {
                let dialect_rank = language
                    .dialect_priority
                    .iter()
                    .position(|d| c.acceptable_in.contains(*d))
                    .unwrap_or(language.dialect_priority.len());
                (
                    language.description_type_rank(c.description_type),
                    dialect_rank,
                    c.nid,
                )
            })
    }
}

/// One description offered to [`StampResolver::preferred_description`]
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionCandidate {
    /// Description semantic nid
    pub nid: Nid,
    /// Language concept
    pub language: Nid,
    /// Description type concept
    pub description_type: Nid,
    /// Dialect assemblages in which the description is acceptable
    pub acceptable_in: ShiftedIntSet,
}

fn on_position(stamp: &Stamp, position: &StampPosition) -> bool {
    stamp.path == position.path && stamp.time <= position.time
}

fn best<'a, 'v: 'a, V: 'v>(
    candidates: impl Iterator<Item = &'a Candidate<'v, V>>,
    filter: &StampFilter,
) -> Option<&'v V> {
    candidates
        .min_by_key(|c| {
            (
                Reverse(c.stamp.time),
                filter.module_rank(c.stamp.module),
                c.sequence,
            )
        })
        .map(|c| c.version)
}
