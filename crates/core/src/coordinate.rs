//! Coordinate value types
//!
//! Coordinates are immutable snapshots handed to the resolver. To change one
//! axis, build an analog with one of the `with_*` methods; the original is
//! left untouched, so a filter can be shared across threads freely.

use crate::intset::ShiftedIntSet;
use crate::stamp::UNCOMMITTED_TIME;
use crate::types::{Nid, Status};

/// Set of allowed STAMP statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusSet {
    active: bool,
    inactive: bool,
}

impl StatusSet {
    /// Only ACTIVE versions are visible
    pub const ACTIVE_ONLY: StatusSet = StatusSet {
        active: true,
        inactive: false,
    };

    /// Only INACTIVE versions are visible
    pub const INACTIVE_ONLY: StatusSet = StatusSet {
        active: false,
        inactive: true,
    };

    /// Both statuses are visible
    pub const ACTIVE_AND_INACTIVE: StatusSet = StatusSet {
        active: true,
        inactive: true,
    };

    /// Build from a list of statuses
    pub fn of(statuses: &[Status]) -> Self {
        Self {
            active: statuses.contains(&Status::Active),
            inactive: statuses.contains(&Status::Inactive),
        }
    }

    /// Membership test
    pub fn contains(&self, status: Status) -> bool {
        match status {
            Status::Active => self.active,
            Status::Inactive => self.inactive,
        }
    }

    /// Whether nothing is allowed
    pub fn is_empty(&self) -> bool {
        !self.active && !self.inactive
    }
}

/// A point on a path: "as of `time` on `path`"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StampPosition {
    /// Path concept nid
    pub path: Nid,
    /// Inclusive upper time bound, epoch milliseconds
    pub time: i64,
}

impl StampPosition {
    /// Create a position
    pub fn new(path: Nid, time: i64) -> Self {
        Self { path, time }
    }

    /// Position at the end of time on `path`, including uncommitted edits
    pub fn latest(path: Nid) -> Self {
        Self {
            path,
            time: UNCOMMITTED_TIME,
        }
    }

    /// Same path, different time
    pub fn with_time(&self, time: i64) -> Self {
        Self { time, ..*self }
    }

    /// Same time, different path
    pub fn with_path(&self, path: Nid) -> Self {
        Self { path, ..*self }
    }
}

/// How competing versions on different paths are ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StampPrecedence {
    /// Prefer the filter's own path; consult origin paths only if it has no candidate
    Path,
    /// Rank every visible path's versions by time alone
    Time,
}

/// Which STAMPs are visible and how ties resolve
#[derive(Debug, Clone, PartialEq)]
pub struct StampFilter {
    allowed_statuses: StatusSet,
    position: StampPosition,
    modules: ShiftedIntSet,
    excluded_modules: ShiftedIntSet,
    module_priority: Vec<Nid>,
    precedence: StampPrecedence,
}

impl StampFilter {
    /// Filter with PATH precedence and no module restrictions
    pub fn new(allowed_statuses: StatusSet, position: StampPosition) -> Self {
        Self {
            allowed_statuses,
            position,
            modules: ShiftedIntSet::new(),
            excluded_modules: ShiftedIntSet::new(),
            module_priority: Vec::new(),
            precedence: StampPrecedence::Path,
        }
    }

    /// Active-only view of the latest state of `path`
    pub fn development_latest_active_only(path: Nid) -> Self {
        Self::new(StatusSet::ACTIVE_ONLY, StampPosition::latest(path))
    }

    /// Allowed statuses
    pub fn allowed_statuses(&self) -> StatusSet {
        self.allowed_statuses
    }

    /// As-of position
    pub fn position(&self) -> StampPosition {
        self.position
    }

    /// Included modules; empty means every module
    pub fn modules(&self) -> &ShiftedIntSet {
        &self.modules
    }

    /// Excluded modules
    pub fn excluded_modules(&self) -> &ShiftedIntSet {
        &self.excluded_modules
    }

    /// Module priority list, highest priority first
    pub fn module_priority(&self) -> &[Nid] {
        &self.module_priority
    }

    /// Precedence rule
    pub fn precedence(&self) -> StampPrecedence {
        self.precedence
    }

    /// Whether a module passes the inclusion and exclusion lists
    pub fn allows_module(&self, module: Nid) -> bool {
        (self.modules.is_empty() || self.modules.contains(module))
            && !self.excluded_modules.contains(module)
    }

    /// Rank of a module in the priority list; unlisted modules rank last
    pub fn module_rank(&self, module: Nid) -> usize {
        self.module_priority
            .iter()
            .position(|m| *m == module)
            .unwrap_or(self.module_priority.len())
    }

    /// Analog with a different time
    pub fn with_time(&self, time: i64) -> Self {
        Self {
            position: self.position.with_time(time),
            ..self.clone()
        }
    }

    /// Analog with a different path
    pub fn with_path(&self, path: Nid) -> Self {
        Self {
            position: self.position.with_path(path),
            ..self.clone()
        }
    }

    /// Analog with a different position
    pub fn with_position(&self, position: StampPosition) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }

    /// Analog with different allowed statuses
    pub fn with_allowed_statuses(&self, allowed_statuses: StatusSet) -> Self {
        Self {
            allowed_statuses,
            ..self.clone()
        }
    }

    /// Analog restricted to the given modules
    pub fn with_modules(&self, modules: impl IntoIterator<Item = Nid>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Analog excluding the given modules
    pub fn with_excluded_modules(&self, modules: impl IntoIterator<Item = Nid>) -> Self {
        Self {
            excluded_modules: modules.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Analog with a module priority list
    pub fn with_module_priority(&self, priority: Vec<Nid>) -> Self {
        Self {
            module_priority: priority,
            ..self.clone()
        }
    }

    /// Analog with a different precedence
    pub fn with_precedence(&self, precedence: StampPrecedence) -> Self {
        Self {
            precedence,
            ..self.clone()
        }
    }
}

/// Language and dialect preferences for description selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageCoordinate {
    /// Language concept nid
    pub language: Nid,
    /// Description type concepts, most preferred first
    pub description_type_priority: Vec<Nid>,
    /// Dialect assemblages, most preferred first
    pub dialect_priority: Vec<Nid>,
}

impl LanguageCoordinate {
    /// Create a language coordinate
    pub fn new(language: Nid, description_type_priority: Vec<Nid>, dialect_priority: Vec<Nid>) -> Self {
        Self {
            language,
            description_type_priority,
            dialect_priority,
        }
    }

    /// Rank of a description type; unlisted types rank last
    pub fn description_type_rank(&self, description_type: Nid) -> usize {
        self.description_type_priority
            .iter()
            .position(|t| *t == description_type)
            .unwrap_or(self.description_type_priority.len())
    }
}

/// Which taxonomy a view follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PremiseType {
    /// Author-stated relationships
    Stated,
    /// Classifier-inferred relationships
    Inferred,
}

/// Taxonomy assemblages for the stated and inferred premises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicCoordinate {
    /// Assemblage holding stated taxonomy records
    pub stated_assemblage: Nid,
    /// Assemblage holding inferred taxonomy records
    pub inferred_assemblage: Nid,
}

impl LogicCoordinate {
    /// Create a logic coordinate
    pub fn new(stated_assemblage: Nid, inferred_assemblage: Nid) -> Self {
        Self {
            stated_assemblage,
            inferred_assemblage,
        }
    }

    /// Taxonomy assemblage for a premise
    pub fn taxonomy_assemblage(&self, premise: PremiseType) -> Nid {
        match premise {
            PremiseType::Stated => self.stated_assemblage,
            PremiseType::Inferred => self.inferred_assemblage,
        }
    }
}

/// STAMP, language and logic coordinates composed into one view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewCoordinate {
    /// Version visibility
    pub stamp_filter: StampFilter,
    /// Description preferences
    pub language: LanguageCoordinate,
    /// Taxonomy sources
    pub logic: LogicCoordinate,
    /// Premise the taxonomy follows
    pub premise: PremiseType,
}

impl ViewCoordinate {
    /// Compose a view
    pub fn new(
        stamp_filter: StampFilter,
        language: LanguageCoordinate,
        logic: LogicCoordinate,
        premise: PremiseType,
    ) -> Self {
        Self {
            stamp_filter,
            language,
            logic,
            premise,
        }
    }

    /// Taxonomy assemblage selected by the premise
    pub fn taxonomy_assemblage(&self) -> Nid {
        self.logic.taxonomy_assemblage(self.premise)
    }

    /// Analog with a different STAMP filter
    pub fn with_stamp_filter(&self, stamp_filter: StampFilter) -> Self {
        Self {
            stamp_filter,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_set_membership() {
        assert!(StatusSet::ACTIVE_ONLY.contains(Status::Active));
        assert!(!StatusSet::ACTIVE_ONLY.contains(Status::Inactive));
        assert!(StatusSet::ACTIVE_AND_INACTIVE.contains(Status::Inactive));
        assert_eq!(StatusSet::of(&[Status::Inactive]), StatusSet::INACTIVE_ONLY);
        assert!(StatusSet::of(&[]).is_empty());
    }

    #[test]
    fn test_analog_changes_only_one_axis() {
        let base = StampFilter::new(StatusSet::ACTIVE_ONLY, StampPosition::new(-100, 500))
            .with_module_priority(vec![-3, -4]);
        let later = base.with_time(900);
        assert_eq!(later.position(), StampPosition::new(-100, 900));
        assert_eq!(later.module_priority(), base.module_priority());
        assert_eq!(base.position().time, 500);

        let other_path = base.with_path(-200);
        assert_eq!(other_path.position().path, -200);
        assert_eq!(other_path.position().time, 500);
    }

    #[test]
    fn test_module_inclusion_and_exclusion() {
        let filter = StampFilter::development_latest_active_only(-1);
        assert!(filter.allows_module(-9));

        let restricted = filter.with_modules([-9, -8]).with_excluded_modules([-8]);
        assert!(restricted.allows_module(-9));
        assert!(!restricted.allows_module(-8));
        assert!(!restricted.allows_module(-7));
    }

    #[test]
    fn test_module_rank_unlisted_last() {
        let filter = StampFilter::development_latest_active_only(-1)
            .with_module_priority(vec![-5, -6]);
        assert_eq!(filter.module_rank(-5), 0);
        assert_eq!(filter.module_rank(-6), 1);
        assert_eq!(filter.module_rank(-7), 2);
    }

    #[test]
    fn test_view_selects_taxonomy_by_premise() {
        let view = ViewCoordinate::new(
            StampFilter::development_latest_active_only(-1),
            LanguageCoordinate::new(-2, vec![], vec![]),
            LogicCoordinate::new(-10, -11),
            PremiseType::Inferred,
        );
        assert_eq!(view.taxonomy_assemblage(), -11);
    }
}
