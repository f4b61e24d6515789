//! Per-tick evaluation context.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use automat_core::{AssetGraph, AssetKey, AssetPartition, FreshnessCheckSpec, Time};
use automat_storage::IndexSnapshot;

/// Everything a rule may read while evaluating one tick.
///
/// Graph and snapshot are fixed for the tick. Derived facts that are
/// expensive to recompute (outdated partitions, upstream closures) are
/// memoized here and discarded with the context.
pub struct EvaluationContext<'a> {
    /// Dependency graph
    pub graph: &'a AssetGraph,

    /// Index state at tick start
    pub snapshot: &'a IndexSnapshot,

    /// Freshness checks, for lookahead rules
    pub checks: &'a [FreshnessCheckSpec],

    /// Evaluation time
    pub now: Time,

    outdated: RefCell<HashMap<AssetPartition, bool>>,
    closures: RefCell<HashMap<AssetPartition, Rc<HashSet<AssetPartition>>>>,
}

impl<'a> EvaluationContext<'a> {
    /// Create a context for one tick.
    pub fn new(
        graph: &'a AssetGraph,
        snapshot: &'a IndexSnapshot,
        checks: &'a [FreshnessCheckSpec],
        now: Time,
    ) -> Self {
        Self {
            graph,
            snapshot,
            checks,
            now,
            outdated: RefCell::new(HashMap::new()),
            closures: RefCell::new(HashMap::new()),
        }
    }

    /// All mapped upstream partitions across every parent.
    pub fn upstream_of(&self, ap: &AssetPartition) -> Vec<AssetPartition> {
        self.graph
            .upstream_partitions(ap, self.now)
            .into_iter()
            .flat_map(|(_, mapped)| mapped)
            .collect()
    }

    /// Whether some ancestor of `ap` holds data newer than `ap`, directly or
    /// through an outdated parent.
    pub fn is_outdated(&self, ap: &AssetPartition) -> bool {
        if let Some(known) = self.outdated.borrow().get(ap) {
            return *known;
        }

        let outdated = self
            .upstream_of(ap)
            .iter()
            .any(|parent| self.snapshot.is_newer_than(parent, ap) || self.is_outdated(parent));

        self.outdated.borrow_mut().insert(ap.clone(), outdated);
        outdated
    }

    /// Whether data in `ap` flows (transitively) into `target`.
    pub fn feeds_into(&self, ap: &AssetPartition, target: &AssetPartition) -> bool {
        ap == target || self.upstream_closure(target).contains(ap)
    }

    fn upstream_closure(&self, target: &AssetPartition) -> Rc<HashSet<AssetPartition>> {
        if let Some(closure) = self.closures.borrow().get(target) {
            return Rc::clone(closure);
        }

        let mut seen = HashSet::new();
        let mut queue: VecDeque<AssetPartition> = self.upstream_of(target).into();
        while let Some(ap) = queue.pop_front() {
            if seen.contains(&ap) {
                continue;
            }
            queue.extend(self.upstream_of(&ap));
            seen.insert(ap);
        }

        let closure = Rc::new(seen);
        self.closures
            .borrow_mut()
            .insert(target.clone(), Rc::clone(&closure));
        closure
    }

    /// Checks on `asset` or any of its descendants.
    pub fn checks_at_or_below(&self, asset: &AssetKey) -> Vec<&'a FreshnessCheckSpec> {
        let descendants = self.graph.descendants(asset);
        self.checks
            .iter()
            .filter(|c| c.asset() == asset || descendants.contains(c.asset()))
            .collect()
    }
}
