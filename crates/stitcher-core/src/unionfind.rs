//! Disjoint-set tracker over entity ids.
//!
//! Lookups walk the parent chain without re-parenting, so cost grows with
//! tree depth. Long-lived instances should call [`DisjointSet::compress`]
//! between batches of unions. Each recompute pass owns its own instance.

use crate::types::EntityId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parent: HashMap<EntityId, EntityId>,
    /// Accumulated set size, used as the attach heuristic.
    weight: HashMap<EntityId, u64>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.parent.contains_key(&id)
    }

    /// Make `id` a singleton set unless it is already tracked.
    pub fn add(&mut self, id: EntityId) {
        if !self.parent.contains_key(&id) {
            self.parent.insert(id, id);
            self.weight.insert(id, 1);
        }
    }

    /// Root of the set containing `id`, or `None` if `id` is untracked.
    pub fn root(&self, id: EntityId) -> Option<EntityId> {
        let mut current = *self.parent.get(&id)?;
        loop {
            let next = self.parent.get(&current).copied().unwrap_or(current);
            if next == current {
                return Some(current);
            }
            current = next;
        }
    }

    /// True if both ids are tracked and share a set.
    pub fn find(&self, a: EntityId, b: EntityId) -> bool {
        match (self.root(a), self.root(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    /// Merge the sets of `a` and `b`, creating either as a singleton first
    /// if needed. The lighter root goes under the heavier one; on a tie the
    /// root of `b` goes under the root of `a`.
    pub fn union(&mut self, a: EntityId, b: EntityId) {
        self.add(a);
        self.add(b);
        let (Some(ra), Some(rb)) = (self.root(a), self.root(b)) else {
            return;
        };
        if ra == rb {
            return;
        }

        let wa = self.weight.get(&ra).copied().unwrap_or(1);
        let wb = self.weight.get(&rb).copied().unwrap_or(1);
        let (winner, loser) = if wa >= wb { (ra, rb) } else { (rb, ra) };
        self.parent.insert(loser, winner);
        self.weight.insert(winner, wa + wb);
    }

    /// Point every tracked id directly at its root.
    pub fn compress(&mut self) {
        let ids: Vec<EntityId> = self.parent.keys().copied().collect();
        for id in ids {
            if let Some(root) = self.root(id) {
                self.parent.insert(id, root);
            }
        }
    }

    /// All sets, largest first, ties by ascending lowest member id.
    pub fn components(&self) -> Vec<BTreeSet<EntityId>> {
        let mut groups: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
        for &id in self.parent.keys() {
            if let Some(root) = self.root(id) {
                groups.entry(root).or_default().insert(id);
            }
        }

        let mut components: Vec<BTreeSet<EntityId>> = groups.into_values().collect();
        components.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| a.iter().next().cmp(&b.iter().next()))
        });
        components
    }
}
