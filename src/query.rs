// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Query parameters, canonical signatures, and cached predicate plans.
//!
//! `World` owns the actual [`CachedQuery`] instances and runs them; this
//! module defines the shapes they're built from so both `world.rs` and
//! callers share one vocabulary.

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::bitset::BitSet;
use crate::entity::EntityId;
use crate::mask::MaskArray;
use crate::trait_def::{Trait, TraitId};

/// One parameter of a query's predicate language.
#[derive(Debug, Clone)]
pub enum Modifier {
    /// Require the bit set (default).
    All(Trait),
    /// At least one of the listed traits' bits set. An empty list is a
    /// static false predicate.
    Any(Vec<Trait>),
    /// Require the bit unset.
    Not(Trait),
    /// Bit set now and not in the tracker's snapshot.
    Added(Trait),
    /// Bit unset now and set in the tracker's snapshot.
    Removed(Trait),
    /// Trait's change-layer bit set since the tracker's snapshot.
    Changed(Trait),
}

impl Modifier {
    fn trait_ids(&self, out: &mut SmallVec<[TraitId; 8]>) {
        match self {
            Modifier::All(t) | Modifier::Not(t) | Modifier::Added(t) | Modifier::Removed(t) | Modifier::Changed(t) => {
                out.push(t.id());
            }
            Modifier::Any(ts) => out.extend(ts.iter().map(|t| t.id())),
        }
    }

    fn is_tracked(&self) -> bool {
        matches!(self, Modifier::Added(_) | Modifier::Removed(_) | Modifier::Changed(_))
    }

    fn is_consuming(&self) -> bool {
        matches!(self, Modifier::Added(_) | Modifier::Removed(_))
    }
}

/// A canonicalized, hashable key for a parameter list. Two semantically
/// equal queries (same traits, same modifiers, any parameter order) hash
/// equal because every field is sorted by trait id before hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QuerySignature {
    all: SmallVec<[u32; 4]>,
    any_groups: SmallVec<[SmallVec<[u32; 4]>; 2]>,
    not: SmallVec<[u32; 4]>,
    added: SmallVec<[u32; 4]>,
    removed: SmallVec<[u32; 4]>,
    changed: SmallVec<[u32; 4]>,
}

impl QuerySignature {
    pub(crate) fn build(params: &[Modifier]) -> Self {
        let mut all = SmallVec::new();
        let mut any_groups: SmallVec<[SmallVec<[u32; 4]>; 2]> = SmallVec::new();
        let mut not = SmallVec::new();
        let mut added = SmallVec::new();
        let mut removed = SmallVec::new();
        let mut changed = SmallVec::new();

        for m in params {
            match m {
                Modifier::All(t) => all.push(t.id().as_u32()),
                Modifier::Not(t) => not.push(t.id().as_u32()),
                Modifier::Added(t) => added.push(t.id().as_u32()),
                Modifier::Removed(t) => removed.push(t.id().as_u32()),
                Modifier::Changed(t) => changed.push(t.id().as_u32()),
                Modifier::Any(ts) => {
                    let mut group: SmallVec<[u32; 4]> = ts.iter().map(|t| t.id().as_u32()).collect();
                    group.sort_unstable();
                    any_groups.push(group);
                }
            }
        }
        all.sort_unstable();
        not.sort_unstable();
        added.sort_unstable();
        removed.sort_unstable();
        changed.sort_unstable();
        any_groups.sort_unstable();

        Self {
            all,
            any_groups,
            not,
            added,
            removed,
            changed,
        }
    }
}

fn set_bit(words: &mut [u64], bit: u32) {
    let (w, b) = (bit as usize / 64, bit as usize % 64);
    if w < words.len() {
        words[w] |= 1 << b;
    }
}

/// Per-mask-word AND-mask/AND-value plus OR-group bitsets, precomputed from
/// a query's All/Not/Any parameters. `Added`/`Removed`/`Changed` aren't
/// part of the plan — they're evaluated against a [`Tracker`] at run time
/// instead.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryPlan {
    and_mask: Vec<u64>,
    and_value: Vec<u64>,
    or_masks: Vec<Vec<u64>>,
    /// Set when an `All(t)`/`Any([])` parameter can never match (an
    /// unregistered required trait, or an empty `Any` list).
    static_false: bool,
    /// The world's trait-registration epoch this plan was built against;
    /// rebuilt whenever the epoch advances (a new trait's bitflag might be
    /// the one a previously-unregistered parameter needed, or the mask's
    /// word count might have grown).
    built_epoch: u64,
}

impl QueryPlan {
    pub(crate) fn build(
        params: &[Modifier],
        bitflag_of: impl Fn(TraitId) -> Option<u32>,
        word_count: usize,
        excluded_bitflag: u32,
        epoch: u64,
    ) -> Self {
        let mut and_mask = vec![0u64; word_count];
        let mut and_value = vec![0u64; word_count];
        set_bit(&mut and_mask, excluded_bitflag);

        let mut or_masks = Vec::new();
        let mut static_false = false;

        for m in params {
            match m {
                Modifier::All(t) => match bitflag_of(t.id()) {
                    Some(bf) => {
                        set_bit(&mut and_mask, bf);
                        set_bit(&mut and_value, bf);
                    }
                    None => static_false = true,
                },
                Modifier::Not(t) => {
                    if let Some(bf) = bitflag_of(t.id()) {
                        set_bit(&mut and_mask, bf);
                    }
                }
                Modifier::Any(ts) => {
                    if ts.is_empty() {
                        static_false = true;
                    } else {
                        let mut group = vec![0u64; word_count];
                        for t in ts {
                            if let Some(bf) = bitflag_of(t.id()) {
                                set_bit(&mut group, bf);
                            }
                        }
                        or_masks.push(group);
                    }
                }
                Modifier::Added(_) | Modifier::Removed(_) | Modifier::Changed(_) => {}
            }
        }

        Self {
            and_mask,
            and_value,
            or_masks,
            static_false,
            built_epoch: epoch,
        }
    }

    pub(crate) fn is_stale(&self, current_epoch: u64) -> bool {
        self.built_epoch != current_epoch
    }

    pub(crate) fn matches(&self, mask: &BitSet) -> bool {
        if self.static_false {
            return false;
        }
        for (i, (&and_mask, &and_value)) in self.and_mask.iter().zip(&self.and_value).enumerate() {
            if (mask.word(i) & and_mask) != and_value {
                return false;
            }
        }
        for group in &self.or_masks {
            let hit = group.iter().enumerate().any(|(i, &g)| mask.word(i) & g != 0);
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Snapshot/dirty/changed layers backing `Added`/`Removed`/`Changed`
/// evaluation for one cached query.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    pub(crate) snapshot: MaskArray,
    pub(crate) dirty: MaskArray,
    pub(crate) changed: MaskArray,
    /// Entities touched (added/removed/changed) since the last consuming
    /// `run()`, so re-evaluation doesn't require a full world scan.
    pub(crate) touched: AHashSet<EntityId>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// `(entity, added-or-removed)` delta fired to a query's subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    Added,
    Removed,
}

pub(crate) type Subscriber = Box<dyn FnMut(EntityId, MembershipEvent)>;
pub(crate) type ChangeSubscriber = Box<dyn FnMut(EntityId)>;

/// A handle returned by `World::query_subscribe`; pass it to
/// `World::query_unsubscribe` to stop receiving membership deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub(crate) slot: usize,
}

/// A handle returned by `World::on_change`; pass it to
/// `World::remove_change_subscriber` to stop receiving change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSubscriptionHandle {
    pub(crate) trait_id: TraitId,
    pub(crate) slot: usize,
}

/// A cached query: its parameters, compiled plan, incrementally maintained
/// membership, optional change tracker, and subscribers.
pub(crate) struct CachedQuery {
    pub(crate) params: Vec<Modifier>,
    pub(crate) plan: QueryPlan,
    /// The set of live entities satisfying the All/Any/Not portion of the
    /// predicate, maintained incrementally on every mutation. This is what
    /// `run()` returns when there's no tracked modifier, and what
    /// subscribers observe.
    pub(crate) base_members: AHashSet<EntityId>,
    pub(crate) tracker: Option<Tracker>,
    pub(crate) consume_on_read: bool,
    pub(crate) subscribers: Vec<Option<Subscriber>>,
}

impl CachedQuery {
    pub(crate) fn new(params: Vec<Modifier>) -> Self {
        let consume_on_read = params.iter().any(Modifier::is_consuming);
        let tracker = params.iter().any(Modifier::is_tracked).then(Tracker::new);
        Self {
            params,
            plan: QueryPlan::default(),
            base_members: AHashSet::default(),
            tracker,
            consume_on_read,
            subscribers: Vec::new(),
        }
    }

    /// Every trait id named by any parameter (including `Any` group
    /// members) — used to populate the world's trait-to-queries reverse
    /// index that drives incremental maintenance.
    pub(crate) fn referenced_traits(&self) -> SmallVec<[TraitId; 8]> {
        let mut ids = SmallVec::new();
        for m in &self.params {
            m.trait_ids(&mut ids);
        }
        ids
    }

    pub(crate) fn add_subscriber(&mut self, cb: Subscriber) -> usize {
        if let Some(slot) = self.subscribers.iter().position(Option::is_none) {
            self.subscribers[slot] = Some(cb);
            slot
        } else {
            self.subscribers.push(Some(cb));
            self.subscribers.len() - 1
        }
    }

    pub(crate) fn remove_subscriber(&mut self, slot: usize) {
        if let Some(entry) = self.subscribers.get_mut(slot) {
            *entry = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_def::Trait;

    #[test]
    fn signature_ignores_parameter_order() {
        let a = Trait::tag("A");
        let b = Trait::tag("B");
        let sig1 = QuerySignature::build(&[Modifier::All(a.clone()), Modifier::Not(b.clone())]);
        let sig2 = QuerySignature::build(&[Modifier::Not(b), Modifier::All(a)]);
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signature_distinguishes_any_groups_regardless_of_order() {
        let a = Trait::tag("A");
        let b = Trait::tag("B");
        let sig1 = QuerySignature::build(&[Modifier::Any(vec![a.clone(), b.clone()])]);
        let sig2 = QuerySignature::build(&[Modifier::Any(vec![b, a])]);
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn empty_any_is_static_false() {
        let plan = QueryPlan::build(&[Modifier::Any(vec![])], |_| None, 1, 63, 0);
        let mut mask = BitSet::default();
        mask.set(1);
        assert!(!plan.matches(&mask));
    }

    #[test]
    fn not_on_unregistered_trait_matches_everything() {
        let t = Trait::tag("Ghost");
        let plan = QueryPlan::build(&[Modifier::Not(t)], |_| None, 1, 63, 0);
        let mask = BitSet::default();
        assert!(plan.matches(&mask));
    }

    #[test]
    fn all_on_unregistered_trait_matches_nothing() {
        let t = Trait::tag("Ghost");
        let plan = QueryPlan::build(&[Modifier::All(t)], |_| None, 1, 63, 0);
        let mut mask = BitSet::default();
        mask.set(5);
        assert!(!plan.matches(&mask));
    }
}
