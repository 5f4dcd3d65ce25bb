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

//! World: the central entity index, trait registry, mask layer, and query
//! cache for one isolated ECS universe.

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::bitset::BitSet;
use crate::column::ColumnStore;
use crate::entity::{EntityId, EntityIndex};
use crate::error::{EcsError, Result};
use crate::mask::MaskArray;
use crate::query::{
    CachedQuery, ChangeSubscriptionHandle, MembershipEvent, Modifier, QueryPlan, QuerySignature,
    SubscriptionHandle, Tracker,
};
use crate::relation::{Relation, RelationId, RelationOptions, TargetCascade};
use crate::trait_def::{merge_defaults, FieldAssign, Record, Trait, TraitId};

const MAX_WORLDS: usize = 256;

struct WorldIdAllocator {
    next: u16,
    free: Vec<u8>,
}

impl WorldIdAllocator {
    const fn new() -> Self {
        Self {
            next: 0,
            free: Vec::new(),
        }
    }

    fn allocate(&mut self) -> Result<u8> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        if self.next as usize >= MAX_WORLDS {
            return Err(EcsError::WorldExhausted);
        }
        let id = self.next as u8;
        self.next += 1;
        Ok(id)
    }

    fn free(&mut self, id: u8) {
        self.free.push(id);
    }
}

/// Process-wide world-id allocator: the only state shared across worlds.
/// Guarded by `parking_lot::Mutex`.
static WORLD_IDS: Mutex<WorldIdAllocator> = Mutex::new(WorldIdAllocator::new());

struct TraitRecord {
    bitflag: u32,
    trait_: Trait,
    columns: ColumnStore,
    entities: AHashSet<EntityId>,
}

enum PendingEvent {
    Membership(QuerySignature, EntityId, MembershipEvent),
    Change(TraitId, EntityId),
}

/// An isolated ECS universe: entities, trait registries, masks, and cached
/// queries, all scoped to one `world_id` embedded in every entity it
/// produces.
pub struct World {
    id: u8,
    entities: EntityIndex,
    masks: MaskArray,
    registry: AHashMap<TraitId, TraitRecord>,
    /// Reverse of `registry`'s bitflag assignment, used by `destroy` to walk
    /// an entity's mask bit-by-bit without a linear scan of the registry.
    bitflag_to_trait: AHashMap<u32, TraitId>,
    next_bitflag: u32,
    word_count: usize,
    /// Bumped every time a new trait is registered; used to invalidate
    /// cached `QueryPlan`s that referenced an until-then-unregistered trait.
    registry_epoch: u64,

    queries: AHashMap<QuerySignature, CachedQuery>,
    /// Reverse index: trait id -> every query signature whose predicate
    /// names it, so a mutation only re-evaluates the queries it can affect.
    trait_queries: AHashMap<TraitId, SmallVec<[QuerySignature; 4]>>,
    change_subscribers: AHashMap<TraitId, Vec<Option<crate::query::ChangeSubscriber>>>,

    relation_options: AHashMap<RelationId, RelationOptions>,
    relation_instances: AHashMap<(RelationId, EntityId), Trait>,
    /// `(relation, holder) -> targets held`.
    relation_targets: AHashMap<(RelationId, EntityId), SmallVec<[EntityId; 4]>>,
    /// `(relation, target) -> holders`, for cascade lookup on destroy.
    relation_holders: AHashMap<(RelationId, EntityId), SmallVec<[EntityId; 4]>>,

    world_entity: EntityId,
    excluded_trait: Trait,
    excluded_bitflag: u32,

    /// When set, `add`/`set` reject partials naming a field absent from the
    /// trait's schema with `SchemaMismatch`. Off by default: unknown fields
    /// are silently dropped rather than rejected.
    strict_schema: bool,

    notify_depth: u32,
    pending_events: Vec<PendingEvent>,
    released: bool,
}

impl World {
    /// Create a new, empty world with no initial traits on the world
    /// entity.
    ///
    /// # Panics
    /// Panics if the process-wide world-id space (256 worlds) is
    /// exhausted. Use [`World::try_new`] to handle that case explicitly.
    pub fn new() -> Self {
        Self::try_new().expect("world id space exhausted")
    }

    /// Fallible constructor: returns `Err(EcsError::WorldExhausted)` instead
    /// of panicking when the process-wide world-id space is full.
    pub fn try_new() -> Result<Self> {
        let id = WORLD_IDS.lock().allocate()?;
        let mut entities = EntityIndex::new(id);
        let world_entity = entities.allocate();

        let mut world = Self {
            id,
            entities,
            masks: MaskArray::new(),
            registry: AHashMap::default(),
            bitflag_to_trait: AHashMap::default(),
            next_bitflag: 0,
            word_count: 0,
            registry_epoch: 0,
            queries: AHashMap::default(),
            trait_queries: AHashMap::default(),
            change_subscribers: AHashMap::default(),
            relation_options: AHashMap::default(),
            relation_instances: AHashMap::default(),
            relation_targets: AHashMap::default(),
            relation_holders: AHashMap::default(),
            world_entity,
            excluded_trait: Trait::tag("__excluded"),
            excluded_bitflag: 0,
            strict_schema: false,
            notify_depth: 0,
            pending_events: Vec::new(),
            released: false,
        };

        let excluded = world.excluded_trait.clone();
        world.excluded_bitflag = world.ensure_registered(&excluded);
        world.add_raw(world_entity, &excluded, &[]);
        Ok(world)
    }

    /// Like [`World::new`] but pre-sizes the entity index and mask array
    /// for `row_capacity` rows to avoid early resize churn.
    pub fn with_capacity(row_capacity: usize) -> Self {
        let mut world = Self::new();
        world.masks.ensure_row(row_capacity.saturating_sub(1));
        world
    }

    /// Opt this world into strict schema checking: `add`/`set` calls whose
    /// partial record names a field absent from the trait's schema return
    /// `Err(EcsError::SchemaMismatch)` instead of silently dropping the
    /// unknown field.
    pub fn with_strict_schema(mut self) -> Self {
        self.strict_schema = true;
        self
    }

    /// The id embedded in every entity this world produces.
    pub fn world_id(&self) -> u8 {
        self.id
    }

    /// The distinguished entity used to attach world-level traits. Excluded
    /// from every query's results by default.
    pub fn world_entity(&self) -> EntityId {
        self.world_entity
    }

    // ---- entity lifecycle ----------------------------------------------

    /// Allocate an entity with no initial traits.
    pub fn spawn(&mut self) -> EntityId {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.spawn").entered();
        self.entities.allocate()
    }

    /// Allocate an entity and attach the given `(trait, partial fields)`
    /// pairs in order.
    pub fn spawn_with<I>(&mut self, traits: I) -> EntityId
    where
        I: IntoIterator<Item = (Trait, Vec<FieldAssign>)>,
    {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.spawn").entered();
        let entity = self.entities.allocate();
        for (trait_, partial) in traits {
            self.add_inner(entity, &trait_, &partial);
        }
        entity
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Stable snapshot of every currently alive entity, including the
    /// world entity.
    pub fn alive_entities(&self) -> Vec<EntityId> {
        self.entities.alive_entities()
    }

    fn check_live(&self, entity: EntityId) -> Result<()> {
        if entity.world_id() != self.id {
            return Err(EcsError::WrongWorld(entity));
        }
        if entity.row_index() >= self.entities.row_capacity() {
            return Err(EcsError::EntityNotFound(entity));
        }
        if !self.entities.is_alive(entity) {
            return Err(EcsError::StaleEntity(entity));
        }
        Ok(())
    }

    /// Destroy `entity`: every trait it carries is removed (running
    /// cascades for relations with `DespawnHolder`/`RemoveRelation`), then
    /// its row is freed and its generation bumped.
    pub fn destroy(&mut self, entity: EntityId) -> Result<()> {
        self.check_live(entity)?;
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.destroy").entered();

        let top_level = self.begin_mutation();
        // Free first: a cascade that loops back to this entity (cyclic
        // relations) sees it as already dead and stops recursing instead
        // of destroying it a second time.
        self.entities.free(entity)?;

        // Sever the entity from every cached query's membership directly,
        // rather than relying on `remove_raw`'s per-bit predicate
        // recomputation: a dead entity can never be a legitimate member of
        // any query (including ones whose predicate is satisfied by
        // *absence*, e.g. `Not(t)`), and recomputing bit-by-bit while the
        // entity's mask is still being torn down would otherwise let a
        // dead entity transiently "start matching" a Not/Any predicate and
        // get spuriously reinserted.
        self.evict_from_all_queries(entity);

        let row = entity.row_index();
        let bits: Vec<u32> = self.masks.get(row).ones().map(|b| b as u32).collect();
        for bitflag in bits {
            if let Some(trait_) = self.trait_for_bitflag(bitflag) {
                self.remove_raw(entity, &trait_);
            }
        }
        self.cascade_target_destroyed(entity);
        self.end_mutation(top_level);
        Ok(())
    }

    /// Remove `entity` from every cached query's `base_members` and
    /// tracker `touched` set, firing `Removed` for any query that had it.
    /// Called once, up front, when `entity` is destroyed.
    fn evict_from_all_queries(&mut self, entity: EntityId) {
        let sigs: Vec<QuerySignature> = self.queries.keys().cloned().collect();
        for sig in sigs {
            if let Some(query) = self.queries.get_mut(&sig) {
                if query.base_members.remove(&entity) {
                    self.pending_events.push(PendingEvent::Membership(
                        sig.clone(),
                        entity,
                        MembershipEvent::Removed,
                    ));
                }
                if let Some(tracker) = query.tracker.as_mut() {
                    tracker.touched.remove(&entity);
                }
            }
        }
    }

    /// Clear all entities, traits, masks, and queries, but keep this
    /// world's id (so existing entity ids from before the reset are
    /// unambiguously stale rather than silently valid again).
    pub fn reset(&mut self) {
        let id = self.id;
        self.entities = EntityIndex::new(id);
        self.masks = MaskArray::new();
        self.registry.clear();
        self.bitflag_to_trait.clear();
        self.next_bitflag = 0;
        self.word_count = 0;
        self.registry_epoch = 0;
        self.queries.clear();
        self.trait_queries.clear();
        self.change_subscribers.clear();
        self.relation_options.clear();
        self.relation_instances.clear();
        self.relation_targets.clear();
        self.relation_holders.clear();
        self.pending_events.clear();
        self.notify_depth = 0;

        self.world_entity = self.entities.allocate();
        let excluded = self.excluded_trait.clone();
        self.excluded_bitflag = self.ensure_registered(&excluded);
        let world_entity = self.world_entity;
        self.add_raw(world_entity, &excluded, &[]);
    }

    /// Release this world's id back to the process-wide pool. After this
    /// call the world is unusable; drop it.
    ///
    /// Idempotent: a manual call followed by the implicit `Drop` release
    /// (or a second manual call) frees the id only once, so the same
    /// `world_id` is never handed to two live `World`s at once.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            WORLD_IDS.lock().free(self.id);
        }
    }

    // ---- trait registry --------------------------------------------------

    fn ensure_registered(&mut self, trait_: &Trait) -> u32 {
        if let Some(rec) = self.registry.get(&trait_.id()) {
            return rec.bitflag;
        }
        let bitflag = self.next_bitflag;
        self.next_bitflag += 1;
        let needed_words = (bitflag as usize / 64) + 1;
        if needed_words > self.word_count {
            self.word_count = needed_words;
        }
        self.registry.insert(
            trait_.id(),
            TraitRecord {
                bitflag,
                trait_: trait_.clone(),
                columns: ColumnStore::new(trait_),
                entities: AHashSet::default(),
            },
        );
        self.bitflag_to_trait.insert(bitflag, trait_.id());
        self.registry_epoch += 1;
        bitflag
    }

    /// Reverse lookup used only by `destroy`, which walks an entity's mask
    /// bit-by-bit and needs the `Trait` handle back to run `remove`
    /// semantics. O(1) via `bitflag_to_trait` rather than a registry scan.
    fn trait_for_bitflag(&self, bitflag: u32) -> Option<Trait> {
        let trait_id = self.bitflag_to_trait.get(&bitflag)?;
        self.registry.get(trait_id).map(|rec| rec.trait_.clone())
    }

    // ---- mutations --------------------------------------------------------

    /// Register `trait_` if needed, then add it to `entity` with `partial`
    /// overlaid on its defaults. If the entity already carries it, this is
    /// equivalent to `set` (spec.md §4.3).
    pub fn add(&mut self, entity: EntityId, trait_: &Trait, partial: &[FieldAssign]) -> Result<()> {
        self.check_live(entity)?;
        self.check_schema(trait_, partial)?;
        let top_level = self.begin_mutation();
        self.add_inner(entity, trait_, partial);
        self.end_mutation(top_level);
        Ok(())
    }

    /// Validate `partial` against `trait_`'s schema when strict mode is on.
    /// A no-op (always `Ok`) otherwise — the default total style drops
    /// unknown fields silently inside `ColumnStore::write_record`/
    /// `set_with_change_detection`.
    fn check_schema(&self, trait_: &Trait, partial: &[FieldAssign]) -> Result<()> {
        if !self.strict_schema {
            return Ok(());
        }
        for (name, _) in partial {
            if trait_.field_index(name).is_none() {
                return Err(EcsError::SchemaMismatch {
                    trait_name: trait_.name().to_string(),
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn add_inner(&mut self, entity: EntityId, trait_: &Trait, partial: &[FieldAssign]) {
        let bitflag = self.ensure_registered(trait_);
        let row = entity.row_index();
        let already_has = self.masks.get(row).contains(bitflag as usize);
        if already_has {
            if !partial.is_empty() {
                self.apply_set(entity, trait_, partial);
            }
            return;
        }
        self.add_raw(entity, trait_, partial);
    }

    fn add_raw(&mut self, entity: EntityId, trait_: &Trait, partial: &[FieldAssign]) {
        let bitflag = self.ensure_registered(trait_);
        let row = entity.row_index();
        self.masks.get_mut(row).set(bitflag as usize);
        let record = merge_defaults(trait_, partial);
        if let Some(rec) = self.registry.get_mut(&trait_.id()) {
            rec.entities.insert(entity);
            rec.columns.write_record(row, &record);
        }
        self.mark_dirty(trait_.id(), entity);
        self.refresh_membership(entity, trait_.id());

        if let Some((relation_id, target)) = trait_.relation_target() {
            self.relation_targets
                .entry((relation_id, entity))
                .or_default()
                .push(target);
            self.relation_holders
                .entry((relation_id, target))
                .or_default()
                .push(entity);
            self.enforce_exclusive(relation_id, entity, target);
        }
    }

    fn enforce_exclusive(&mut self, relation_id: RelationId, holder: EntityId, new_target: EntityId) {
        let exclusive = self
            .relation_options
            .get(&relation_id)
            .map(|o| o.exclusive)
            .unwrap_or(false);
        if !exclusive {
            return;
        }
        let prior: Vec<EntityId> = self
            .relation_targets
            .get(&(relation_id, holder))
            .map(|v| v.iter().copied().filter(|&t| t != new_target).collect())
            .unwrap_or_default();
        for prior_target in prior {
            if let Some(prior_trait) = self.relation_instances.get(&(relation_id, prior_target)).cloned() {
                self.remove_raw(holder, &prior_trait);
            }
        }
    }

    /// Remove `trait_` from `entity`. No-op if the entity doesn't carry it.
    pub fn remove(&mut self, entity: EntityId, trait_: &Trait) -> Result<()> {
        self.check_live(entity)?;
        let top_level = self.begin_mutation();
        self.remove_raw(entity, trait_);
        self.end_mutation(top_level);
        Ok(())
    }

    fn remove_raw(&mut self, entity: EntityId, trait_: &Trait) {
        let row = entity.row_index();
        let Some(bitflag) = self.registry.get(&trait_.id()).map(|r| r.bitflag) else {
            return;
        };
        if !self.masks.get(row).contains(bitflag as usize) {
            return;
        }
        self.masks.get_mut(row).clear(bitflag as usize);
        if let Some(rec) = self.registry.get_mut(&trait_.id()) {
            rec.entities.remove(&entity);
        }
        self.mark_dirty(trait_.id(), entity);
        self.refresh_membership(entity, trait_.id());

        if let Some((relation_id, target)) = trait_.relation_target() {
            if let Some(v) = self.relation_targets.get_mut(&(relation_id, entity)) {
                v.retain(|&t| t != target);
            }
            if let Some(v) = self.relation_holders.get_mut(&(relation_id, target)) {
                v.retain(|&h| h != entity);
            }
        }
    }

    /// Field-wise assignment with change detection. No-op if the entity
    /// doesn't carry `trait_`. Fires `onChange(trait_)` iff at least one
    /// field in `partial` differed from its prior value.
    pub fn set(&mut self, entity: EntityId, trait_: &Trait, partial: &[FieldAssign]) -> Result<()> {
        self.check_live(entity)?;
        self.check_schema(trait_, partial)?;
        let top_level = self.begin_mutation();
        self.apply_set(entity, trait_, partial);
        self.end_mutation(top_level);
        Ok(())
    }

    fn apply_set(&mut self, entity: EntityId, trait_: &Trait, partial: &[FieldAssign]) {
        let row = entity.row_index();
        let Some(rec) = self.registry.get_mut(&trait_.id()) else {
            return;
        };
        if !self.masks.get(row).contains(rec.bitflag as usize) {
            return;
        }
        let changed = rec.columns.set_with_change_detection(row, partial);
        if changed {
            self.mark_changed(trait_.id(), entity);
            self.refresh_membership(entity, trait_.id());
            self.pending_events.push(PendingEvent::Change(trait_.id(), entity));
        }
    }

    pub fn has(&self, entity: EntityId, trait_: &Trait) -> Result<bool> {
        self.check_live(entity)?;
        let Some(rec) = self.registry.get(&trait_.id()) else {
            return Ok(false);
        };
        Ok(self.masks.get(entity.row_index()).contains(rec.bitflag as usize))
    }

    /// Snapshot of `trait_`'s field values on `entity`, or `None` if the
    /// entity doesn't carry it.
    pub fn get(&self, entity: EntityId, trait_: &Trait) -> Result<Option<Record>> {
        self.check_live(entity)?;
        let Some(rec) = self.registry.get(&trait_.id()) else {
            return Ok(None);
        };
        let row = entity.row_index();
        if !self.masks.get(row).contains(rec.bitflag as usize) {
            return Ok(None);
        }
        Ok(Some(rec.columns.get(row)))
    }

    // ---- change tracking plumbing ------------------------------------------

    fn mark_dirty(&mut self, trait_id: TraitId, entity: EntityId) {
        // A destroyed entity's last traits are stripped by `destroy`'s
        // `remove_raw` loop after membership has already been severed by
        // `evict_from_all_queries`; don't resurrect it as "touched".
        if !self.entities.is_alive(entity) {
            return;
        }
        let Some(bitflag) = self.registry.get(&trait_id).map(|r| r.bitflag) else {
            return;
        };
        let Some(sigs) = self.trait_queries.get(&trait_id) else {
            return;
        };
        let sigs: SmallVec<[QuerySignature; 4]> = sigs.clone();
        let row = entity.row_index();
        for sig in &sigs {
            if let Some(query) = self.queries.get_mut(sig) {
                if let Some(tracker) = query.tracker.as_mut() {
                    tracker.dirty.get_mut(row).set(bitflag as usize);
                    tracker.touched.insert(entity);
                }
            }
        }
    }

    fn mark_changed(&mut self, trait_id: TraitId, entity: EntityId) {
        if !self.entities.is_alive(entity) {
            return;
        }
        let Some(bitflag) = self.registry.get(&trait_id).map(|r| r.bitflag) else {
            return;
        };
        let Some(sigs) = self.trait_queries.get(&trait_id) else {
            return;
        };
        let sigs: SmallVec<[QuerySignature; 4]> = sigs.clone();
        let row = entity.row_index();
        for sig in &sigs {
            if let Some(query) = self.queries.get_mut(sig) {
                if let Some(tracker) = query.tracker.as_mut() {
                    tracker.changed.get_mut(row).set(bitflag as usize);
                    tracker.touched.insert(entity);
                }
            }
        }
    }

    /// Re-evaluate the All/Any/Not portion of every query referencing
    /// `trait_id` for `entity`, enqueueing `added`/`removed` notifications
    /// on membership flips.
    ///
    /// No-ops for a dead entity: `destroy` severs a dying entity from every
    /// query's membership up front (`evict_from_all_queries`), before its
    /// remaining bits are cleared one by one. Without this guard, clearing
    /// a bit could make an absence-satisfied predicate (e.g. `Not(t)`)
    /// transiently "start matching" and reinsert the already-dead entity.
    fn refresh_membership(&mut self, entity: EntityId, trait_id: TraitId) {
        if !self.entities.is_alive(entity) {
            return;
        }
        let Some(sigs) = self.trait_queries.get(&trait_id) else {
            return;
        };
        let sigs: SmallVec<[QuerySignature; 4]> = sigs.clone();
        let row = entity.row_index();
        let mask = self.masks.get(row).clone();
        let epoch = self.registry_epoch;
        let word_count = self.word_count;
        let excluded_bitflag = self.excluded_bitflag;

        for sig in &sigs {
            let registry = &self.registry;
            if let Some(query) = self.queries.get_mut(sig) {
                if query.plan.is_stale(epoch) {
                    query.plan = QueryPlan::build(
                        &query.params,
                        |tid| registry.get(&tid).map(|r| r.bitflag),
                        word_count,
                        excluded_bitflag,
                        epoch,
                    );
                }
                let now_matches = query.plan.matches(&mask);
                let was_member = query.base_members.contains(&entity);
                if now_matches && !was_member {
                    query.base_members.insert(entity);
                    self.pending_events
                        .push(PendingEvent::Membership(sig.clone(), entity, MembershipEvent::Added));
                } else if !now_matches && was_member {
                    query.base_members.remove(&entity);
                    self.pending_events.push(PendingEvent::Membership(
                        sig.clone(),
                        entity,
                        MembershipEvent::Removed,
                    ));
                }
            }
        }
    }

    // ---- relations ----------------------------------------------------------

    /// Resolve the concrete, identity-stable trait for `(relation,
    /// target)`, memoized per world. Errors with `RelationMisuse` if
    /// `target` is not a live entity of this world.
    pub fn relation_trait(&mut self, relation: &Relation, target: EntityId) -> Result<Trait> {
        self.check_live(target).map_err(|_| EcsError::RelationMisuse(target))?;
        self.relation_options
            .entry(relation.id())
            .or_insert_with(|| relation.options());
        if let Some(existing) = self.relation_instances.get(&(relation.id(), target)) {
            return Ok(existing.clone());
        }
        let trait_ = relation.instantiate(target);
        self.relation_instances.insert((relation.id(), target), trait_.clone());
        Ok(trait_)
    }

    /// The set of targets `T` for which `entity` carries `relation.of(T)`.
    pub fn get_targets(&self, relation: &Relation, entity: EntityId) -> Vec<EntityId> {
        self.relation_targets
            .get(&(relation.id(), entity))
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    fn cascade_target_destroyed(&mut self, target: EntityId) {
        let relation_ids: Vec<RelationId> = self.relation_options.keys().copied().collect();
        for relation_id in relation_ids {
            let cascade = self
                .relation_options
                .get(&relation_id)
                .map(|o| o.target_cascade)
                .unwrap_or_default();
            if cascade == TargetCascade::None {
                continue;
            }
            let holders: SmallVec<[EntityId; 4]> = self
                .relation_holders
                .get(&(relation_id, target))
                .cloned()
                .unwrap_or_default();
            for holder in holders {
                if !self.entities.is_alive(holder) {
                    continue;
                }
                match cascade {
                    TargetCascade::RemoveRelation => {
                        if let Some(trait_) = self.relation_instances.get(&(relation_id, target)).cloned() {
                            self.remove_raw(holder, &trait_);
                        }
                    }
                    TargetCascade::DespawnHolder => {
                        let _ = self.destroy(holder);
                    }
                    TargetCascade::None => {}
                }
            }
            self.relation_holders.remove(&(relation_id, target));
        }
    }

    // ---- queries ----------------------------------------------------------

    /// Build a not-yet-cached query and seed its `base_members` with every
    /// currently-alive entity already satisfying its All/Any/Not predicate.
    ///
    /// Queries are created lazily on first parameter hash (spec.md §3
    /// Lifecycles), but "lazily created" must not mean "born empty": a
    /// query issued after entities already carry the trait it asks for
    /// still has to return them (spec.md §3 Invariants, §8 property 3). A
    /// tracked query's snapshot/dirty/changed layers are deliberately left
    /// at their all-zero default here rather than primed from the current
    /// mask — the trait already carried by a pre-existing entity should
    /// still read as `Added` on this query's first `run()`, exactly as it
    /// would have had the query existed since before the trait was added.
    fn ensure_query(&mut self, sig: &QuerySignature, params: &[Modifier]) {
        if self.queries.contains_key(sig) {
            return;
        }
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.query.miss").entered();
        let mut query = CachedQuery::new(params.to_vec());
        for tid in query.referenced_traits() {
            self.trait_queries.entry(tid).or_default().push(sig.clone());
        }

        let epoch = self.registry_epoch;
        let word_count = self.word_count;
        let excluded_bitflag = self.excluded_bitflag;
        {
            let registry = &self.registry;
            query.plan = QueryPlan::build(
                &query.params,
                |tid| registry.get(&tid).map(|r| r.bitflag),
                word_count,
                excluded_bitflag,
                epoch,
            );
        }
        for entity in self.entities.alive_entities() {
            let row = entity.row_index();
            if query.plan.matches(self.masks.get(row)) {
                query.base_members.insert(entity);
            }
        }

        self.queries.insert(sig.clone(), query);
    }

    /// Run a query: on a first observation of these parameters, builds and
    /// caches the plan; on every call, returns the live entities matching
    /// the predicate. Queries with `Added`/`Removed` modifiers advance
    /// their tracker snapshot on every call (consume-on-read).
    pub fn query(&mut self, params: &[Modifier]) -> Vec<EntityId> {
        let sig = QuerySignature::build(params);
        self.ensure_query(&sig, params);

        let epoch = self.registry_epoch;
        let word_count = self.word_count;
        let excluded_bitflag = self.excluded_bitflag;
        {
            let registry = &self.registry;
            let query = self.queries.get_mut(&sig).expect("just inserted");
            if query.plan.is_stale(epoch) {
                query.plan = QueryPlan::build(
                    &query.params,
                    |tid| registry.get(&tid).map(|r| r.bitflag),
                    word_count,
                    excluded_bitflag,
                    epoch,
                );
            }
        }

        let has_tracker = self.queries.get(&sig).expect("just inserted").tracker.is_some();
        if !has_tracker {
            let entities = &self.entities;
            return self
                .queries
                .get(&sig)
                .expect("just inserted")
                .base_members
                .iter()
                .copied()
                .filter(|e| entities.is_alive(*e))
                .collect();
        }
        self.run_tracked(&sig)
    }

    fn run_tracked(&mut self, sig: &QuerySignature) -> Vec<EntityId> {
        let consume_on_read;
        let mut candidates: AHashSet<EntityId>;
        {
            let query = self.queries.get(sig).expect("query exists");
            let tracker = query.tracker.as_ref().expect("tracked query");
            candidates = tracker.touched.clone();
            candidates.extend(query.base_members.iter().copied());
            consume_on_read = query.consume_on_read;
        }

        let mut result = Vec::new();
        for &entity in &candidates {
            if !self.entities.is_alive(entity) {
                continue;
            }
            let row = entity.row_index();
            let query = self.queries.get(sig).expect("query exists");
            if !query.plan.matches(self.masks.get(row)) {
                continue;
            }
            let tracker = query.tracker.as_ref().expect("tracked query");
            if tracked_predicate(&query.params, tracker, row, self.masks.get(row), &self.registry) {
                result.push(entity);
            }
        }

        if consume_on_read {
            let touched_rows: Vec<EntityId> = candidates.iter().copied().collect();
            let query = self.queries.get_mut(sig).expect("query exists");
            let tracker = query.tracker.as_mut().expect("tracked query");
            for entity in touched_rows {
                let row = entity.row_index();
                let current = self.masks.get(row).clone();
                tracker.snapshot.copy_row_from(row, &current);
                tracker.dirty.clear_row(row);
                tracker.changed.clear_row(row);
            }
            tracker.touched.clear();
        }
        result
    }

    /// Subscribe to membership deltas for the cached query matching
    /// `params`, building it if this is the first observation. The
    /// callback fires `(entity, Added | Removed)` synchronously with the
    /// mutation that flips membership.
    pub fn query_subscribe<F>(&mut self, params: &[Modifier], callback: F) -> SubscriptionHandle
    where
        F: FnMut(EntityId, MembershipEvent) + 'static,
    {
        let sig = QuerySignature::build(params);
        self.ensure_query(&sig, params);
        let query = self.queries.get_mut(&sig).expect("just inserted");
        let slot = query.add_subscriber(Box::new(callback));
        SubscriptionHandle { slot }
    }

    pub fn query_unsubscribe(&mut self, params: &[Modifier], handle: SubscriptionHandle) {
        let sig = QuerySignature::build(params);
        if let Some(query) = self.queries.get_mut(&sig) {
            query.remove_subscriber(handle.slot);
        }
    }

    /// Subscribe to field-change events on `trait_` across every entity
    /// that carries it.
    pub fn on_change<F>(&mut self, trait_: &Trait, callback: F) -> ChangeSubscriptionHandle
    where
        F: FnMut(EntityId) + 'static,
    {
        let slots = self.change_subscribers.entry(trait_.id()).or_default();
        let slot = if let Some(i) = slots.iter().position(Option::is_none) {
            slots[i] = Some(Box::new(callback));
            i
        } else {
            slots.push(Some(Box::new(callback)));
            slots.len() - 1
        };
        ChangeSubscriptionHandle {
            trait_id: trait_.id(),
            slot,
        }
    }

    pub fn remove_change_subscriber(&mut self, handle: ChangeSubscriptionHandle) {
        if let Some(slots) = self.change_subscribers.get_mut(&handle.trait_id) {
            if let Some(entry) = slots.get_mut(handle.slot) {
                *entry = None;
            }
        }
    }

    // ---- deferred notification --------------------------------------------

    fn begin_mutation(&mut self) -> bool {
        let top_level = self.notify_depth == 0;
        self.notify_depth += 1;
        top_level
    }

    fn end_mutation(&mut self, top_level: bool) {
        self.notify_depth -= 1;
        if top_level {
            self.flush_pending_events();
        }
    }

    fn flush_pending_events(&mut self) {
        while !self.pending_events.is_empty() {
            let events = std::mem::take(&mut self.pending_events);
            for event in events {
                match event {
                    PendingEvent::Membership(sig, entity, kind) => {
                        if let Some(query) = self.queries.get_mut(&sig) {
                            let mut subs = std::mem::take(&mut query.subscribers);
                            for cb in subs.iter_mut().flatten() {
                                cb(entity, kind);
                            }
                            query.subscribers = subs;
                        }
                    }
                    PendingEvent::Change(trait_id, entity) => {
                        if let Some(slots) = self.change_subscribers.get_mut(&trait_id) {
                            let mut subs = std::mem::take(slots);
                            for cb in subs.iter_mut().flatten() {
                                cb(entity);
                            }
                            *self.change_subscribers.get_mut(&trait_id).unwrap() = subs;
                        }
                    }
                }
            }
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.release();
    }
}

fn tracked_predicate(
    params: &[Modifier],
    tracker: &Tracker,
    row: usize,
    current_mask: &BitSet,
    registry: &AHashMap<TraitId, TraitRecord>,
) -> bool {
    for m in params {
        let ok = match m {
            Modifier::Added(t) => match registry.get(&t.id()).map(|r| r.bitflag) {
                Some(bf) => {
                    current_mask.contains(bf as usize) && !tracker.snapshot.get(row).contains(bf as usize)
                }
                None => false,
            },
            Modifier::Removed(t) => match registry.get(&t.id()).map(|r| r.bitflag) {
                Some(bf) => {
                    !current_mask.contains(bf as usize) && tracker.snapshot.get(row).contains(bf as usize)
                }
                None => false,
            },
            Modifier::Changed(t) => match registry.get(&t.id()).map(|r| r.bitflag) {
                Some(bf) => tracker.changed.get(row).contains(bf as usize),
                None => false,
            },
            _ => true,
        };
        if !ok {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_def::{FieldDef, FieldValue};

    fn position() -> Trait {
        Trait::new(
            "Position",
            vec![FieldDef::number("x", 0.0), FieldDef::number("y", 0.0)],
        )
    }

    #[test]
    fn spawn_and_query_all() {
        let mut world = World::new();
        let position = position();
        let e1 = world.spawn_with([(position.clone(), vec![])]);
        let e2 = world.spawn_with([(position.clone(), vec![])]);
        let e3 = world.spawn_with([(position.clone(), vec![])]);

        let mut result = world.query(&[Modifier::All(position.clone())]);
        result.sort();
        let mut expected = vec![e1, e2, e3];
        expected.sort();
        assert_eq!(result, expected);

        world.remove(e2, &position).unwrap();
        let result = world.query(&[Modifier::All(position)]);
        assert_eq!(result.len(), 2);
        assert!(!result.contains(&e2));
    }

    #[test]
    fn double_add_is_noop_for_membership() {
        let mut world = World::new();
        let tag = Trait::tag("Tag");
        let e = world.spawn();
        world.add(e, &tag, &[]).unwrap();
        assert!(world.has(e, &tag).unwrap());
        world.add(e, &tag, &[]).unwrap();
        assert!(world.has(e, &tag).unwrap());
    }

    #[test]
    fn set_merges_onto_defaults_and_round_trips() {
        let mut world = World::new();
        let position = position();
        let e = world.spawn_with([(position.clone(), vec![("x", FieldValue::Number(5.0))])]);
        let record = world.get(e, &position).unwrap().unwrap();
        assert_eq!(record.field("x"), Some(&FieldValue::Number(5.0)));
        assert_eq!(record.field("y"), Some(&FieldValue::Number(0.0)));
    }

    #[test]
    fn on_change_fires_only_on_real_diff() {
        let mut world = World::new();
        let position = position();
        let e = world.spawn_with([(position.clone(), vec![])]);
        let fire_count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let counter = fire_count.clone();
        world.on_change(&position, move |_| {
            *counter.borrow_mut() += 1;
        });
        world.set(e, &position, &[("x", FieldValue::Number(1.0))]).unwrap();
        world.set(e, &position, &[("x", FieldValue::Number(1.0))]).unwrap();
        assert_eq!(*fire_count.borrow(), 1);
    }

    #[test]
    fn added_tracker_consumes_on_read() {
        let mut world = World::new();
        let a = Trait::tag("A");
        let e = world.spawn_with([(a.clone(), vec![])]);
        let first = world.query(&[Modifier::Added(a.clone())]);
        assert_eq!(first, vec![e]);
        let second = world.query(&[Modifier::Added(a)]);
        assert!(second.is_empty());
    }

    #[test]
    fn forty_traits_span_two_mask_words() {
        let mut world = World::new();
        let mut traits = Vec::new();
        for i in 0..40 {
            traits.push(Trait::tag(format!("T{i}")));
        }
        let e = world.spawn_with(traits.iter().map(|t| (t.clone(), vec![])));
        let result = world.query(&[Modifier::All(traits[33].clone())]);
        assert_eq!(result, vec![e]);
    }

    #[test]
    fn exclusive_relation_keeps_one_target() {
        let child_of = Relation::new("ChildOf", Vec::new(), RelationOptions::new().exclusive());
        let mut world = World::new();
        let p1 = world.spawn();
        let p2 = world.spawn();
        let c = world.spawn();

        let r1 = world.relation_trait(&child_of, p1).unwrap();
        world.add(c, &r1, &[]).unwrap();
        let r2 = world.relation_trait(&child_of, p2).unwrap();
        world.add(c, &r2, &[]).unwrap();

        let targets = world.get_targets(&child_of, c);
        assert_eq!(targets, vec![p2]);
    }

    #[test]
    fn despawn_holder_cascade_destroys_children() {
        let child_of = Relation::new(
            "ChildOf",
            Vec::new(),
            RelationOptions::new().with_target_cascade(TargetCascade::DespawnHolder),
        );
        let mut world = World::new();
        let parent = world.spawn();
        let child = world.spawn();
        let rel = world.relation_trait(&child_of, parent).unwrap();
        world.add(child, &rel, &[]).unwrap();

        world.destroy(parent).unwrap();
        assert!(!world.is_alive(child));
    }

    #[test]
    fn world_entity_excluded_from_query_results() {
        let mut world = World::new();
        let tag = Trait::tag("Anything");
        world.add(world.world_entity(), &tag, &[]).unwrap();
        let result = world.query(&[Modifier::All(tag)]);
        assert!(result.is_empty());
    }

    #[test]
    fn destroy_frees_row_and_bumps_generation() {
        let mut world = World::new();
        let position = position();
        let e = world.spawn_with([(position.clone(), vec![])]);
        world.destroy(e).unwrap();
        assert!(!world.is_alive(e));
        let e2 = world.spawn_with([(position.clone(), vec![])]);
        assert_eq!(e.row(), e2.row());
        assert_ne!(e, e2);
    }

    #[test]
    fn stale_entity_after_destroy_errors() {
        let mut world = World::new();
        let e = world.spawn();
        world.destroy(e).unwrap();
        assert!(matches!(world.has(e, &Trait::tag("X")), Err(EcsError::StaleEntity(_))));
    }

    #[test]
    fn entity_from_other_world_errors_wrong_world() {
        let mut a = World::new();
        let b = World::new();
        let e = b.spawn();
        assert!(matches!(a.has(e, &Trait::tag("X")), Err(EcsError::WrongWorld(_))));
    }

    #[test]
    fn strict_schema_rejects_unknown_field() {
        let mut world = World::new().with_strict_schema();
        let position = position();
        let e = world.spawn();
        let err = world.add(e, &position, &[("z", FieldValue::Number(1.0))]);
        assert!(matches!(err, Err(EcsError::SchemaMismatch { .. })));
    }

    #[test]
    fn non_strict_world_drops_unknown_field_silently() {
        let mut world = World::new();
        let position = position();
        let e = world.spawn();
        world.add(e, &position, &[("z", FieldValue::Number(1.0))]).unwrap();
        assert!(world.has(e, &position).unwrap());
    }

    #[test]
    fn reset_keeps_world_id_but_invalidates_old_entities() {
        let mut world = World::new();
        let id = world.world_id();
        let e = world.spawn();
        world.reset();
        assert_eq!(world.world_id(), id);
        assert!(!world.is_alive(e));
    }

    #[test]
    fn query_subscribe_fires_added_and_removed() {
        let mut world = World::new();
        let position = position();
        let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = events.clone();
        world.query_subscribe(&[Modifier::All(position.clone())], move |e, kind| {
            log.borrow_mut().push((e, kind));
        });
        let e = world.spawn_with([(position.clone(), vec![])]);
        world.remove(e, &position).unwrap();
        let log = events.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], (e, MembershipEvent::Added));
        assert_eq!(log[1], (e, MembershipEvent::Removed));
    }

    #[test]
    fn remove_relation_cascade_only_removes_trait() {
        let child_of = Relation::new(
            "ChildOf",
            Vec::new(),
            RelationOptions::new().with_target_cascade(TargetCascade::RemoveRelation),
        );
        let mut world = World::new();
        let parent = world.spawn();
        let child = world.spawn();
        let rel = world.relation_trait(&child_of, parent).unwrap();
        world.add(child, &rel, &[]).unwrap();

        world.destroy(parent).unwrap();
        assert!(world.is_alive(child));
        assert!(world.get_targets(&child_of, child).is_empty());
    }

    #[test]
    fn relation_target_must_be_live() {
        let child_of = Relation::new("ChildOf", Vec::new(), RelationOptions::new());
        let mut world = World::new();
        let ghost = world.spawn();
        world.destroy(ghost).unwrap();
        assert!(matches!(
            world.relation_trait(&child_of, ghost),
            Err(EcsError::RelationMisuse(_))
        ));
    }
}
