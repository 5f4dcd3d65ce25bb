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

//! Relations: trait factories parameterized by a target entity.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::trait_def::{FieldDef, Trait};

/// Process-wide id for a relation, distinct from `TraitId` — a relation
/// isn't itself a trait, it's a factory that mints one per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(u32);

static NEXT_RELATION_ID: AtomicU32 = AtomicU32::new(0);

impl RelationId {
    fn next() -> Self {
        Self(NEXT_RELATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What happens to entities holding `R(target)` when `target` is destroyed.
/// A relation can pick either cascade, or neither, without a second flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetCascade {
    /// Destroying the target leaves holders untouched.
    #[default]
    None,
    /// Destroying the target removes `R(target)` from every holder.
    RemoveRelation,
    /// Destroying the target destroys every holder too.
    DespawnHolder,
}

/// Behavioral options for a relation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationOptions {
    /// Adding `R(T2)` to an entity that already has `R(T1)` implicitly
    /// removes `R(T1)` first.
    pub exclusive: bool,
    pub target_cascade: TargetCascade,
}

impl RelationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_target_cascade(mut self, cascade: TargetCascade) -> Self {
        self.target_cascade = cascade;
        self
    }
}

#[derive(Debug)]
struct RelationInner {
    id: RelationId,
    name: String,
    fields: Vec<FieldDef>,
    options: RelationOptions,
}

/// A trait factory parameterized by a target entity. `relation.of(target)`
/// yields a concrete [`Trait`] distinct from `relation.of(other_target)`;
/// `World` memoizes the mapping so repeated calls for the same target
/// return an identity-stable trait.
#[derive(Debug, Clone)]
pub struct Relation(Arc<RelationInner>);

impl Relation {
    /// Define a relation. `fields` describes the payload every `R(target)`
    /// instance carries in addition to its target (pass an empty list for
    /// a tag-like relation such as `ChildOf`).
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>, options: RelationOptions) -> Self {
        Self(Arc::new(RelationInner {
            id: RelationId::next(),
            name: name.into(),
            fields,
            options,
        }))
    }

    pub fn id(&self) -> RelationId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn options(&self) -> RelationOptions {
        self.0.options
    }

    /// Mint a fresh concrete trait for `(self, target)`. Callers should go
    /// through `World::relation_trait`, which memoizes this so repeated
    /// calls are identity-stable; calling this directly bypasses that
    /// cache.
    pub(crate) fn instantiate(&self, target: EntityId) -> Trait {
        let qualified = format!("{}({:?})", self.0.name, target);
        Trait::with_relation_target(qualified, self.0.fields.clone(), self.0.id, target)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Relation {}

impl std::hash::Hash for Relation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}
