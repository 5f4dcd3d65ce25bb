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

//! Trait descriptors: field schemas, default values, and the process-wide
//! identity that keys every world's trait registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::relation::RelationId;

/// Process-wide monotonic id assigned to every [`Trait`] at construction.
/// Keys `World`'s trait registry instead of relying on object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraitId(u32);

static NEXT_TRAIT_ID: AtomicU32 = AtomicU32::new(0);

impl TraitId {
    fn next() -> Self {
        Self(NEXT_TRAIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn as_u32(self) -> u32 {
        self.0
    }
}

/// The closed set of element kinds a trait field may hold: numeric,
/// boolean, or a reference to another entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Number,
    Bool,
    Reference,
}

/// A field value: the live contents of one column slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Reference(Option<EntityId>),
}

/// One field in a trait's schema: a name, an element kind, and the default
/// value used when a `spawn`/`add` doesn't supply it.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: FieldValue,
}

impl FieldDef {
    pub fn number(name: &'static str, default: f64) -> Self {
        Self {
            name,
            kind: FieldKind::Number,
            default: FieldValue::Number(default),
        }
    }

    pub fn boolean(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: FieldKind::Bool,
            default: FieldValue::Bool(default),
        }
    }

    pub fn reference(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Reference,
            default: FieldValue::Reference(None),
        }
    }
}

/// One assignment inside a partial record passed to `add`/`set`: a field
/// name paired with the value to write.
pub type FieldAssign = (&'static str, FieldValue);

/// A snapshot record returned by `get`: the full set of field values in
/// schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(pub Vec<FieldAssign>);

impl Record {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

#[derive(Debug)]
struct TraitInner {
    id: TraitId,
    name: String,
    fields: Vec<FieldDef>,
    /// Set only for traits produced by `Relation::of` — lets the world
    /// recover `(relation, target)` from a trait without a side table.
    relation_target: Option<(RelationId, EntityId)>,
}

/// An immutable descriptor for a trait's field schema and defaults.
/// Cheap to clone — `Trait` is an `Arc` handle, so cloning bumps a refcount
/// rather than copying the schema.
#[derive(Debug, Clone)]
pub struct Trait(Arc<TraitInner>);

impl Trait {
    /// Define a trait with the given fields. Passing an empty field list
    /// produces a tag trait.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self(Arc::new(TraitInner {
            id: TraitId::next(),
            name: name.into(),
            fields,
            relation_target: None,
        }))
    }

    /// Define a tag trait: no fields, presence conveyed purely by the mask.
    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub(crate) fn with_relation_target(
        name: String,
        fields: Vec<FieldDef>,
        relation: RelationId,
        target: EntityId,
    ) -> Self {
        Self(Arc::new(TraitInner {
            id: TraitId::next(),
            name,
            fields,
            relation_target: Some((relation, target)),
        }))
    }

    pub fn id(&self) -> TraitId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.0.fields
    }

    pub fn is_tag(&self) -> bool {
        self.0.fields.is_empty()
    }

    pub(crate) fn relation_target(&self) -> Option<(RelationId, EntityId)> {
        self.0.relation_target
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.0.fields.iter().position(|f| f.name == name)
    }

    /// A full record of every field at its default value.
    pub fn defaults(&self) -> Record {
        Record(
            self.0
                .fields
                .iter()
                .map(|f| (f.name, f.default))
                .collect(),
        )
    }
}

impl PartialEq for Trait {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Trait {}

impl std::hash::Hash for Trait {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

/// Overlay `partial` onto `defaults`, validating field kinds. Used by
/// `add`/`spawn`/`set` to merge a caller-supplied partial record against a
/// trait's defaults.
pub(crate) fn merge_defaults(trait_: &Trait, partial: &[FieldAssign]) -> Record {
    let mut record = trait_.defaults();
    for (name, value) in partial {
        if let Some(slot) = record.0.iter_mut().find(|(n, _)| n == name) {
            slot.1 = *value;
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_trait_has_no_fields() {
        let t = Trait::tag("Marker");
        assert!(t.is_tag());
        assert!(t.defaults().0.is_empty());
    }

    #[test]
    fn distinct_traits_get_distinct_ids() {
        let a = Trait::tag("A");
        let b = Trait::tag("B");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clone_is_identity_stable() {
        let a = Trait::new("Position", vec![FieldDef::number("x", 0.0)]);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn merge_overlays_partial_onto_defaults() {
        let position = Trait::new(
            "Position",
            vec![FieldDef::number("x", 0.0), FieldDef::number("y", 0.0)],
        );
        let merged = merge_defaults(&position, &[("x", FieldValue::Number(5.0))]);
        assert_eq!(merged.field("x"), Some(&FieldValue::Number(5.0)));
        assert_eq!(merged.field("y"), Some(&FieldValue::Number(0.0)));
    }
}
