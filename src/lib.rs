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

//! ecs_core - a data-oriented Entity-Component-System core.
//!
//! Entities are generational ids scoped to an isolated [`World`]. Data is
//! attached to an entity by instantiating a [`Trait`](trait_def::Trait) —
//! a runtime field schema, not a Rust type — which `World` stores
//! structure-of-arrays in a per-trait [`ColumnStore`](column::ColumnStore)
//! and tracks per-entity presence in a bitmask. Queries are cached
//! predicates over those bitmasks, kept incrementally up to date as traits
//! are added, removed, and mutated.

mod bitset;
mod column;
pub mod entity;
pub mod error;
mod mask;
pub mod query;
pub mod relation;
pub mod trait_def;
pub mod world;

pub mod prelude;

pub use entity::EntityId;
pub use error::{EcsError, Result};
pub use query::{ChangeSubscriptionHandle, MembershipEvent, Modifier, SubscriptionHandle};
pub use relation::{Relation, RelationOptions, TargetCascade};
pub use trait_def::{FieldAssign, FieldDef, FieldKind, FieldValue, Record, Trait};
pub use world::World;
