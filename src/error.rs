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

//! Error types

use std::fmt;

use crate::entity::EntityId;

/// ECS error type.
///
/// The core operates in a total style: malformed operations that can be
/// made meaningless (double `remove`, `set` on a trait the entity doesn't
/// carry yet) silently no-op rather than erroring. These variants cover the
/// remaining cases that are either programmer errors or cannot be
/// represented as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum EcsError {
    /// Operation on an entity whose generation no longer matches the live
    /// generation at its row (the entity was freed and the row recycled).
    StaleEntity(EntityId),

    /// Entity was issued by a different world than the one it's used with.
    WrongWorld(EntityId),

    /// `set` was called in strict mode with a field not in the trait's
    /// schema.
    SchemaMismatch { trait_name: String, field: String },

    /// A relation target is not a live entity.
    RelationMisuse(EntityId),

    /// Entity id was never issued, or was freed and the row has since been
    /// reused by an unrelated entity with no way to tell the two apart from
    /// the id alone (distinguished from `StaleEntity`, which still matches
    /// the row but not the generation).
    EntityNotFound(EntityId),

    /// The process-wide world-id space is exhausted.
    WorldExhausted,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::StaleEntity(e) => write!(f, "stale entity: {e:?}"),
            EcsError::WrongWorld(e) => write!(f, "entity {e:?} does not belong to this world"),
            EcsError::SchemaMismatch { trait_name, field } => {
                write!(f, "field '{field}' is not in the schema of trait '{trait_name}'")
            }
            EcsError::RelationMisuse(target) => {
                write!(f, "relation target {target:?} is not a live entity")
            }
            EcsError::EntityNotFound(e) => write!(f, "entity not found: {e:?}"),
            EcsError::WorldExhausted => write!(f, "process-wide world id space exhausted"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias.
pub type Result<T> = std::result::Result<T, EcsError>;
