//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use ecs_core::prelude::*;
//! ```

pub use crate::entity::EntityId;
pub use crate::error::{EcsError, Result};
pub use crate::query::{ChangeSubscriptionHandle, MembershipEvent, Modifier, SubscriptionHandle};
pub use crate::relation::{Relation, RelationOptions, TargetCascade};
pub use crate::trait_def::{FieldAssign, FieldDef, FieldKind, FieldValue, Record, Trait};
pub use crate::world::World;
