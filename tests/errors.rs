//! Scenario tests for `EcsError` variants (spec.md §7).

use ecs_core::prelude::*;

#[test]
fn stale_entity_rejected_after_destroy() {
    let mut world = World::new();
    let e = world.spawn();
    world.destroy(e).unwrap();
    assert!(matches!(world.add(e, &Trait::tag("X"), &[]), Err(EcsError::StaleEntity(_))));
    assert!(matches!(world.remove(e, &Trait::tag("X")), Err(EcsError::StaleEntity(_))));
    assert!(matches!(world.destroy(e), Err(EcsError::StaleEntity(_))));
}

#[test]
fn wrong_world_rejected() {
    let mut a = World::new();
    let mut b = World::new();
    let from_b = b.spawn();
    assert!(matches!(a.add(from_b, &Trait::tag("X"), &[]), Err(EcsError::WrongWorld(_))));
    assert!(matches!(a.get(from_b, &Trait::tag("X")), Err(EcsError::WrongWorld(_))));
}

#[test]
fn relation_misuse_when_target_not_live() {
    let mut world = World::new();
    let rel = Relation::new("Near", Vec::new(), RelationOptions::new());
    let dead = world.spawn();
    world.destroy(dead).unwrap();
    assert!(matches!(world.relation_trait(&rel, dead), Err(EcsError::RelationMisuse(_))));
}

#[test]
fn schema_mismatch_only_in_strict_mode() {
    let position = Trait::new("Position", vec![FieldDef::number("x", 0.0)]);

    let mut lenient = World::new();
    let e = lenient.spawn();
    assert!(lenient.add(e, &position, &[("unknown_field", FieldValue::Number(1.0))]).is_ok());

    let mut strict = World::new().with_strict_schema();
    let e2 = strict.spawn();
    assert!(matches!(
        strict.add(e2, &position, &[("unknown_field", FieldValue::Number(1.0))]),
        Err(EcsError::SchemaMismatch { .. })
    ));
}
