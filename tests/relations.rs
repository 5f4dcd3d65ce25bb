//! Scenario tests for relation instantiation, exclusivity, and target
//! cascade variants (spec.md §4.5, §8 scenario 4).

use ecs_core::prelude::*;

#[test]
fn relation_of_target_is_identity_stable() {
    let mut world = World::new();
    let likes = Relation::new("Likes", Vec::new(), RelationOptions::new());
    let target = world.spawn();

    let t1 = world.relation_trait(&likes, target).unwrap();
    let t2 = world.relation_trait(&likes, target).unwrap();
    assert_eq!(t1, t2);
    assert_eq!(t1.id(), t2.id());
}

#[test]
fn distinct_targets_yield_distinct_traits() {
    let mut world = World::new();
    let likes = Relation::new("Likes", Vec::new(), RelationOptions::new());
    let alice = world.spawn();
    let bob = world.spawn();

    let t_alice = world.relation_trait(&likes, alice).unwrap();
    let t_bob = world.relation_trait(&likes, bob).unwrap();
    assert_ne!(t_alice, t_bob);
}

#[test]
fn exclusive_relation_replaces_prior_target() {
    let mut world = World::new();
    let child_of = Relation::new("ChildOf", Vec::new(), RelationOptions::new().exclusive());
    let p1 = world.spawn();
    let p2 = world.spawn();
    let c = world.spawn();

    let r1 = world.relation_trait(&child_of, p1).unwrap();
    world.add(c, &r1, &[]).unwrap();
    assert!(world.has(c, &r1).unwrap());

    let r2 = world.relation_trait(&child_of, p2).unwrap();
    world.add(c, &r2, &[]).unwrap();

    assert!(!world.has(c, &r1).unwrap());
    assert!(world.has(c, &r2).unwrap());
    assert_eq!(world.get_targets(&child_of, c), vec![p2]);
}

#[test]
fn non_exclusive_relation_accumulates_targets() {
    let mut world = World::new();
    let likes = Relation::new("Likes", Vec::new(), RelationOptions::new());
    let e = world.spawn();
    let a = world.spawn();
    let b = world.spawn();

    let ra = world.relation_trait(&likes, a).unwrap();
    let rb = world.relation_trait(&likes, b).unwrap();
    world.add(e, &ra, &[]).unwrap();
    world.add(e, &rb, &[]).unwrap();

    let mut targets = world.get_targets(&likes, e);
    targets.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(targets, expected);
}

#[test]
fn target_cascade_despawn_holder_destroys_every_holder() {
    let mut world = World::new();
    let child_of = Relation::new(
        "ChildOf",
        Vec::new(),
        RelationOptions::new().with_target_cascade(TargetCascade::DespawnHolder),
    );
    let parent = world.spawn();
    let c1 = world.spawn();
    let c2 = world.spawn();
    for c in [c1, c2] {
        let rel = world.relation_trait(&child_of, parent).unwrap();
        world.add(c, &rel, &[]).unwrap();
    }

    world.destroy(parent).unwrap();
    assert!(!world.is_alive(c1));
    assert!(!world.is_alive(c2));
}

#[test]
fn target_cascade_remove_relation_only_strips_the_trait() {
    let mut world = World::new();
    let child_of = Relation::new(
        "ChildOf",
        Vec::new(),
        RelationOptions::new().with_target_cascade(TargetCascade::RemoveRelation),
    );
    let parent = world.spawn();
    let child = world.spawn();
    let rel = world.relation_trait(&child_of, parent).unwrap();
    world.add(child, &rel, &[]).unwrap();

    world.destroy(parent).unwrap();
    assert!(world.is_alive(child));
    assert!(world.get_targets(&child_of, child).is_empty());
}

#[test]
fn target_cascade_none_leaves_holders_untouched() {
    let mut world = World::new();
    let child_of = Relation::new("ChildOf", Vec::new(), RelationOptions::new());
    let parent = world.spawn();
    let child = world.spawn();
    let rel = world.relation_trait(&child_of, parent).unwrap();
    world.add(child, &rel, &[]).unwrap();

    world.destroy(parent).unwrap();
    assert!(world.is_alive(child));
    // The relation trait still reports present — parent being dead does
    // not retroactively invalidate it since no cascade was configured.
    assert!(world.has(child, &rel).unwrap());
}

#[test]
fn relation_target_not_live_is_relation_misuse() {
    let mut world = World::new();
    let child_of = Relation::new("ChildOf", Vec::new(), RelationOptions::new());
    let ghost = world.spawn();
    world.destroy(ghost).unwrap();

    let err = world.relation_trait(&child_of, ghost);
    assert!(matches!(err, Err(EcsError::RelationMisuse(_))));
}
