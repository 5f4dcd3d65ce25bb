//! Example: relations (parent/child), change tracking, and subscriptions.

use ecs_core::prelude::*;

fn health() -> Trait {
    Trait::new("Health", vec![FieldDef::number("hp", 100.0)])
}

fn main() {
    println!("=== Relations and Tracking Example ===");

    let mut world = World::new();
    let health = health();

    // An exclusive relation: an entity can only be ChildOf one parent at a
    // time, and destroying a parent destroys its children.
    let child_of = Relation::new(
        "ChildOf",
        Vec::new(),
        RelationOptions::new()
            .exclusive()
            .with_target_cascade(TargetCascade::DespawnHolder),
    );

    let parent_a = world.spawn();
    let parent_b = world.spawn();
    let child = world.spawn_with([(health.clone(), vec![])]);

    let rel_a = world.relation_trait(&child_of, parent_a).unwrap();
    world.add(child, &rel_a, &[]).unwrap();
    println!("child's parents: {:?}", world.get_targets(&child_of, child));

    let rel_b = world.relation_trait(&child_of, parent_b).unwrap();
    world.add(child, &rel_b, &[]).unwrap();
    println!(
        "after re-parenting (exclusive): {:?}",
        world.get_targets(&child_of, child)
    );

    // Subscribe to Health changes.
    world.on_change(&health, |e| println!("Health changed on {e:?}"));
    world.set(child, &health, &[("hp", FieldValue::Number(50.0))]).unwrap();
    world.set(child, &health, &[("hp", FieldValue::Number(50.0))]).unwrap(); // no-op, no print

    // Subscribe to membership deltas on a query with an Added tracker.
    world.query_subscribe(&[Modifier::All(health.clone())], |e, kind| {
        println!("membership delta: {e:?} {kind:?}");
    });

    let newcomer = world.spawn_with([(health.clone(), vec![])]);
    let added = world.query(&[Modifier::Added(health.clone())]);
    println!("newly added with Health: {added:?}");
    let added_again = world.query(&[Modifier::Added(health)]);
    println!("second run (consumed): {added_again:?}");

    println!("destroying parent_b cascades to its children...");
    world.destroy(parent_b).unwrap();
    println!("child still alive? {}", world.is_alive(child));
    println!("newcomer still alive? {}", world.is_alive(newcomer));

    println!("=== Example Complete ===");
}
