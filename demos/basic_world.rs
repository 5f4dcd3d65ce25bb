//! Example: spawning entities, tagging them with traits, and querying.

use ecs_core::prelude::*;

fn position() -> Trait {
    Trait::new(
        "Position",
        vec![FieldDef::number("x", 0.0), FieldDef::number("y", 0.0)],
    )
}

fn main() {
    println!("=== Basic World Example ===");

    let mut world = World::new();
    let position = position();
    let velocity = Trait::tag("Moving");

    println!("Spawning entities...");
    let mut entities = Vec::new();
    for i in 0..10 {
        let e = world.spawn_with([
            (position.clone(), vec![("x", FieldValue::Number(i as f64))]),
            (velocity.clone(), vec![]),
        ]);
        entities.push(e);
    }
    println!("Spawned {} entities", entities.len());

    let moving = world.query(&[Modifier::All(position.clone()), Modifier::All(velocity.clone())]);
    println!("Found {} entities with Position and Moving", moving.len());

    println!("Removing Moving from the first entity...");
    world.remove(entities[0], &velocity).unwrap();
    let moving = world.query(&[Modifier::All(position.clone()), Modifier::All(velocity)]);
    println!("Now {} entities match", moving.len());

    let record = world.get(entities[1], &position).unwrap().unwrap();
    println!("Entity 1's Position: x={:?}", record.field("x").unwrap());

    println!("Destroying an entity...");
    world.destroy(entities[2]).unwrap();
    println!("Alive entity count: {}", world.alive_entities().len());

    println!("=== Example Complete ===");
}
