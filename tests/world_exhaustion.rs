//! The process-wide world-id allocator surfaces exhaustion as an error
//! (spec.md §7, `WorldExhausted`) rather than panicking, unlike
//! `World::new`'s capacity-panic convention for per-world row exhaustion.
//!
//! Kept in its own binary: it drives the shared world-id allocator to its
//! limit, which would make any concurrently running `World::new()` call in
//! the same process flaky.

use ecs_core::{EcsError, World};

#[test]
fn world_exhausted_is_distinct_from_a_panic() {
    let mut worlds = Vec::new();
    loop {
        match World::try_new() {
            Ok(w) => worlds.push(w),
            Err(EcsError::WorldExhausted) => break,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(matches!(World::try_new(), Err(EcsError::WorldExhausted)));
}
