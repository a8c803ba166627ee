//! Projectile travel and impact resolution
//!
//! Projectiles are not indexed. Each tick they bank [`PROJECTILE_SPEED`]
//! tiles of travel and spend it one whole tile at a time, testing the
//! destination tile against the spatial index before entering it.

use crate::entity::{EnemyClass, Entity, EntityId, EntityKind, Lifecycle, Projectile, Shooter, Tile};
use crate::world::World;

/// Tiles travelled per tick.
pub const PROJECTILE_SPEED: f32 = 0.3;

/// Outcome of a projectile entering a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impact {
    None,
    Wall,
    Tank(EntityId),
    Objective(EntityId),
}

/// Advances every active projectile by one tick.
pub fn resolve_projectiles(world: &mut World) {
    let guard = (world.width.max(world.height) * 2).max(1) as u32;
    let projectiles: Vec<EntityId> = world
        .entities
        .values()
        .filter(|e| e.is_active() && matches!(e.kind, EntityKind::Projectile(_)))
        .map(|e| e.id)
        .collect();

    for id in projectiles {
        let Some(mut entity) = world.entities.remove(&id) else {
            continue;
        };
        advance(world, &mut entity, guard);
        world.entities.insert(id, entity);
    }
}

fn advance(world: &mut World, entity: &mut Entity, guard: u32) {
    let EntityKind::Projectile(projectile) = &mut entity.kind else {
        return;
    };
    projectile.travel += PROJECTILE_SPEED;

    let mut steps = 0;
    while projectile.travel >= 1.0 && steps < guard {
        projectile.travel -= 1.0;
        steps += 1;

        let next = entity.tile.step(projectile.direction);
        if !world.in_bounds(next) {
            entity.lifecycle = Lifecycle::Destroyed;
            return;
        }

        match impact_at(world, next, projectile) {
            Impact::None => entity.tile = next,
            Impact::Wall => {
                entity.lifecycle = Lifecycle::Destroyed;
                return;
            }
            Impact::Tank(victim) => {
                let heavy_round = projectile.shooter == Shooter::Enemy(EnemyClass::Heavy);
                world.damage_tank(victim, projectile.owner, heavy_round);
                entity.lifecycle = Lifecycle::Destroyed;
                return;
            }
            Impact::Objective(objective) => {
                world.destroy_objective(objective, projectile.owner);
                entity.lifecycle = Lifecycle::Destroyed;
                return;
            }
        }
    }
}

/// First applicable occupant of `tile`, in index order.
pub fn impact_at(world: &World, tile: Tile, projectile: &Projectile) -> Impact {
    for id in world.index.occupants(tile) {
        let Some(occupant) = world.entities.get(id) else {
            continue;
        };
        if !occupant.is_active() {
            continue;
        }

        match &occupant.kind {
            EntityKind::Wall => return Impact::Wall,
            EntityKind::Tank(_) if *id != projectile.owner => return Impact::Tank(*id),
            EntityKind::Objective(_) if projectile.shooter == Shooter::Player => {
                return Impact::Objective(*id)
            }
            _ => {}
        }
    }
    Impact::None
}
