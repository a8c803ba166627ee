//! Enemy decision hierarchy: attack, then chase, then patrol
//!
//! Decisions and movement are separate. Whatever direction the hierarchy
//! settles on is handed to [`World::try_move`], which only moves the tank if
//! its cooldown has elapsed and the destination is free.

use crate::entity::{EnemyState, Entity, EntityId, Tank, TankRole, Tile};
use crate::pathfinding::find_path;
use crate::world::{Target, World};
use rand::seq::SliceRandom;
use shared::Direction;

/// Targets closer than this (in tiles) are chased instead of ignored.
pub const CHASE_ACTIVATION_RANGE: i32 = 10;
/// Squared distance band a patrolling defender keeps to its objective.
pub const PATROL_BAND_MIN_SQ: i32 = 16;
pub const PATROL_BAND_MAX_SQ: i32 = 36;

/// What the enemy ended up doing this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Attack,
    Chase(Direction),
    Patrol(Direction),
    Hold,
}

/// Runs one tick of AI for a detached enemy tank.
pub fn update_enemy(world: &mut World, entity: &mut Entity, target: Option<Target>) -> Decision {
    if !entity.is_active() {
        return Decision::Hold;
    }
    let Some(tank) = entity.tank_mut() else {
        return Decision::Hold;
    };
    tank.tick_cooldown();
    let Some(enemy) = enemy_state_mut(tank) else {
        return Decision::Hold;
    };
    enemy.recalc_countdown -= 1;

    let decision = decide(world, entity, target);
    match decision {
        Decision::Attack => {
            world.fire(entity);
        }
        Decision::Chase(direction) => {
            face(entity, direction);
            if world.try_move(entity, direction) {
                if let Some(enemy) = entity.tank_mut().and_then(enemy_state_mut) {
                    enemy.path.pop_front();
                }
            }
        }
        Decision::Patrol(direction) => {
            face(entity, direction);
            world.try_move(entity, direction);
        }
        Decision::Hold => {}
    }
    decision
}

fn decide(world: &mut World, entity: &mut Entity, target: Option<Target>) -> Decision {
    let tile = entity.tile;
    let id = entity.id;

    if let Some(target) = target {
        let distance_sq = tile.distance_sq(target.tile);
        let fire_range = entity
            .tank()
            .and_then(Tank::enemy_state)
            .map_or(0, |e| e.fire_range);

        if distance_sq <= fire_range * fire_range && world.line_of_sight(tile, target.tile) {
            if let Some(tank) = entity.tank_mut() {
                tank.facing = facing_towards(tile, target.tile, tank.facing);
            }
            return Decision::Attack;
        }

        if distance_sq <= CHASE_ACTIVATION_RANGE * CHASE_ACTIVATION_RANGE {
            let Some(enemy) = entity.tank_mut().and_then(enemy_state_mut) else {
                return Decision::Hold;
            };
            if let Some(direction) = chase(world, enemy, id, tile, target) {
                return Decision::Chase(direction);
            }
        }
    }

    let Some(enemy) = entity.tank_mut().and_then(enemy_state_mut) else {
        return Decision::Hold;
    };
    match patrol(world, enemy, id, tile) {
        Some(direction) => Decision::Patrol(direction),
        None => Decision::Hold,
    }
}

fn chase(
    world: &mut World,
    enemy: &mut EnemyState,
    id: EntityId,
    tile: Tile,
    target: Target,
) -> Option<Direction> {
    let vision = enemy.vision_range;
    let target_moved = enemy.last_target_tile != Some(target.tile)
        && tile.distance_sq(target.tile) <= vision * vision;

    if enemy.path.is_empty() || enemy.recalc_countdown <= 0 || target_moved {
        let path = find_path(tile, target.tile, |t| world.in_bounds(t) && !world.wall_at(t));
        enemy.path = path.map(|p| p.into_iter().skip(1).collect()).unwrap_or_default();
        enemy.recalc_countdown = EnemyState::jittered_recalc(enemy.class, &mut world.rng);
        enemy.last_target_tile = Some(target.tile);
    }

    let next = *enemy.path.front()?;
    match direction_between(tile, next) {
        Some(direction) if world.is_free(next, Some(id), true) => Some(direction),
        _ => {
            enemy.path.clear();
            None
        }
    }
}

fn patrol(world: &mut World, enemy: &mut EnemyState, id: EntityId, tile: Tile) -> Option<Direction> {
    enemy.patrol_countdown -= 1;
    if enemy.patrol_countdown > 0 {
        return enemy.patrol_direction;
    }
    enemy.patrol_countdown = enemy.patrol_interval;

    let legal: Vec<Direction> = Direction::ALL
        .into_iter()
        .filter(|d| world.is_free(tile.step(*d), Some(id), true))
        .collect();

    let anchor = enemy
        .defends
        .and_then(|objective| world.entity(objective))
        .filter(|objective| objective.is_active())
        .map(|objective| objective.tile);

    let preferred: Vec<Direction> = match anchor {
        Some(anchor) => {
            let current = tile.distance_sq(anchor);
            legal
                .iter()
                .copied()
                .filter(|d| {
                    let next = tile.step(*d).distance_sq(anchor);
                    if current > PATROL_BAND_MAX_SQ {
                        next < current
                    } else if current < PATROL_BAND_MIN_SQ {
                        next > current
                    } else {
                        true
                    }
                })
                .collect()
        }
        None => legal.clone(),
    };

    let pool = if preferred.is_empty() { &legal } else { &preferred };
    enemy.patrol_direction = pool.choose(&mut world.rng).copied();
    enemy.patrol_direction
}

fn enemy_state_mut(tank: &mut Tank) -> Option<&mut EnemyState> {
    match &mut tank.role {
        TankRole::Enemy(enemy) => Some(enemy),
        TankRole::Player(_) => None,
    }
}

fn face(entity: &mut Entity, direction: Direction) {
    if let Some(tank) = entity.tank_mut() {
        tank.facing = direction;
    }
}

/// Direction of the larger offset; keeps `current` when both are zero.
pub fn facing_towards(from: Tile, to: Tile, current: Direction) -> Direction {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx.abs() > dy.abs() {
        if dx > 0 {
            Direction::Right
        } else {
            Direction::Left
        }
    } else if dy != 0 {
        if dy > 0 {
            Direction::Down
        } else {
            Direction::Up
        }
    } else {
        current
    }
}

fn direction_between(from: Tile, to: Tile) -> Option<Direction> {
    Direction::ALL.into_iter().find(|d| from.step(*d) == to)
}
