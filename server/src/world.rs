//! Live entity set and the tick phases shared by the solo and multiplayer engines
//!
//! The world owns every entity of the running level together with the
//! spatial index that mirrors them. All coordinate changes go through
//! [`World::spawn`], [`World::try_move`] and the destroy helpers so the index
//! never drifts from the entities.
//!
//! Time is explicit: the engine advances `tick` and `clock_ms` in
//! [`World::begin_tick`] and every cadence or animation check reads those
//! fields. Randomness comes from the world's own seeded generator.
//!
//! Tanks are detached from the entity map while they act (see
//! [`World::apply_intent`] and [`World::run_enemies`]). A detached tank keeps
//! its index entry; lookups that cannot find it simply skip it.

use crate::ai;
use crate::entity::{
    Entity, EntityId, EntityKind, Lifecycle, Projectile, Tank, TankRole, Tile,
    DESTRUCTION_ANIMATION_MS,
};
use crate::error::LevelError;
use crate::level::{LevelId, LevelLayout};
use crate::physics;
use crate::spatial::SpatialIndex;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{DestroyingEnemyView, Direction, ObjectView, PlayerInput};
use std::collections::BTreeMap;

/// Something worth scoring or logging that happened during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    EnemyDestroyed { enemy: EntityId, by: EntityId },
    ObjectiveDestroyed { objective: EntityId, by: EntityId },
    PlayerDestroyed { tank: EntityId, slot: u8, by: EntityId },
}

/// A player tank as seen by enemy AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub id: EntityId,
    pub tile: Tile,
}

pub struct World {
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) index: SpatialIndex,
    pub(crate) rng: StdRng,
    next_id: u32,
    tick: u64,
    pub(crate) clock_ms: u64,
    objectives_at_load: Vec<EntityId>,
    events: Vec<GameEvent>,
}

impl World {
    pub fn new(width: i32, height: i32, seed: u64) -> Self {
        Self {
            width,
            height,
            entities: BTreeMap::new(),
            index: SpatialIndex::new(width, height),
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
            tick: 0,
            clock_ms: 0,
            objectives_at_load: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Builds a fresh world from a layout and already-assigned spawns.
    ///
    /// Returns the player tank id for every slot. Nothing is returned on
    /// error, so callers can keep their previous world.
    pub fn from_layout(
        layout: &LevelLayout,
        spawns: &[(u8, Tile)],
        seed: u64,
    ) -> Result<(Self, Vec<(u8, EntityId)>), LevelError> {
        let mut world = World::new(layout.width, layout.height, seed);

        for wall in &layout.walls {
            if world.in_bounds(*wall) {
                world.spawn(*wall, EntityKind::Wall);
            }
        }

        let mut objective_ids = Vec::with_capacity(layout.objectives.len());
        for objective in &layout.objectives {
            if !world.in_bounds(objective.tile) {
                return Err(LevelError::Placement("objective"));
            }
            objective_ids.push(world.spawn(objective.tile, EntityKind::Objective(objective.class)));
        }
        world.objectives_at_load = objective_ids.clone();

        let mut players = Vec::with_capacity(spawns.len());
        for (slot, tile) in spawns {
            if !world.is_free(*tile, None, true) {
                return Err(LevelError::SpawnBlocked {
                    x: tile.x,
                    y: tile.y,
                });
            }
            let id = world.spawn(*tile, EntityKind::Tank(Tank::player(*slot, *tile)));
            players.push((*slot, id));
        }

        for enemy in &layout.enemies {
            if !world.in_bounds(enemy.tile) {
                return Err(LevelError::Placement("enemy"));
            }
            let defends = match enemy.defends {
                Some(index) => objective_ids.get(index).copied(),
                None => objective_ids.choose(&mut world.rng).copied(),
            };
            let tank = Tank::enemy(enemy.class, defends, &mut world.rng);
            world.spawn(enemy.tile, EntityKind::Tank(tank));
        }

        Ok((world, players))
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn in_bounds(&self, tile: Tile) -> bool {
        self.index.in_bounds(tile)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.entities.get(&id).map_or(false, Entity::is_active)
    }

    pub fn tank(&self, id: EntityId) -> Option<&Tank> {
        self.entities.get(&id).and_then(Entity::tank)
    }

    /// Adds an entity and, unless it is a projectile, indexes it.
    pub fn spawn(&mut self, tile: Tile, kind: EntityKind) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;

        let entity = Entity::new(id, tile, kind);
        if entity.is_indexed() {
            self.index.add(id, tile);
        }
        self.entities.insert(id, entity);
        id
    }

    /// Drops an entity outright, e.g. when its participant leaves.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.index.remove(id, entity.tile);
        Some(entity)
    }

    pub fn wall_at(&self, tile: Tile) -> bool {
        self.index.occupants(tile).iter().any(|id| {
            self.entities
                .get(id)
                .map_or(false, |e| e.is_active() && e.is_wall())
        })
    }

    /// False when out of bounds, walled, or (with `consider_tanks`) held by
    /// another active tank.
    pub fn is_free(&self, tile: Tile, excluding: Option<EntityId>, consider_tanks: bool) -> bool {
        if !self.in_bounds(tile) {
            return false;
        }

        for id in self.index.occupants(tile) {
            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            if !entity.is_active() {
                continue;
            }
            if entity.is_wall() {
                return false;
            }
            if consider_tanks && entity.tank().is_some() && Some(*id) != excluding {
                return false;
            }
        }

        true
    }

    /// Axis-aligned sight between two tiles; only walls in between block it.
    pub fn line_of_sight(&self, from: Tile, to: Tile) -> bool {
        if from.x != to.x && from.y != to.y {
            return false;
        }

        let step_x = (to.x - from.x).signum();
        let step_y = (to.y - from.y).signum();
        let mut current = Tile::new(from.x + step_x, from.y + step_y);

        while current != to {
            if self.wall_at(current) {
                return false;
            }
            current = Tile::new(current.x + step_x, current.y + step_y);
        }

        true
    }

    /// Advances the clocks and evicts whatever finished dying.
    pub fn begin_tick(&mut self, elapsed_ms: u64) {
        self.tick += 1;
        self.clock_ms += elapsed_ms;
        self.evict();
    }

    fn evict(&mut self) {
        let now = self.clock_ms;
        let expired: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| match e.lifecycle {
                Lifecycle::Active => false,
                Lifecycle::Destroying { expires_at_ms } => now >= expires_at_ms,
                Lifecycle::Destroyed => !e.is_player_tank(),
            })
            .map(|e| e.id)
            .collect();

        for id in expired {
            self.remove_entity(id);
        }
    }

    pub fn target_of(&self, tank: EntityId) -> Option<Target> {
        let entity = self.entities.get(&tank)?;
        if !entity.is_active() {
            return None;
        }
        match &entity.tank()?.role {
            TankRole::Player(player) => Some(Target {
                id: tank,
                tile: player.last_known_tile,
            }),
            TankRole::Enemy(_) => None,
        }
    }

    /// Applies one frame of intent to a player tank. Returns false if the
    /// tank is gone or inactive.
    pub fn apply_intent(&mut self, tank: EntityId, input: &PlayerInput) -> bool {
        let Some(mut entity) = self.entities.remove(&tank) else {
            return false;
        };
        let applied = self.drive_player(&mut entity, input);
        self.entities.insert(tank, entity);
        applied
    }

    fn drive_player(&mut self, entity: &mut Entity, input: &PlayerInput) -> bool {
        if !entity.is_active() {
            return false;
        }

        let intent = {
            let Some(tank) = entity.tank_mut() else {
                return false;
            };
            tank.tick_cooldown();

            let facing = tank.facing;
            let TankRole::Player(player) = &mut tank.role else {
                return false;
            };

            let intent = if input.stop {
                player.holding = true;
                None
            } else if let Some(direction) = input.movement {
                player.holding = false;
                Some(direction)
            } else if player.holding {
                None
            } else {
                Some(facing)
            };

            if let Some(direction) = intent {
                tank.facing = direction;
            }
            intent
        };

        if input.shoot {
            self.fire(entity);
        }
        if let Some(direction) = intent {
            self.try_move(entity, direction);
        }

        let tile = entity.tile;
        if let Some(Tank {
            role: TankRole::Player(player),
            ..
        }) = entity.tank_mut()
        {
            player.last_known_tile = tile;
        }
        true
    }

    /// Runs the AI for every active enemy against the nearest target.
    /// `targets` order breaks distance ties.
    pub fn run_enemies(&mut self, targets: &[Target]) {
        let enemies: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_active() && e.is_enemy_tank())
            .map(|e| e.id)
            .collect();

        for id in enemies {
            let Some(mut entity) = self.entities.remove(&id) else {
                continue;
            };
            let target = targets
                .iter()
                .min_by_key(|t| t.tile.distance_sq(entity.tile))
                .copied();
            ai::update_enemy(self, &mut entity, target);
            self.entities.insert(id, entity);
        }
    }

    pub fn resolve_projectiles(&mut self) {
        physics::resolve_projectiles(self);
    }

    /// Spawns a projectile from a (detached) tank if its cadence allows.
    pub(crate) fn fire(&mut self, shooter: &mut Entity) -> Option<EntityId> {
        let now = self.clock_ms;
        let owner = shooter.id;
        let tile = shooter.tile;

        let tank = shooter.tank_mut()?;
        if !tank.can_fire(now) {
            return None;
        }
        tank.last_fire_ms = Some(now);

        let projectile = Projectile {
            owner,
            shooter: tank.shooter(),
            direction: tank.facing,
            travel: 0.0,
        };
        Some(self.spawn(tile, EntityKind::Projectile(projectile)))
    }

    /// Moves a (detached) tank one tile if its cooldown elapsed and the
    /// destination is free.
    pub(crate) fn try_move(&mut self, entity: &mut Entity, direction: Direction) -> bool {
        let ready = entity.tank().map_or(false, Tank::can_move);
        let to = entity.tile.step(direction);
        if !ready || !self.is_free(to, Some(entity.id), true) {
            return false;
        }

        self.index.move_entity(entity.id, entity.tile, to);
        entity.tile = to;
        if let Some(tank) = entity.tank_mut() {
            tank.move_cooldown = tank.ticks_per_move;
            tank.moved_this_tick = true;
        }
        true
    }

    /// One hit on a tank. `heavy_round` turns a hit on a player into a kill.
    pub(crate) fn damage_tank(&mut self, victim: EntityId, by: EntityId, heavy_round: bool) {
        let now = self.clock_ms;
        let Some(entity) = self.entities.get_mut(&victim) else {
            return;
        };
        let tile = entity.tile;
        let Some(tank) = entity.tank_mut() else {
            return;
        };

        let slot = tank.slot();
        if !tank.take_hit(heavy_round && slot.is_some()) {
            return;
        }

        match slot {
            Some(slot) => {
                entity.lifecycle = Lifecycle::Destroyed;
                self.events.push(GameEvent::PlayerDestroyed {
                    tank: victim,
                    slot,
                    by,
                });
            }
            None => {
                entity.lifecycle = Lifecycle::Destroying {
                    expires_at_ms: now + DESTRUCTION_ANIMATION_MS,
                };
                self.events.push(GameEvent::EnemyDestroyed { enemy: victim, by });
            }
        }
        self.index.remove(victim, tile);
        debug!("Tank {:?} destroyed by {:?}", victim, by);
    }

    pub(crate) fn destroy_objective(&mut self, objective: EntityId, by: EntityId) {
        let Some(entity) = self.entities.get_mut(&objective) else {
            return;
        };
        entity.lifecycle = Lifecycle::Destroyed;
        let tile = entity.tile;
        self.index.remove(objective, tile);
        self.events.push(GameEvent::ObjectiveDestroyed { objective, by });
        debug!("Objective {:?} destroyed by {:?}", objective, by);
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Level clear check. A custom level loaded without objectives counts
    /// as cleared; nothing-loaded never does.
    pub fn objectives_cleared(&self, level: &LevelId) -> bool {
        match level {
            LevelId::None => false,
            _ if self.objectives_at_load.is_empty() => level.is_custom(),
            _ => self
                .objectives_at_load
                .iter()
                .all(|id| !self.is_active(*id)),
        }
    }

    pub fn objectives_remaining(&self) -> usize {
        self.objectives_at_load
            .iter()
            .filter(|id| self.is_active(**id))
            .count()
    }

    pub fn object_views(&self) -> Vec<ObjectView> {
        self.entities
            .values()
            .filter(|e| e.is_active())
            .map(Entity::view)
            .collect()
    }

    pub fn destroying_enemies(&self) -> Vec<DestroyingEnemyView> {
        self.entities
            .values()
            .filter(|e| matches!(e.lifecycle, Lifecycle::Destroying { .. }))
            .map(|e| DestroyingEnemyView {
                id: e.id.0,
                tile_x: e.tile.x,
                tile_y: e.tile.y,
            })
            .collect()
    }

    /// True when the index holds exactly the active non-projectile entities
    /// at their current tiles.
    pub fn index_is_consistent(&self) -> bool {
        let mut expected: Vec<(Tile, EntityId)> = self
            .entities
            .values()
            .filter(|e| e.is_indexed())
            .map(|e| (e.tile, e.id))
            .collect();
        let mut actual: Vec<(Tile, EntityId)> = self.index.entries().collect();
        expected.sort();
        actual.sort();
        expected == actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EnemyClass, ObjectiveClass, Shooter};
    use crate::level::{parse_level, EnemySpawn, ObjectiveSpawn};

    fn arena() -> LevelLayout {
        LevelLayout::bordered(8, 6)
    }

    fn build(layout: &LevelLayout, spawns: &[(u8, Tile)]) -> (World, Vec<(u8, EntityId)>) {
        World::from_layout(layout, spawns, 3).unwrap()
    }

    #[test]
    fn test_from_layout_indexes_everything_but_projectiles() {
        let mut layout = arena();
        layout.objectives.push(ObjectiveSpawn {
            tile: Tile::new(5, 2),
            class: ObjectiveClass::Alpha,
        });
        layout.enemies.push(EnemySpawn {
            tile: Tile::new(5, 3),
            class: EnemyClass::Fast,
            defends: None,
        });
        let (world, players) = build(&layout, &[(1, Tile::new(1, 1))]);

        assert_eq!(players.len(), 1);
        assert!(world.index_is_consistent());
        assert_eq!(world.objectives_remaining(), 1);

        let enemy = world.entities().find(|e| e.is_enemy_tank()).unwrap();
        let defends = enemy.tank().unwrap().enemy_state().unwrap().defends;
        assert_eq!(defends, world.entities().find(|e| e.is_objective()).map(|e| e.id));
    }

    #[test]
    fn test_spawn_on_wall_is_rejected() {
        let layout = arena();
        let result = World::from_layout(&layout, &[(1, Tile::new(0, 0))], 1);
        assert!(matches!(result, Err(LevelError::SpawnBlocked { x: 0, y: 0 })));
    }

    #[test]
    fn test_is_free_rules() {
        let (world, players) = build(&arena(), &[(1, Tile::new(2, 2)), (2, Tile::new(3, 2))]);
        let first = players[0].1;

        assert!(!world.is_free(Tile::new(0, 2), None, false));
        assert!(!world.is_free(Tile::new(-1, 2), None, false));
        assert!(!world.is_free(Tile::new(3, 2), Some(first), true));
        assert!(world.is_free(Tile::new(3, 2), Some(first), false));
        assert!(world.is_free(Tile::new(2, 2), Some(first), true));
        assert!(world.is_free(Tile::new(4, 4), None, true));
    }

    #[test]
    fn test_line_of_sight() {
        let layout = parse_level("WWWWWWW\nW  W  W\nW     W\nWWWWWWW\n");
        let (world, _) = build(&layout, &[]);

        assert!(!world.line_of_sight(Tile::new(1, 1), Tile::new(5, 1)));
        assert!(world.line_of_sight(Tile::new(1, 2), Tile::new(5, 2)));
        assert!(!world.line_of_sight(Tile::new(1, 1), Tile::new(2, 2)));
        assert!(world.line_of_sight(Tile::new(2, 1), Tile::new(2, 2)));
    }

    #[test]
    fn test_move_request_moves_and_sets_cooldown() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1))]);
        let tank = players[0].1;

        world.begin_tick(33);
        assert!(world.apply_intent(tank, &PlayerInput::moving(Direction::Down)));
        let entity = world.entity(tank).unwrap();
        assert_eq!(entity.tile, Tile::new(1, 2));
        assert_eq!(entity.tank().unwrap().facing, Direction::Down);
        assert!(entity.tank().unwrap().moved_this_tick);
        assert!(world.index_is_consistent());

        // cooldown holds the tank for the next nine ticks
        for _ in 0..9 {
            world.begin_tick(33);
            world.apply_intent(tank, &PlayerInput::idle());
            assert_eq!(world.entity(tank).unwrap().tile, Tile::new(1, 2));
        }
        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::idle());
        assert_eq!(world.entity(tank).unwrap().tile, Tile::new(1, 3));
    }

    #[test]
    fn test_new_tanks_hold_until_told_to_move() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1))]);
        let tank = players[0].1;

        for _ in 0..30 {
            world.begin_tick(33);
            world.apply_intent(tank, &PlayerInput::idle());
        }
        assert_eq!(world.entity(tank).unwrap().tile, Tile::new(1, 1));
    }

    #[test]
    fn test_stop_holds_position_but_keeps_facing() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1))]);
        let tank = players[0].1;

        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::moving(Direction::Right));
        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::stopping());
        for _ in 0..20 {
            world.begin_tick(33);
            world.apply_intent(tank, &PlayerInput::idle());
        }

        let entity = world.entity(tank).unwrap();
        assert_eq!(entity.tile, Tile::new(2, 1));
        assert_eq!(entity.tank().unwrap().facing, Direction::Right);
    }

    #[test]
    fn test_blocked_move_is_ignored() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1)), (2, Tile::new(2, 1))]);
        let tank = players[0].1;

        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::moving(Direction::Right));
        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::moving(Direction::Up));

        let entity = world.entity(tank).unwrap();
        assert_eq!(entity.tile, Tile::new(1, 1));
        assert_eq!(entity.tank().unwrap().facing, Direction::Up);
        assert!(world.index_is_consistent());
    }

    #[test]
    fn test_fire_respects_cadence() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1))]);
        let tank = players[0].1;
        let count_projectiles =
            |world: &World| world.entities().filter(|e| e.view().kind == shared::ObjectKind::Projectile).count();

        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::shooting());
        world.begin_tick(33);
        world.apply_intent(tank, &PlayerInput::shooting());
        assert_eq!(count_projectiles(&world), 1);

        for _ in 0..6 {
            world.begin_tick(33);
        }
        world.apply_intent(tank, &PlayerInput::shooting());
        assert_eq!(count_projectiles(&world), 2);

        let projectile = world
            .entities()
            .find_map(|e| match &e.kind {
                EntityKind::Projectile(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(projectile.owner, tank);
        assert_eq!(projectile.shooter, Shooter::Player);
        assert_eq!(projectile.direction, Direction::Right);
    }

    #[test]
    fn test_enemy_lingers_then_is_evicted() {
        let mut layout = arena();
        layout.enemies.push(EnemySpawn {
            tile: Tile::new(4, 4),
            class: EnemyClass::Normal,
            defends: None,
        });
        let (mut world, players) = build(&layout, &[(1, Tile::new(1, 1))]);
        let player = players[0].1;
        let enemy = world.entities().find(|e| e.is_enemy_tank()).unwrap().id;

        world.damage_tank(enemy, player, false);
        world.damage_tank(enemy, player, false);
        assert!(!world.is_active(enemy));
        assert_eq!(world.destroying_enemies().len(), 1);
        assert!(world.is_free(Tile::new(4, 4), None, true));
        assert!(world.index_is_consistent());
        assert_eq!(
            world.take_events(),
            vec![GameEvent::EnemyDestroyed { enemy, by: player }]
        );

        world.begin_tick(200);
        assert!(world.entity(enemy).is_some());
        world.begin_tick(100);
        assert!(world.entity(enemy).is_none());
    }

    #[test]
    fn test_destroyed_player_stays_for_reporting() {
        let (mut world, players) = build(&arena(), &[(1, Tile::new(1, 1))]);
        let player = players[0].1;

        world.damage_tank(player, EntityId(999), true);
        world.begin_tick(1000);

        let entity = world.entity(player).unwrap();
        assert_eq!(entity.lifecycle, Lifecycle::Destroyed);
        assert_eq!(entity.tank().unwrap().lives, 0);
        assert!(world.target_of(player).is_none());
    }

    #[test]
    fn test_objectives_cleared_rules() {
        let (world, _) = build(&arena(), &[]);
        assert!(!world.objectives_cleared(&LevelId::None));
        assert!(!world.objectives_cleared(&LevelId::Procedural(1)));
        assert!(world.objectives_cleared(&LevelId::Custom("empty".into())));

        let mut layout = arena();
        layout.objectives.push(ObjectiveSpawn {
            tile: Tile::new(3, 3),
            class: ObjectiveClass::Bravo,
        });
        let (mut world, _) = build(&layout, &[]);
        let objective = world.entities().find(|e| e.is_objective()).unwrap().id;
        assert!(!world.objectives_cleared(&LevelId::Procedural(1)));

        world.destroy_objective(objective, EntityId(1));
        assert!(world.objectives_cleared(&LevelId::Procedural(1)));
        world.begin_tick(33);
        assert!(world.entity(objective).is_none());
        assert!(world.objectives_cleared(&LevelId::Procedural(1)));
    }
}
