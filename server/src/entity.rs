//! Game objects living on the tile grid
//!
//! Every object shares an identity, a tile and a lifecycle state; the
//! behaviour-specific data sits in [`EntityKind`]. Tanks carry a common
//! header (lives, cooldowns, facing) plus a [`TankRole`] payload that is
//! either user intent state or AI state.

use rand::Rng;
use shared::{Direction, ObjectKind, ObjectView};
use std::collections::VecDeque;

pub const PLAYER_LIVES: u32 = 3;
pub const PLAYER_FIRE_CADENCE_MS: u64 = 200;
pub const PLAYER_TICKS_PER_MOVE: u32 = 10;

/// How long a destroyed enemy lingers before it is evicted.
pub const DESTRUCTION_ANIMATION_MS: u64 = 300;

pub const RECALC_JITTER: i32 = 5;
pub const MIN_RECALC_INTERVAL: i32 = 20;
pub const PATROL_INTERVAL_MIN: i32 = 45;
pub const PATROL_INTERVAL_MAX: i32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
}

impl Tile {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, direction: Direction) -> Tile {
        let (dx, dy) = direction.offset();
        Tile::new(self.x + dx, self.y + dy)
    }

    pub fn distance_sq(self, other: Tile) -> i32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    pub fn manhattan(self, other: Tile) -> i32 {
        (other.x - self.x).abs() + (other.y - self.y).abs()
    }

    pub fn neighbors(self) -> impl Iterator<Item = (Direction, Tile)> {
        Direction::ALL.into_iter().map(move |d| (d, self.step(d)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnemyClass {
    Normal,
    Fast,
    Heavy,
}

/// Per-class tuning shared by every enemy of that class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnemyStats {
    pub lives: u32,
    pub fire_cadence_ms: u64,
    pub vision_range: i32,
    pub fire_range: i32,
    pub ticks_per_move: u32,
    pub recalc_base: i32,
}

impl EnemyClass {
    pub const ALL: [EnemyClass; 3] = [EnemyClass::Normal, EnemyClass::Fast, EnemyClass::Heavy];

    pub fn stats(self) -> EnemyStats {
        match self {
            EnemyClass::Normal => EnemyStats {
                lives: 2,
                fire_cadence_ms: 1200,
                vision_range: 7,
                fire_range: 5,
                ticks_per_move: 20,
                recalc_base: 55,
            },
            EnemyClass::Fast => EnemyStats {
                lives: 3,
                fire_cadence_ms: 800,
                vision_range: 9,
                fire_range: 6,
                ticks_per_move: 12,
                recalc_base: 85,
            },
            EnemyClass::Heavy => EnemyStats {
                lives: 5,
                fire_cadence_ms: 1500,
                vision_range: 6,
                fire_range: 4,
                ticks_per_move: 25,
                recalc_base: 70,
            },
        }
    }

    pub fn object_kind(self) -> ObjectKind {
        match self {
            EnemyClass::Normal => ObjectKind::EnemyNormal,
            EnemyClass::Fast => ObjectKind::EnemyFast,
            EnemyClass::Heavy => ObjectKind::EnemyHeavy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectiveClass {
    Alpha,
    Bravo,
}

impl ObjectiveClass {
    pub const ALL: [ObjectiveClass; 2] = [ObjectiveClass::Alpha, ObjectiveClass::Bravo];

    pub fn object_kind(self) -> ObjectKind {
        match self {
            ObjectiveClass::Alpha => ObjectKind::ObjectiveAlpha,
            ObjectiveClass::Bravo => ObjectKind::ObjectiveBravo,
        }
    }
}

/// `Active → Destroying → removed` for enemies, `Active → Destroyed → removed`
/// for everything else. Player tanks stay `Destroyed` until the level ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Destroying { expires_at_ms: u64 },
    Destroyed,
}

/// Who fired a projectile; decides objective damage and the heavy one-shot rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shooter {
    Player,
    Enemy(EnemyClass),
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    pub slot: u8,
    /// Set by an explicit stop, cleared by the next move request.
    pub holding: bool,
    pub last_known_tile: Tile,
}

#[derive(Debug, Clone)]
pub struct EnemyState {
    pub class: EnemyClass,
    pub defends: Option<EntityId>,
    pub vision_range: i32,
    pub fire_range: i32,
    pub path: VecDeque<Tile>,
    pub recalc_countdown: i32,
    pub last_target_tile: Option<Tile>,
    pub patrol_interval: i32,
    pub patrol_countdown: i32,
    pub patrol_direction: Option<Direction>,
}

impl EnemyState {
    /// Next recompute countdown: class base with jitter, never below the floor.
    pub fn jittered_recalc<R: Rng + ?Sized>(class: EnemyClass, rng: &mut R) -> i32 {
        let base = class.stats().recalc_base;
        (base + rng.gen_range(-RECALC_JITTER..=RECALC_JITTER)).max(MIN_RECALC_INTERVAL)
    }
}

#[derive(Debug, Clone)]
pub enum TankRole {
    Player(PlayerState),
    Enemy(EnemyState),
}

#[derive(Debug, Clone)]
pub struct Tank {
    pub lives: u32,
    pub move_cooldown: u32,
    pub ticks_per_move: u32,
    pub facing: Direction,
    pub fire_cadence_ms: u64,
    pub last_fire_ms: Option<u64>,
    pub moved_this_tick: bool,
    pub role: TankRole,
}

impl Tank {
    pub fn player(slot: u8, tile: Tile) -> Self {
        Self {
            lives: PLAYER_LIVES,
            move_cooldown: 0,
            ticks_per_move: PLAYER_TICKS_PER_MOVE,
            facing: Direction::Right,
            fire_cadence_ms: PLAYER_FIRE_CADENCE_MS,
            last_fire_ms: None,
            moved_this_tick: false,
            role: TankRole::Player(PlayerState {
                slot,
                holding: true,
                last_known_tile: tile,
            }),
        }
    }

    pub fn enemy<R: Rng + ?Sized>(class: EnemyClass, defends: Option<EntityId>, rng: &mut R) -> Self {
        let stats = class.stats();
        let patrol_interval = rng.gen_range(PATROL_INTERVAL_MIN..=PATROL_INTERVAL_MAX);
        let first_recalc = EnemyState::jittered_recalc(class, rng);

        Self {
            lives: stats.lives,
            move_cooldown: 0,
            ticks_per_move: stats.ticks_per_move,
            facing: Direction::Down,
            fire_cadence_ms: stats.fire_cadence_ms,
            last_fire_ms: None,
            moved_this_tick: false,
            role: TankRole::Enemy(EnemyState {
                class,
                defends,
                vision_range: stats.vision_range,
                fire_range: stats.fire_range,
                path: VecDeque::new(),
                recalc_countdown: rng.gen_range(1..=first_recalc),
                last_target_tile: None,
                patrol_interval,
                patrol_countdown: rng.gen_range(0..=patrol_interval / 2),
                patrol_direction: None,
            }),
        }
    }

    /// Called once per tick before any movement decision.
    pub fn tick_cooldown(&mut self) {
        self.move_cooldown = self.move_cooldown.saturating_sub(1);
        self.moved_this_tick = false;
    }

    pub fn can_move(&self) -> bool {
        self.move_cooldown == 0
    }

    pub fn can_fire(&self, now_ms: u64) -> bool {
        match self.last_fire_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.fire_cadence_ms,
            None => true,
        }
    }

    /// Applies one hit and reports whether the tank is out of lives.
    pub fn take_hit(&mut self, lethal: bool) -> bool {
        if lethal {
            self.lives = 0;
        } else {
            self.lives = self.lives.saturating_sub(1);
        }
        self.lives == 0
    }

    pub fn shooter(&self) -> Shooter {
        match &self.role {
            TankRole::Player(_) => Shooter::Player,
            TankRole::Enemy(enemy) => Shooter::Enemy(enemy.class),
        }
    }

    pub fn slot(&self) -> Option<u8> {
        match &self.role {
            TankRole::Player(player) => Some(player.slot),
            TankRole::Enemy(_) => None,
        }
    }

    pub fn enemy_state(&self) -> Option<&EnemyState> {
        match &self.role {
            TankRole::Enemy(enemy) => Some(enemy),
            TankRole::Player(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub owner: EntityId,
    pub shooter: Shooter,
    pub direction: Direction,
    /// Sub-tile travel budget, consumed one whole tile at a time.
    pub travel: f32,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Wall,
    Objective(ObjectiveClass),
    Projectile(Projectile),
    Tank(Tank),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub tile: Tile,
    pub lifecycle: Lifecycle,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: EntityId, tile: Tile, kind: EntityKind) -> Self {
        Self {
            id,
            tile,
            lifecycle: Lifecycle::Active,
            kind,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Whether this entity belongs in the spatial index right now.
    pub fn is_indexed(&self) -> bool {
        self.is_active() && !matches!(self.kind, EntityKind::Projectile(_))
    }

    pub fn is_wall(&self) -> bool {
        matches!(self.kind, EntityKind::Wall)
    }

    pub fn is_objective(&self) -> bool {
        matches!(self.kind, EntityKind::Objective(_))
    }

    pub fn is_player_tank(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Tank(Tank {
                role: TankRole::Player(_),
                ..
            })
        )
    }

    pub fn is_enemy_tank(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Tank(Tank {
                role: TankRole::Enemy(_),
                ..
            })
        )
    }

    pub fn tank(&self) -> Option<&Tank> {
        match &self.kind {
            EntityKind::Tank(tank) => Some(tank),
            _ => None,
        }
    }

    pub fn tank_mut(&mut self) -> Option<&mut Tank> {
        match &mut self.kind {
            EntityKind::Tank(tank) => Some(tank),
            _ => None,
        }
    }

    pub fn object_kind(&self) -> ObjectKind {
        match &self.kind {
            EntityKind::Wall => ObjectKind::Wall,
            EntityKind::Objective(class) => class.object_kind(),
            EntityKind::Projectile(_) => ObjectKind::Projectile,
            EntityKind::Tank(tank) => match &tank.role {
                TankRole::Player(_) => ObjectKind::Player,
                TankRole::Enemy(enemy) => enemy.class.object_kind(),
            },
        }
    }

    pub fn view(&self) -> ObjectView {
        let (facing, is_moving, slot) = match &self.kind {
            EntityKind::Tank(tank) => (Some(tank.facing), tank.moved_this_tick, tank.slot()),
            EntityKind::Projectile(projectile) => (Some(projectile.direction), true, None),
            _ => (None, false, None),
        };

        ObjectView {
            id: self.id.0,
            kind: self.object_kind(),
            tile_x: self.tile.x,
            tile_y: self.tile.y,
            facing,
            is_moving,
            slot,
        }
    }
}
