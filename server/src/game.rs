use crate::entity::{EntityId, Tile};
use crate::error::LevelError;
use crate::level::{
    assign_spawns, generate_level, load_level_file, parse_level, LevelId, LevelLayout, LevelSource,
};
use crate::world::{GameEvent, World};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{PlayerInput, Snapshot, MAX_LEVELS};

pub const ENEMY_SCORE: u32 = 100;
pub const OBJECTIVE_SCORE: u32 = 250;

/// Result of one engine tick. `Playing` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Playing,
    GameOver,
    LevelCleared,
    FinalVictory,
}

/// Resolves a level source into a layout for the given slots.
pub fn build_layout<R: Rng + ?Sized>(
    source: &LevelSource,
    slots: &[u8],
    rng: &mut R,
) -> Result<(LevelId, LevelLayout), LevelError> {
    match source {
        LevelSource::Procedural(level) => {
            let layout = generate_level(*level, slots, rng)?;
            Ok((LevelId::Procedural(*level), layout))
        }
        LevelSource::Text { name, text } => Ok((LevelId::Custom(name.clone()), parse_level(text))),
        LevelSource::File(path) => {
            let (name, layout) = load_level_file(path)?;
            Ok((LevelId::Custom(name), layout))
        }
    }
}

/// Terminal outcome once every objective present at load is gone.
pub fn clear_outcome(level: &LevelId, max_levels: u32) -> Outcome {
    match level {
        LevelId::Procedural(number) if *number < max_levels => Outcome::LevelCleared,
        _ => Outcome::FinalVictory,
    }
}

/// Points credited for a scoring event.
pub fn score_for(event: &GameEvent) -> u32 {
    match event {
        GameEvent::EnemyDestroyed { .. } => ENEMY_SCORE,
        GameEvent::ObjectiveDestroyed { .. } => OBJECTIVE_SCORE,
        GameEvent::PlayerDestroyed { .. } => 0,
    }
}

/// Single-player engine: one participant against the AI.
pub struct GameState {
    pub world: World,
    pub level: LevelId,
    pub max_levels: u32,
    player: Option<EntityId>,
    score: u32,
    rng: StdRng,
}

impl GameState {
    /// An engine with nothing loaded. Stepping it reports `GameOver`.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let world_seed = rng.gen();

        Self {
            world: World::new(shared::GRID_WIDTH, shared::GRID_HEIGHT, world_seed),
            level: LevelId::None,
            max_levels: MAX_LEVELS,
            player: None,
            score: 0,
            rng,
        }
    }

    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    pub fn player_tile(&self) -> Option<Tile> {
        self.player.and_then(|id| self.world.entity(id)).map(|e| e.tile)
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Replaces the running level. On error the previous level keeps running.
    pub fn load_level(&mut self, source: LevelSource) -> Result<(), LevelError> {
        let (level, layout) = build_layout(&source, &[1], &mut self.rng)?;
        let spawns = assign_spawns(&layout, &[1])?;
        let (world, players) = World::from_layout(&layout, &spawns, self.rng.gen())?;

        self.world = world;
        self.player = players.first().map(|(_, id)| *id);
        info!(
            "Loaded level {} with {} objectives",
            level.label(),
            self.world.objectives_remaining()
        );
        self.level = level;
        Ok(())
    }

    /// Loads the procedural level after the current one.
    pub fn advance_level(&mut self) -> Result<(), LevelError> {
        match self.level {
            LevelId::Procedural(number) if number < self.max_levels => {
                self.load_level(LevelSource::Procedural(number + 1))
            }
            _ => Err(LevelError::NoNextLevel(self.level.label())),
        }
    }

    pub fn step(&mut self, input: &PlayerInput, elapsed_ms: u64) -> Outcome {
        self.world.begin_tick(elapsed_ms);

        let Some(player) = self.player else {
            return Outcome::GameOver;
        };

        self.world.apply_intent(player, input);
        let targets: Vec<_> = self.world.target_of(player).into_iter().collect();
        self.world.run_enemies(&targets);
        self.world.resolve_projectiles();

        for event in self.world.take_events() {
            debug!("{:?}", event);
            self.score += score_for(&event);
        }

        if !self.world.is_active(player) {
            return Outcome::GameOver;
        }
        if self.world.objectives_cleared(&self.level) {
            return clear_outcome(&self.level, self.max_levels);
        }
        Outcome::Playing
    }

    pub fn snapshot(&self) -> Snapshot {
        let player_lives = self
            .player
            .and_then(|id| self.world.tank(id))
            .map_or(0, |tank| tank.lives);

        Snapshot {
            tick: self.world.tick(),
            level: self.level.label(),
            player_lives,
            objects: self.world.object_views(),
            destroying_enemies: self.world.destroying_enemies(),
            participants: None,
        }
    }
}
