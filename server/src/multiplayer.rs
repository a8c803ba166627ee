//! Multi-participant engine
//!
//! Generalizes the single-player tick to a roster of participants keyed by
//! slot. Each participant owns at most one tank in the current world; enemies
//! pick the nearest active participant as their target.

use crate::entity::EntityId;
use crate::error::LevelError;
use crate::game::{build_layout, clear_outcome, score_for, Outcome};
use crate::level::{assign_spawns, LevelId, LevelSource};
use crate::utils::player_color;
use crate::world::{GameEvent, Target, World};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ParticipantView, PlayerInput, Snapshot, GRID_HEIGHT, GRID_WIDTH, MAX_LEVELS};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Participant {
    pub slot: u8,
    pub name: String,
    pub color: String,
    pub score: u32,
    pub tank: Option<EntityId>,
    /// Cleared once the tank is destroyed; inactive participants sit out
    /// the rest of the game.
    pub active: bool,
}

impl Participant {
    pub fn new(slot: u8, name: String) -> Self {
        Self {
            slot,
            name,
            color: player_color(slot),
            score: 0,
            tank: None,
            active: true,
        }
    }
}

pub struct MultiplayerGame {
    pub world: World,
    pub level: LevelId,
    pub max_levels: u32,
    participants: BTreeMap<u8, Participant>,
    rng: StdRng,
}

impl MultiplayerGame {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let world_seed = rng.gen();

        Self {
            world: World::new(GRID_WIDTH, GRID_HEIGHT, world_seed),
            level: LevelId::None,
            max_levels: MAX_LEVELS,
            participants: BTreeMap::new(),
            rng,
        }
    }

    /// Adds a participant to the roster. False if the slot is taken.
    pub fn add_participant(&mut self, slot: u8, name: impl Into<String>) -> bool {
        if self.participants.contains_key(&slot) {
            return false;
        }
        let participant = Participant::new(slot, name.into());
        info!("Participant {} joined slot {}", participant.name, slot);
        self.participants.insert(slot, participant);
        true
    }

    /// Drops a participant and their tank from the running level.
    pub fn remove_participant(&mut self, slot: u8) -> Option<Participant> {
        let participant = self.participants.remove(&slot)?;
        if let Some(tank) = participant.tank {
            self.world.remove_entity(tank);
        }
        info!("Participant {} left slot {}", participant.name, slot);
        Some(participant)
    }

    pub fn participant(&self, slot: u8) -> Option<&Participant> {
        self.participants.get(&slot)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.participants.values().filter(|p| p.active).count()
    }

    fn active_slots(&self) -> Vec<u8> {
        self.participants
            .values()
            .filter(|p| p.active)
            .map(|p| p.slot)
            .collect()
    }

    /// Revives every participant and loads the first level.
    pub fn start_game(&mut self, source: LevelSource) -> Result<(), LevelError> {
        for participant in self.participants.values_mut() {
            participant.active = true;
            participant.score = 0;
        }
        self.load_level(source)
    }

    /// Builds a level for the active participants. On error the previous
    /// world and roster stay as they were.
    pub fn load_level(&mut self, source: LevelSource) -> Result<(), LevelError> {
        let slots = self.active_slots();
        let (level, layout) = build_layout(&source, &slots, &mut self.rng)?;
        let spawns = assign_spawns(&layout, &slots)?;
        let (world, tanks) = World::from_layout(&layout, &spawns, self.rng.gen())?;

        self.world = world;
        for participant in self.participants.values_mut() {
            participant.tank = tanks
                .iter()
                .find(|(slot, _)| *slot == participant.slot)
                .map(|(_, id)| *id);
        }
        info!(
            "Loaded level {} for {} participant(s)",
            level.label(),
            slots.len()
        );
        self.level = level;
        Ok(())
    }

    /// Loads the next procedural level; only surviving participants carry over.
    pub fn advance_level(&mut self) -> Result<u32, LevelError> {
        match self.level {
            LevelId::Procedural(number) if number < self.max_levels => {
                self.load_level(LevelSource::Procedural(number + 1))?;
                Ok(number + 1)
            }
            _ => Err(LevelError::NoNextLevel(self.level.label())),
        }
    }

    pub fn step(&mut self, inputs: &BTreeMap<u8, PlayerInput>, elapsed_ms: u64) -> Outcome {
        self.world.begin_tick(elapsed_ms);

        let idle = PlayerInput::idle();
        let drivers: Vec<(u8, EntityId)> = self
            .participants
            .values()
            .filter(|p| p.active)
            .filter_map(|p| p.tank.map(|tank| (p.slot, tank)))
            .collect();

        for (slot, tank) in &drivers {
            let input = inputs.get(slot).unwrap_or(&idle);
            self.world.apply_intent(*tank, input);
        }

        // slot order, so distance ties go to the lowest slot
        let targets: Vec<Target> = drivers
            .iter()
            .filter_map(|(_, tank)| self.world.target_of(*tank))
            .collect();
        self.world.run_enemies(&targets);
        self.world.resolve_projectiles();

        for event in self.world.take_events() {
            self.record(event);
        }
        for participant in self.participants.values_mut() {
            let alive = participant.tank.map_or(false, |id| self.world.is_active(id));
            if participant.active && !alive {
                participant.active = false;
                info!("Participant {} is out", participant.name);
            }
        }

        if self.active_count() == 0 {
            return Outcome::GameOver;
        }
        if self.world.objectives_cleared(&self.level) {
            return clear_outcome(&self.level, self.max_levels);
        }
        Outcome::Playing
    }

    fn record(&mut self, event: GameEvent) {
        debug!("{:?}", event);
        let by = match event {
            GameEvent::EnemyDestroyed { by, .. } | GameEvent::ObjectiveDestroyed { by, .. } => by,
            GameEvent::PlayerDestroyed { .. } => return,
        };
        if let Some(participant) = self
            .participants
            .values_mut()
            .find(|p| p.tank == Some(by))
        {
            participant.score += score_for(&event);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let lives_of = |participant: &Participant| {
            participant
                .tank
                .and_then(|id| self.world.tank(id))
                .map_or(0, |tank| tank.lives)
        };

        let participants: BTreeMap<u8, ParticipantView> = self
            .participants
            .values()
            .map(|p| {
                let view = ParticipantView {
                    name: p.name.clone(),
                    lives: lives_of(p),
                    score: p.score,
                    color: p.color.clone(),
                    active: p.active,
                };
                (p.slot, view)
            })
            .collect();

        Snapshot {
            tick: self.world.tick(),
            level: self.level.label(),
            player_lives: self
                .participants
                .values()
                .filter(|p| p.active)
                .map(lives_of)
                .sum(),
            objects: self.world.object_views(),
            destroying_enemies: self.world.destroying_enemies(),
            participants: Some(participants),
        }
    }

    /// Clears the level and every participant's progress, keeping the roster.
    pub fn reset_for_lobby(&mut self) {
        for participant in self.participants.values_mut() {
            participant.score = 0;
            participant.active = true;
            participant.tank = None;
        }
        self.world = World::new(GRID_WIDTH, GRID_HEIGHT, self.rng.gen());
        self.level = LevelId::None;
    }
}
