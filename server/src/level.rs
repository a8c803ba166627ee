//! Level construction
//!
//! A level is first described as a [`LevelLayout`] (walls, spawn points,
//! enemies, objectives) and only then turned into live entities by the
//! world. Layouts come from two places: the procedural generator, which
//! scales with the level number and the participant count, and the text
//! format shared with the level editor.
//!
//! Text format, one line per row and one character per column:
//!
//! | char | meaning |
//! |------|---------|
//! | ` ` or `.` | empty |
//! | `W` | wall |
//! | `P` | player spawn |
//! | `1` `2` `3` | normal, fast and heavy enemy |
//! | `A` `B` | objective alpha and bravo |

use crate::entity::{EnemyClass, ObjectiveClass, Tile};
use crate::error::LevelError;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{GRID_HEIGHT, GRID_WIDTH};
use std::collections::{HashSet, VecDeque};
use std::f64::consts::TAU;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Level shipped with the server, used when a requested file is missing.
pub const DEFAULT_LEVEL: &str = include_str!("../levels/default.txt");
pub const DEFAULT_LEVEL_NAME: &str = "default";

const WALL_ATTEMPTS: usize = 50;
const PLACEMENT_ATTEMPTS: usize = 100;
const MIN_WALLS: usize = 15;
const SPAWN_SEARCH_RADIUS: i32 = 2;

/// Which level the engine is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelId {
    /// Nothing loaded yet; never counts as cleared.
    None,
    Procedural(u32),
    Custom(String),
}

impl LevelId {
    pub fn label(&self) -> String {
        match self {
            LevelId::None => "none".to_string(),
            LevelId::Procedural(number) => number.to_string(),
            LevelId::Custom(name) => name.clone(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, LevelId::Custom(_))
    }
}

/// Where a level should come from when the engine loads it.
#[derive(Debug, Clone)]
pub enum LevelSource {
    Procedural(u32),
    Text { name: String, text: String },
    File(std::path::PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnemySpawn {
    pub tile: Tile,
    pub class: EnemyClass,
    /// Index into [`LevelLayout::objectives`]; `None` is resolved at build time.
    pub defends: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveSpawn {
    pub tile: Tile,
    pub class: ObjectiveClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelLayout {
    pub width: i32,
    pub height: i32,
    pub walls: Vec<Tile>,
    pub player_spawns: Vec<Tile>,
    pub enemies: Vec<EnemySpawn>,
    pub objectives: Vec<ObjectiveSpawn>,
}

impl LevelLayout {
    pub fn empty(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            walls: Vec::new(),
            player_spawns: Vec::new(),
            enemies: Vec::new(),
            objectives: Vec::new(),
        }
    }

    /// Empty grid enclosed by a one-tile wall border.
    pub fn bordered(width: i32, height: i32) -> Self {
        let mut layout = Self::empty(width, height);
        for y in 0..height {
            for x in 0..width {
                if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                    layout.walls.push(Tile::new(x, y));
                }
            }
        }
        layout
    }

    pub fn in_bounds(&self, tile: Tile) -> bool {
        tile.x >= 0 && tile.y >= 0 && tile.x < self.width && tile.y < self.height
    }

    fn is_interior(&self, tile: Tile) -> bool {
        tile.x > 0 && tile.y > 0 && tile.x < self.width - 1 && tile.y < self.height - 1
    }

    fn occupied_tiles(&self) -> HashSet<Tile> {
        self.walls
            .iter()
            .copied()
            .chain(self.objectives.iter().map(|o| o.tile))
            .chain(self.enemies.iter().map(|e| e.tile))
            .collect()
    }
}

/// Spawn used by the single-player procedural levels.
pub fn level_spawn(level: u32, width: i32, height: i32) -> Tile {
    let y = match level {
        2 => height / 3,
        3 => height / 2 + 1,
        _ => height / 2,
    };
    Tile::new(1.min(width - 1), y.clamp(0, height - 1))
}

/// Fixed corner spawn for a multiplayer slot (1-based, wraps after four).
pub fn corner_spawn(slot: u8, width: i32, height: i32) -> Tile {
    let corners = [
        Tile::new(1, 1),
        Tile::new(width - 2, 1),
        Tile::new(1, height - 2),
        Tile::new(width - 2, height - 2),
    ];
    corners[(slot.max(1) as usize - 1) % corners.len()]
}

fn objective_base(level: u32) -> usize {
    match level {
        1 => 2,
        _ => 3,
    }
}

/// Builds a random level for the given participant slots.
///
/// Wall, objective and defender counts grow with the number of slots.
/// Walls are only accepted if the open interior stays connected, so every
/// spawn can reach every objective.
pub fn generate_level<R: Rng + ?Sized>(
    level: u32,
    slots: &[u8],
    rng: &mut R,
) -> Result<LevelLayout, LevelError> {
    if level == 0 {
        return Err(LevelError::Placeholder);
    }
    if slots.is_empty() {
        return Err(LevelError::NoParticipants);
    }

    let (width, height) = (GRID_WIDTH, GRID_HEIGHT);
    let extra = slots.len() - 1;
    let mut layout = LevelLayout::bordered(width, height);

    layout.player_spawns = if slots.len() == 1 {
        vec![level_spawn(level, width, height)]
    } else {
        slots
            .iter()
            .map(|slot| corner_spawn(*slot, width, height))
            .collect()
    };

    let reserved: HashSet<Tile> = layout
        .player_spawns
        .iter()
        .flat_map(|spawn| std::iter::once(*spawn).chain(spawn.neighbors().map(|(_, t)| t)))
        .collect();

    let max_walls = if extra == 0 {
        ((width * height) / 12) as usize
    } else {
        MIN_WALLS + extra * 5
    };
    let wall_target = rng.gen_range(MIN_WALLS..=max_walls.max(MIN_WALLS));
    let mut walls: HashSet<Tile> = layout.walls.iter().copied().collect();
    let origin = layout.player_spawns[0];

    for _ in 0..wall_target {
        for _ in 0..WALL_ATTEMPTS {
            let tile = random_interior(&layout, rng);
            if walls.contains(&tile) || reserved.contains(&tile) {
                continue;
            }
            if keeps_interior_connected(&layout, &walls, tile, origin) {
                walls.insert(tile);
                layout.walls.push(tile);
                break;
            }
        }
    }

    let objective_count = objective_base(level) + extra;
    for _ in 0..objective_count {
        let tile = (0..PLACEMENT_ATTEMPTS)
            .map(|_| random_interior(&layout, rng))
            .find(|tile| {
                !walls.contains(tile)
                    && !reserved.contains(tile)
                    && !layout.objectives.iter().any(|o| o.tile == *tile)
            })
            .ok_or(LevelError::Placement("objective"))?;
        let class = *ObjectiveClass::ALL
            .choose(rng)
            .ok_or(LevelError::Placement("objective"))?;
        layout.objectives.push(ObjectiveSpawn { tile, class });
    }

    let defenders = 1 + extra / 2;
    for index in 0..layout.objectives.len() {
        let anchor = layout.objectives[index].tile;
        for _ in 0..defenders {
            let occupied = layout.occupied_tiles();
            let spot = (0..PLACEMENT_ATTEMPTS)
                .map(|_| {
                    let angle = rng.gen_range(0.0..TAU);
                    let distance = rng.gen_range(1..=3) as f64;
                    Tile::new(
                        anchor.x + (angle.cos() * distance).round() as i32,
                        anchor.y + (angle.sin() * distance).round() as i32,
                    )
                })
                .find(|tile| {
                    layout.is_interior(*tile) && !occupied.contains(tile) && !reserved.contains(tile)
                });

            match (spot, EnemyClass::ALL.choose(rng)) {
                (Some(tile), Some(class)) => layout.enemies.push(EnemySpawn {
                    tile,
                    class: *class,
                    defends: Some(index),
                }),
                _ => warn!("No room for a defender near objective at {:?}", anchor),
            }
        }
    }

    info!(
        "Generated level {} for {} participant(s): {} walls, {} objectives, {} enemies",
        level,
        slots.len(),
        layout.walls.len(),
        layout.objectives.len(),
        layout.enemies.len()
    );

    Ok(layout)
}

fn random_interior<R: Rng + ?Sized>(layout: &LevelLayout, rng: &mut R) -> Tile {
    Tile::new(
        rng.gen_range(1..layout.width - 1),
        rng.gen_range(1..layout.height - 1),
    )
}

/// Flood fill from `origin` with `candidate` treated as an extra wall.
fn keeps_interior_connected(
    layout: &LevelLayout,
    walls: &HashSet<Tile>,
    candidate: Tile,
    origin: Tile,
) -> bool {
    let blocked = |tile: &Tile| walls.contains(tile) || *tile == candidate;
    let open_total = (0..layout.height)
        .flat_map(|y| (0..layout.width).map(move |x| Tile::new(x, y)))
        .filter(|tile| layout.is_interior(*tile) && !blocked(tile))
        .count();

    let mut seen = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    while let Some(tile) = queue.pop_front() {
        for (_, next) in tile.neighbors() {
            if layout.is_interior(next) && !blocked(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    seen.len() == open_total
}

/// Parses the level text format. Never fails: unknown characters become
/// empty tiles and anything beyond the grid is ignored.
pub fn parse_level(text: &str) -> LevelLayout {
    let mut layout = LevelLayout::empty(GRID_WIDTH, GRID_HEIGHT);

    for (y, line) in text.lines().enumerate().take(GRID_HEIGHT as usize) {
        for (x, ch) in line.chars().enumerate().take(GRID_WIDTH as usize) {
            let tile = Tile::new(x as i32, y as i32);
            let enemy = |class| EnemySpawn {
                tile,
                class,
                defends: None,
            };
            let objective = |class| ObjectiveSpawn { tile, class };

            match ch {
                ' ' | '.' => {}
                'W' => layout.walls.push(tile),
                'P' => layout.player_spawns.push(tile),
                '1' => layout.enemies.push(enemy(EnemyClass::Normal)),
                '2' => layout.enemies.push(enemy(EnemyClass::Fast)),
                '3' => layout.enemies.push(enemy(EnemyClass::Heavy)),
                'A' => layout.objectives.push(objective(ObjectiveClass::Alpha)),
                'B' => layout.objectives.push(objective(ObjectiveClass::Bravo)),
                other => warn!("Unknown level character {:?} at ({}, {})", other, x, y),
            }
        }
    }

    layout
}

/// Writes a layout back out in the text format, one full-width row per line.
pub fn serialize_level(layout: &LevelLayout) -> String {
    let mut grid = vec![vec![' '; layout.width as usize]; layout.height as usize];
    let mut put = |tile: Tile, ch: char| {
        if layout.in_bounds(tile) {
            grid[tile.y as usize][tile.x as usize] = ch;
        }
    };

    for wall in &layout.walls {
        put(*wall, 'W');
    }
    for objective in &layout.objectives {
        let ch = match objective.class {
            ObjectiveClass::Alpha => 'A',
            ObjectiveClass::Bravo => 'B',
        };
        put(objective.tile, ch);
    }
    for enemy in &layout.enemies {
        let ch = match enemy.class {
            EnemyClass::Normal => '1',
            EnemyClass::Fast => '2',
            EnemyClass::Heavy => '3',
        };
        put(enemy.tile, ch);
    }
    for spawn in &layout.player_spawns {
        put(*spawn, 'P');
    }

    grid.into_iter()
        .map(|row| row.into_iter().collect::<String>() + "\n")
        .collect()
}

/// Reads a level file. A missing file falls back to the bundled default.
pub fn load_level_file(path: &Path) -> Result<(String, LevelLayout), LevelError> {
    match fs::read(path) {
        Ok(bytes) => {
            let text =
                String::from_utf8(bytes).map_err(|_| LevelError::Encoding(path.to_path_buf()))?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_LEVEL_NAME.to_string());
            Ok((name, parse_level(&text)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "Level file {} not found, falling back to the default level",
                path.display()
            );
            Ok((DEFAULT_LEVEL_NAME.to_string(), parse_level(DEFAULT_LEVEL)))
        }
        Err(source) => Err(LevelError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Picks a spawn tile for every slot, in slot order.
///
/// A single participant takes the first `P` of the layout (or the grid
/// centre). With several participants the first one still takes the `P` and
/// everyone else gets their slot corner. A blocked candidate is moved to the
/// nearest free tile within two steps.
pub fn assign_spawns(layout: &LevelLayout, slots: &[u8]) -> Result<Vec<(u8, Tile)>, LevelError> {
    if slots.is_empty() {
        return Err(LevelError::NoParticipants);
    }
    if slots.len() == 1 && layout.player_spawns.len() > 1 {
        warn!(
            "Level has {} player spawns, using the first",
            layout.player_spawns.len()
        );
    }

    let mut taken = layout.occupied_tiles();
    let mut assigned = Vec::with_capacity(slots.len());

    for (index, slot) in slots.iter().enumerate() {
        let candidate = match (index, layout.player_spawns.first()) {
            (0, Some(spawn)) => *spawn,
            (0, None) if slots.len() == 1 => Tile::new(layout.width / 2, layout.height / 2),
            _ => corner_spawn(*slot, layout.width, layout.height),
        };

        let tile = nearest_open(layout, &taken, candidate).ok_or(LevelError::SpawnBlocked {
            x: candidate.x,
            y: candidate.y,
        })?;
        taken.insert(tile);
        assigned.push((*slot, tile));
    }

    Ok(assigned)
}

fn nearest_open(layout: &LevelLayout, taken: &HashSet<Tile>, candidate: Tile) -> Option<Tile> {
    let mut offsets: Vec<(i32, i32)> = (-SPAWN_SEARCH_RADIUS..=SPAWN_SEARCH_RADIUS)
        .flat_map(|dy| (-SPAWN_SEARCH_RADIUS..=SPAWN_SEARCH_RADIUS).map(move |dx| (dx, dy)))
        .collect();
    offsets.sort_by_key(|(dx, dy)| dx * dx + dy * dy);

    offsets
        .into_iter()
        .map(|(dx, dy)| Tile::new(candidate.x + dx, candidate.y + dy))
        .find(|tile| layout.in_bounds(*tile) && !taken.contains(tile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
        let mut items = items.to_vec();
        items.sort();
        items
    }

    fn enemy_key(e: &EnemySpawn) -> (Tile, u8) {
        (e.tile, e.class as u8)
    }

    #[test]
    fn test_parse_default_level() {
        let layout = parse_level(DEFAULT_LEVEL);
        assert_eq!(layout.player_spawns, vec![Tile::new(1, 7)]);
        assert_eq!(layout.objectives.len(), 2);
        assert_eq!(layout.enemies.len(), 3);
        assert!(layout.walls.contains(&Tile::new(0, 0)));
        assert!(layout.walls.contains(&Tile::new(19, 14)));
    }

    #[test]
    fn test_parse_ignores_unknown_and_out_of_grid() {
        let mut text = String::from("W?P\n");
        text.push_str(&"W".repeat(30));
        text.push('\n');
        let layout = parse_level(&text);

        assert_eq!(layout.player_spawns, vec![Tile::new(2, 0)]);
        assert_eq!(layout.walls.len(), 1 + GRID_WIDTH as usize);
        assert!(layout.walls.iter().all(|w| w.x < GRID_WIDTH));
    }

    #[test]
    fn test_parse_handles_crlf_and_dots() {
        let layout = parse_level("W.A\r\n.3.\r\n");
        assert_eq!(layout.walls, vec![Tile::new(0, 0)]);
        assert_eq!(layout.objectives[0].tile, Tile::new(2, 0));
        assert_eq!(layout.enemies[0].class, EnemyClass::Heavy);
        assert_eq!(layout.enemies[0].tile, Tile::new(1, 1));
    }

    #[test]
    fn test_serialize_round_trip_default() {
        let layout = parse_level(DEFAULT_LEVEL);
        let text = serialize_level(&layout);
        assert_eq!(text, DEFAULT_LEVEL);
        assert_eq!(parse_level(&text), layout);
    }

    #[test]
    fn test_generated_level_round_trips() {
        let mut rng = StdRng::seed_from_u64(11);
        let layout = generate_level(2, &[1, 2, 3], &mut rng).unwrap();
        let reparsed = parse_level(&serialize_level(&layout));

        assert_eq!(sorted(&reparsed.walls), sorted(&layout.walls));
        assert_eq!(sorted(&reparsed.player_spawns), sorted(&layout.player_spawns));
        let original: Vec<_> = layout.enemies.iter().map(enemy_key).collect();
        let parsed: Vec<_> = reparsed.enemies.iter().map(enemy_key).collect();
        assert_eq!(sorted(&parsed), sorted(&original));
        assert_eq!(reparsed.objectives.len(), layout.objectives.len());
    }

    #[test]
    fn test_generate_rejects_placeholder_and_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            generate_level(0, &[1], &mut rng),
            Err(LevelError::Placeholder)
        ));
        assert!(matches!(
            generate_level(1, &[], &mut rng),
            Err(LevelError::NoParticipants)
        ));
    }

    #[test]
    fn test_generate_scales_with_participants() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let solo = generate_level(1, &[1], &mut rng).unwrap();
            assert_eq!(solo.objectives.len(), 2);
            assert_eq!(solo.player_spawns, vec![Tile::new(1, 7)]);
            assert!(solo.enemies.len() <= 2);

            let quad = generate_level(1, &[1, 2, 3, 4], &mut rng).unwrap();
            assert_eq!(quad.objectives.len(), 5);
            assert_eq!(quad.player_spawns.len(), 4);
            assert!(quad.enemies.len() <= 10);
            assert!(quad.enemies.iter().all(|e| e.defends.is_some()));
        }
    }

    #[test]
    fn test_generated_interior_is_connected() {
        let mut rng = StdRng::seed_from_u64(99);
        for level in 1..=3 {
            let layout = generate_level(level, &[1, 2], &mut rng).unwrap();
            let walls: HashSet<Tile> = layout.walls.iter().copied().collect();
            for objective in &layout.objectives {
                let path = crate::pathfinding::find_path(
                    layout.player_spawns[0],
                    objective.tile,
                    |t| layout.in_bounds(t) && !walls.contains(&t),
                );
                assert!(path.is_some());
            }
        }
    }

    #[test]
    fn test_assign_spawns_single_player() {
        let layout = parse_level(DEFAULT_LEVEL);
        let spawns = assign_spawns(&layout, &[1]).unwrap();
        assert_eq!(spawns, vec![(1, Tile::new(1, 7))]);
    }

    #[test]
    fn test_assign_spawns_without_p_uses_centre() {
        let layout = LevelLayout::bordered(GRID_WIDTH, GRID_HEIGHT);
        let spawns = assign_spawns(&layout, &[1]).unwrap();
        assert_eq!(spawns, vec![(1, Tile::new(10, 7))]);
    }

    #[test]
    fn test_assign_spawns_multiplayer_corners() {
        let layout = parse_level(DEFAULT_LEVEL);
        let spawns = assign_spawns(&layout, &[1, 2, 4]).unwrap();
        assert_eq!(
            spawns,
            vec![
                (1, Tile::new(1, 7)),
                (2, Tile::new(GRID_WIDTH - 2, 1)),
                (4, Tile::new(GRID_WIDTH - 2, GRID_HEIGHT - 2)),
            ]
        );
    }

    #[test]
    fn test_assign_spawns_moves_off_blocked_corner() {
        let mut layout = LevelLayout::bordered(GRID_WIDTH, GRID_HEIGHT);
        layout.walls.push(Tile::new(1, 1));
        let spawns = assign_spawns(&layout, &[2, 1]).unwrap();
        let (_, tile) = spawns[1];
        assert_ne!(tile, Tile::new(1, 1));
        assert!(!layout.walls.contains(&tile));
        assert!(tile.manhattan(Tile::new(1, 1)) <= 2);
    }

    #[test]
    fn test_assign_spawns_fully_blocked() {
        let mut layout = LevelLayout::empty(3, 3);
        for y in 0..3 {
            for x in 0..3 {
                layout.walls.push(Tile::new(x, y));
            }
        }
        assert!(matches!(
            assign_spawns(&layout, &[1]),
            Err(LevelError::SpawnBlocked { .. })
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let (name, layout) = load_level_file(Path::new("no/such/level.txt")).unwrap();
        assert_eq!(name, DEFAULT_LEVEL_NAME);
        assert_eq!(layout, parse_level(DEFAULT_LEVEL));
    }

    #[test]
    fn test_load_level_file_reads_and_names() {
        let path = std::env::temp_dir().join(format!("arena_level_{}.txt", std::process::id()));
        fs::write(&path, "WWW\nWPA\n").unwrap();
        let (name, layout) = load_level_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(name.starts_with("arena_level_"));
        assert_eq!(layout.player_spawns, vec![Tile::new(1, 1)]);
        assert_eq!(layout.objectives.len(), 1);
    }

    #[test]
    fn test_load_level_file_rejects_invalid_utf8() {
        let path = std::env::temp_dir().join(format!("arena_bad_{}.txt", std::process::id()));
        fs::write(&path, [0xff, 0xfe, 0x57]).unwrap();
        let result = load_level_file(&path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(LevelError::Encoding(_))));
    }

    proptest! {
        #[test]
        fn prop_text_round_trip(cells in proptest::collection::vec(
            prop_oneof![Just(' '), Just('W'), Just('P'), Just('1'), Just('2'), Just('3'), Just('A'), Just('B')],
            (GRID_WIDTH * GRID_HEIGHT) as usize,
        )) {
            let text: String = cells
                .chunks(GRID_WIDTH as usize)
                .map(|row| row.iter().collect::<String>() + "\n")
                .collect();
            let layout = parse_level(&text);
            prop_assert_eq!(serialize_level(&layout), text.clone());
            prop_assert_eq!(parse_level(&serialize_level(&layout)), layout);
        }
    }
}
