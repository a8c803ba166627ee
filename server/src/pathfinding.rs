//! Grid A* used by enemy tanks to chase their target
//!
//! Four-directional moves with unit cost and a Manhattan heuristic. The
//! search only knows what the caller's `passable` predicate tells it, which
//! in the engine means walls block and tanks do not; tank occupancy is
//! re-checked step by step when the path is walked.

use crate::entity::Tile;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Returns the tiles from `start` to `goal` inclusive, or `None` if the goal
/// is unreachable. `passable` must reject out-of-bounds tiles; `start` itself
/// is never tested.
pub fn find_path<F>(start: Tile, goal: Tile, mut passable: F) -> Option<Vec<Tile>>
where
    F: FnMut(Tile) -> bool,
{
    if start == goal {
        return Some(vec![start]);
    }
    if !passable(goal) {
        return None;
    }

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<Tile, Tile> = HashMap::new();
    let mut best_cost: HashMap<Tile, i32> = HashMap::new();
    let mut closed: HashSet<Tile> = HashSet::new();
    let mut counter: u64 = 0;

    best_cost.insert(start, 0);
    open.push(Reverse((start.manhattan(goal), counter, start)));

    while let Some(Reverse((_, _, current))) = open.pop() {
        if current == goal {
            return Some(reconstruct(&came_from, current));
        }
        if !closed.insert(current) {
            continue;
        }

        let cost = best_cost.get(&current).copied().unwrap_or(i32::MAX);
        for (_, next) in current.neighbors() {
            if closed.contains(&next) || !passable(next) {
                continue;
            }

            let tentative = cost + 1;
            if best_cost.get(&next).map_or(true, |&known| tentative < known) {
                best_cost.insert(next, tentative);
                came_from.insert(next, current);
                counter += 1;
                open.push(Reverse((tentative + next.manhattan(goal), counter, next)));
            }
        }
    }

    None
}

fn reconstruct(came_from: &HashMap<Tile, Tile>, mut current: Tile) -> Vec<Tile> {
    let mut path = vec![current];
    while let Some(&previous) = came_from.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}
