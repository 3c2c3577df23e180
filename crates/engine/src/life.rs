//! CPU side of the cell model: the B3/S23 update rule and the seed policies
//! that fill the initial grid.
//!
//! Cells are stored row-major, `index = y * size + x`, one `u32` per cell
//! holding 0 (dead) or 1 (alive). This matches the layout the compute program
//! reads and writes.

use lifeconfig::{EdgePolicy, SeedSection};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEAD: u32 = 0;
pub const ALIVE: u32 = 1;

/// Number of live Moore neighbours of `(x, y)`.
pub fn live_neighbors(cells: &[u32], size: u32, x: u32, y: u32, edges: EdgePolicy) -> u32 {
    let n = i64::from(size);
    let mut count = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let mut nx = i64::from(x) + dx;
            let mut ny = i64::from(y) + dy;
            if edges.wraps() {
                nx = nx.rem_euclid(n);
                ny = ny.rem_euclid(n);
            } else if nx < 0 || ny < 0 || nx >= n || ny >= n {
                continue;
            }
            let index = (ny * n + nx) as usize;
            if cells[index] != DEAD {
                count += 1;
            }
        }
    }
    count
}

/// Next state of a single cell given its current state and neighbour count.
pub fn next_cell(current: u32, neighbors: u32) -> u32 {
    match neighbors {
        2 => current,
        3 => ALIVE,
        _ => DEAD,
    }
}

/// Applies one generation of the rule to a whole grid.
pub fn next_generation(cells: &[u32], size: u32, edges: EdgePolicy) -> Vec<u32> {
    debug_assert_eq!(cells.len() as u64, u64::from(size) * u64::from(size));
    let mut next = vec![DEAD; cells.len()];
    for y in 0..size {
        for x in 0..size {
            let index = (y * size + x) as usize;
            let neighbors = live_neighbors(cells, size, x, y, edges);
            next[index] = next_cell(cells[index], neighbors);
        }
    }
    next
}

pub fn count_alive(cells: &[u32]) -> u64 {
    cells.iter().filter(|&&cell| cell != DEAD).count() as u64
}

/// Fills a freshly allocated grid before it is uploaded.
pub trait SeedPolicy {
    fn fill(&mut self, cells: &mut [u32]);
}

/// Each cell alive independently with a fixed probability.
pub struct RandomSeed {
    probability: f64,
    rng: StdRng,
}

impl RandomSeed {
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn from_config(section: &SeedSection) -> Self {
        Self::new(section.live_probability, section.seed)
    }
}

impl SeedPolicy for RandomSeed {
    fn fill(&mut self, cells: &mut [u32]) {
        for cell in cells.iter_mut() {
            *cell = if self.rng.gen::<f64>() < self.probability {
                ALIVE
            } else {
                DEAD
            };
        }
    }
}

/// Seed for hosts that need two simulations to start from the same pattern.
pub fn fresh_seed() -> u64 {
    rand::random()
}

/// Every cell in the same state.
#[derive(Debug, Clone, Copy)]
pub struct UniformSeed(pub bool);

impl SeedPolicy for UniformSeed {
    fn fill(&mut self, cells: &mut [u32]) {
        cells.fill(if self.0 { ALIVE } else { DEAD });
    }
}

impl<F: FnMut(&mut [u32])> SeedPolicy for F {
    fn fill(&mut self, cells: &mut [u32]) {
        self(cells)
    }
}
