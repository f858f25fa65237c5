//! Two-dimensional grid geometry and the entity position index.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Integer cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub x: usize,
    pub y: usize,
}

impl Pos {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Edge behaviour of a grid.
///
/// Toroidal grids wrap every coordinate modulo the grid size. Bounded grids
/// reject coordinates outside the grid: neighbourhood queries skip them and
/// moves towards them do not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Toroidal,
    Bounded,
}

/// Neighbourhood shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Every cell within Chebyshev distance `radius`.
    Moore,
    /// Every cell within Manhattan distance `radius`.
    VonNeumann,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    topology: Topology,
}

impl Grid {
    pub fn new(width: usize, height: usize, topology: Topology) -> Self {
        Self {
            width,
            height,
            topology,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn n_cells(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, pos: Pos) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    /// Row-major index of a cell.
    pub fn index(&self, pos: Pos) -> usize {
        pos.y * self.width + pos.x
    }

    pub fn pos(&self, idx: usize) -> Pos {
        Pos::new(idx % self.width, idx / self.width)
    }

    /// All cells in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = Pos> + use<> {
        let grid = *self;
        (0..self.n_cells()).map(move |idx| grid.pos(idx))
    }

    /// Map signed coordinates onto the grid.
    ///
    /// Returns `None` when the coordinates fall outside a bounded grid.
    pub fn resolve(&self, x: i64, y: i64) -> Option<Pos> {
        let (w, h) = (self.width as i64, self.height as i64);
        match self.topology {
            Topology::Toroidal => Some(Pos::new(x.rem_euclid(w) as usize, y.rem_euclid(h) as usize)),
            Topology::Bounded => {
                if (0..w).contains(&x) && (0..h).contains(&y) {
                    Some(Pos::new(x as usize, y as usize))
                } else {
                    None
                }
            }
        }
    }

    /// Cell at a signed offset from `pos`.
    pub fn offset(&self, pos: Pos, dx: i64, dy: i64) -> Option<Pos> {
        self.resolve(pos.x as i64 + dx, pos.y as i64 + dy)
    }

    /// Cells of the neighbourhood of `pos`, without duplicates.
    ///
    /// On small toroidal grids several offsets can wrap onto the same cell;
    /// each cell is reported once.
    pub fn neighborhood(&self, pos: Pos, shape: Shape, radius: usize, include_center: bool) -> Vec<Pos> {
        let r = radius as i64;
        let mut cells = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                if (dx, dy) == (0, 0) && !include_center {
                    continue;
                }
                if shape == Shape::VonNeumann && dx.abs() + dy.abs() > r {
                    continue;
                }
                if let Some(cell) = self.offset(pos, dx, dy) {
                    if !include_center && cell == pos {
                        continue;
                    }
                    cells.push(cell);
                }
            }
        }
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    /// Squared distance between two cells, taking the short way across the
    /// seam on toroidal grids.
    pub fn distance_sq(&self, a: Pos, b: Pos) -> f64 {
        match self.topology {
            Topology::Toroidal => toroidal_distance_sq(a, b, self.width, self.height),
            Topology::Bounded => euclidean_distance_sq(a, b),
        }
    }
}

pub fn euclidean_distance_sq(a: Pos, b: Pos) -> f64 {
    let dx = a.x.abs_diff(b.x) as f64;
    let dy = a.y.abs_diff(b.y) as f64;
    dx * dx + dy * dy
}

pub fn toroidal_distance_sq(a: Pos, b: Pos, width: usize, height: usize) -> f64 {
    let dx = wrapped_delta(a.x, b.x, width) as f64;
    let dy = wrapped_delta(a.y, b.y, height) as f64;
    dx * dx + dy * dy
}

pub fn toroidal_distance(a: Pos, b: Pos, width: usize, height: usize) -> f64 {
    toroidal_distance_sq(a, b, width, height).sqrt()
}

fn wrapped_delta(a: usize, b: usize, dim: usize) -> usize {
    let delta = a.abs_diff(b);
    if 2 * delta > dim { dim - delta } else { delta }
}

/// Multi-occupancy index from entities to cells.
///
/// Owns the position of every placed entity. Each cell keeps its occupants in
/// insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialIndex<K: Ord> {
    grid: Grid,
    cells: Vec<Vec<K>>,
    positions: BTreeMap<K, Pos>,
}

impl<K: Ord + Copy + std::fmt::Debug> SpatialIndex<K> {
    pub fn new(grid: Grid) -> Self {
        let mut cells = Vec::new();
        cells.resize_with(grid.n_cells(), Vec::new);
        Self {
            grid,
            cells,
            positions: BTreeMap::new(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, key: K) -> Option<Pos> {
        self.positions.get(&key).copied()
    }

    pub fn occupants(&self, pos: Pos) -> &[K] {
        &self.cells[self.grid.index(pos)]
    }

    pub fn place(&mut self, key: K, pos: Pos) -> Result<()> {
        if !self.grid.contains(pos) {
            bail!("{pos:?} lies outside the {}x{} grid", self.grid.width, self.grid.height);
        }
        if let Some(old) = self.positions.insert(key, pos) {
            bail!("{key:?} is already placed at {old:?}");
        }
        let idx = self.grid.index(pos);
        self.cells[idx].push(key);
        Ok(())
    }

    pub fn remove(&mut self, key: K) -> Result<Pos> {
        let pos = self
            .positions
            .remove(&key)
            .with_context(|| format!("{key:?} is not placed on the grid"))?;
        let idx = self.grid.index(pos);
        let cell = &mut self.cells[idx];
        let slot = cell
            .iter()
            .position(|&other| other == key)
            .with_context(|| format!("{key:?} missing from cell {pos:?}"))?;
        cell.remove(slot);
        Ok(pos)
    }

    pub fn move_to(&mut self, key: K, pos: Pos) -> Result<()> {
        self.remove(key).context("failed to lift entity")?;
        self.place(key, pos).context("failed to drop entity")
    }

    /// Occupants of the neighbourhood of `pos`, with their cells.
    pub fn neighbors(&self, pos: Pos, shape: Shape, radius: usize, include_center: bool) -> Vec<(K, Pos)> {
        self.grid
            .neighborhood(pos, shape, radius, include_center)
            .into_iter()
            .flat_map(|cell| self.occupants(cell).iter().map(move |&key| (key, cell)))
            .collect()
    }
}
