//! Schelling segregation on a single-occupancy grid.

pub mod movement;

use crate::config::SegregationConfig;
use crate::engine::Simulation;
use crate::grid::{Grid, Pos, Shape};
use crate::model::{GridSnapshot, Record, Relocation, Token};
use crate::random::Variates;
use anyhow::{Context, Result, bail};
use movement::{Movement, Vacancies};
use serde::{Deserialize, Serialize};

/// Grid contents together with the type compatibility matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lattice {
    grid: Grid,
    cells: Vec<Token>,
    compatibility: Vec<Vec<f64>>,
}

impl Lattice {
    pub fn new(grid: Grid, cells: Vec<Token>, compatibility: Vec<Vec<f64>>) -> Result<Self> {
        if cells.len() != grid.n_cells() {
            bail!("expected {} cells, got {}", grid.n_cells(), cells.len());
        }
        let n_types = compatibility.len();
        if let Some(kind) = cells.iter().flatten().find(|&&kind| kind >= n_types) {
            bail!("type {kind} has no compatibility row");
        }
        Ok(Self {
            grid,
            cells,
            compatibility,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn cells(&self) -> &[Token] {
        &self.cells
    }

    pub fn n_types(&self) -> usize {
        self.compatibility.len()
    }

    pub fn token(&self, pos: Pos) -> Token {
        self.cells[self.grid.index(pos)]
    }

    /// Satisfaction of a token of type `kind` placed at `pos`.
    ///
    /// Mean compatibility with the non-empty cells among the 8 surrounding
    /// ones, or 0 if they are all empty or off-grid.
    pub fn score(&self, pos: Pos, kind: usize) -> f64 {
        let mut sum = 0.0;
        let mut n_neighbours = 0;
        for cell in self.grid.neighborhood(pos, Shape::Moore, 1, false) {
            if let Some(other) = self.token(cell) {
                sum += self.compatibility[kind][other];
                n_neighbours += 1;
            }
        }
        if n_neighbours == 0 {
            0.0
        } else {
            sum / n_neighbours as f64
        }
    }

    /// Mean score of every token under its own type.
    pub fn mean_score(&self) -> f64 {
        let mut sum = 0.0;
        let mut n_tokens = 0;
        for pos in self.grid.positions() {
            if let Some(kind) = self.token(pos) {
                sum += self.score(pos, kind);
                n_tokens += 1;
            }
        }
        if n_tokens == 0 {
            0.0
        } else {
            sum / n_tokens as f64
        }
    }

    fn relocate(&mut self, from: Pos, to: Pos) -> Result<()> {
        let (i_from, i_to) = (self.grid.index(from), self.grid.index(to));
        if self.cells[i_to].is_some() {
            bail!("destination {to:?} is occupied");
        }
        let token = self.cells[i_from]
            .take()
            .with_context(|| format!("origin {from:?} is empty"))?;
        self.cells[i_to] = Some(token);
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Segregation {
    threshold: f64,
    lattice: Lattice,
    /// Empty cells; every cell is either here or typed.
    empties: Vec<Pos>,
    movement: Movement,
    history: Vec<Vec<Token>>,
    step: usize,
    moved: usize,
    unstable: usize,
    running: bool,
}

impl Segregation {
    /// Fill the grid following the configured empty fraction and type distribution.
    pub fn new(cfg: &SegregationConfig, grid: Grid, var: &mut Variates) -> Result<Self> {
        let n_cells = grid.n_cells();
        let mut order: Vec<Pos> = grid.positions().collect();
        var.shuffle(&mut order);

        let n_empty = (n_cells as f64 * cfg.empty_fraction) as usize;
        let n_typeable = n_cells - n_empty;
        let n_types = cfg.n_types();

        let mut cells = vec![None; n_cells];
        let mut typeable = order[n_empty..].iter();
        for (kind, &frac) in cfg.type_distribution.iter().enumerate().take(n_types - 1) {
            let count = (n_typeable as f64 * frac) as usize;
            for &pos in typeable.by_ref().take(count) {
                cells[grid.index(pos)] = Some(kind);
            }
        }
        for &pos in typeable {
            cells[grid.index(pos)] = Some(n_types - 1);
        }

        let lattice = Lattice::new(grid, cells, cfg.compatibility.clone())?;
        Self::from_lattice(lattice, cfg.neighbour_amount, cfg.movement)
    }

    /// Start from an explicit grid.
    pub fn from_lattice(
        lattice: Lattice,
        threshold: f64,
        kind: movement::MovementKind,
    ) -> Result<Self> {
        let empties: Vec<Pos> = lattice
            .grid()
            .positions()
            .filter(|&pos| lattice.token(pos).is_none())
            .collect();
        let movement = Movement::new(kind, &lattice, threshold);
        log::info!(
            "filled {} cells, {} empty",
            lattice.cells().len(),
            empties.len()
        );

        Ok(Self {
            threshold,
            history: vec![lattice.cells().to_vec()],
            lattice,
            empties,
            movement,
            step: 0,
            moved: 0,
            unstable: 0,
            running: true,
        })
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn empties(&self) -> &[Pos] {
        &self.empties
    }

    /// Initial grid followed by the grid after every step that moved a token.
    pub fn history(&self) -> &[Vec<Token>] {
        &self.history
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            step: self.step,
            moved: self.moved,
            unstable: self.unstable,
            mean_score: self.lattice.mean_score(),
            cells: self.lattice.cells().to_vec(),
        }
    }

    /// Unstable tokens and where they go, judged on the grid as it is now.
    fn stage(&mut self, var: &mut Variates) -> (Vec<Relocation>, usize) {
        let mut vacancies = Vacancies::new(&self.empties);
        let mut relocations = Vec::new();
        let mut unstable = 0;
        let tactic = self.movement.tactic();
        for pos in self.lattice.grid().positions() {
            let Some(kind) = self.lattice.token(pos) else {
                continue;
            };
            if self.lattice.score(pos, kind) >= self.threshold {
                continue;
            }
            unstable += 1;
            if let Some(to) = tactic.select_target(&self.lattice, &mut vacancies, pos, kind, var) {
                relocations.push(Relocation { from: pos, to });
            }
        }
        (relocations, unstable)
    }

    fn commit(&mut self, relocations: &[Relocation]) -> Result<()> {
        for &Relocation { from, to } in relocations {
            self.lattice
                .relocate(from, to)
                .with_context(|| format!("failed to move {from:?} to {to:?}"))?;
            let slot = self
                .empties
                .iter()
                .position(|&pos| pos == to)
                .with_context(|| format!("{to:?} is not an empty cell"))?;
            self.empties[slot] = from;
            self.movement.tactic().commit_move(&self.lattice, from, to);
        }
        Ok(())
    }
}

impl Simulation for Segregation {
    fn step(&mut self, var: &mut Variates) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        let (relocations, unstable) = self.stage(var);
        self.commit(&relocations)
            .context("failed to commit relocations")?;

        self.step += 1;
        self.moved = relocations.len();
        self.unstable = unstable;
        log::debug!(
            "step {}: {} unstable, {} moved",
            self.step,
            unstable,
            self.moved
        );

        if self.moved == 0 {
            self.running = false;
            log::info!("grid is stable after step {}", self.step);
        } else {
            self.history.push(self.lattice.cells().to_vec());
        }

        Ok(())
    }

    fn running(&self) -> bool {
        self.running
    }

    fn steps(&self) -> usize {
        self.step
    }

    fn record(&self) -> Record {
        Record::Segregation(self.snapshot())
    }
}
