//! Relocation tactics for unstable tokens.

use super::Lattice;
use crate::grid::{Pos, Shape};
use crate::random::Variates;
use serde::{Deserialize, Serialize};

/// Tactic selected in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Random,
    Targeted,
}

/// Empty cells still unclaimed during the current step.
///
/// Built from the empty cells at the start of the step; cells vacated during
/// the step only become available on the next one.
pub struct Vacancies {
    open: Vec<Pos>,
}

impl Vacancies {
    pub fn new(empties: &[Pos]) -> Self {
        Self {
            open: empties.to_vec(),
        }
    }

    fn take_random(&mut self, var: &mut Variates) -> Option<Pos> {
        if self.open.is_empty() {
            return None;
        }
        let idx = var.index(self.open.len());
        Some(self.open.swap_remove(idx))
    }

    fn take_first<F: FnMut(Pos) -> bool>(&mut self, mut accept: F) -> Option<Pos> {
        let idx = self.open.iter().position(|&pos| accept(pos))?;
        Some(self.open.remove(idx))
    }
}

/// How an unstable token picks its destination.
pub trait Tactic {
    /// Claim a destination for the token of type `kind` at `pos`, if any.
    fn select_target(
        &mut self,
        lattice: &Lattice,
        vacancies: &mut Vacancies,
        pos: Pos,
        kind: usize,
        var: &mut Variates,
    ) -> Option<Pos>;

    /// Called after `lattice` has moved a token from `from` to `to`.
    fn commit_move(&mut self, lattice: &Lattice, from: Pos, to: Pos);
}

/// Move to a uniformly chosen empty cell, whatever its neighbourhood.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomMovement;

impl Tactic for RandomMovement {
    fn select_target(
        &mut self,
        _lattice: &Lattice,
        vacancies: &mut Vacancies,
        _pos: Pos,
        _kind: usize,
        var: &mut Variates,
    ) -> Option<Pos> {
        vacancies.take_random(var)
    }

    fn commit_move(&mut self, _lattice: &Lattice, _from: Pos, _to: Pos) {}
}

/// Move to the first empty cell where the token would be stable.
///
/// Keeps the score of every empty cell under every type. Scores only depend
/// on the 8 surrounding cells, so a move only invalidates the scores around
/// its two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetedMovement {
    threshold: f64,
    /// Scores per cell index and type; only meaningful for empty cells.
    scores: Vec<Vec<f64>>,
}

impl TargetedMovement {
    pub fn new(lattice: &Lattice, threshold: f64) -> Self {
        let grid = lattice.grid();
        let mut tactic = Self {
            threshold,
            scores: vec![Vec::new(); grid.n_cells()],
        };
        for pos in grid.positions() {
            if lattice.token(pos).is_none() {
                tactic.refresh_cell(lattice, pos);
            }
        }
        tactic
    }

    /// Memoized score of empty cell `pos` for type `kind`.
    pub fn score(&self, lattice: &Lattice, pos: Pos, kind: usize) -> Option<f64> {
        self.scores[lattice.grid().index(pos)].get(kind).copied()
    }

    fn refresh_cell(&mut self, lattice: &Lattice, pos: Pos) {
        let scores = (0..lattice.n_types())
            .map(|kind| lattice.score(pos, kind))
            .collect();
        self.scores[lattice.grid().index(pos)] = scores;
    }

    fn refresh_around(&mut self, lattice: &Lattice, pos: Pos) {
        for cell in lattice.grid().neighborhood(pos, Shape::Moore, 1, true) {
            if lattice.token(cell).is_none() {
                self.refresh_cell(lattice, cell);
            } else {
                self.scores[lattice.grid().index(cell)].clear();
            }
        }
    }
}

impl Tactic for TargetedMovement {
    fn select_target(
        &mut self,
        lattice: &Lattice,
        vacancies: &mut Vacancies,
        _pos: Pos,
        kind: usize,
        _var: &mut Variates,
    ) -> Option<Pos> {
        let threshold = self.threshold;
        vacancies.take_first(|cell| {
            self.score(lattice, cell, kind)
                .is_some_and(|score| score >= threshold)
        })
    }

    fn commit_move(&mut self, lattice: &Lattice, from: Pos, to: Pos) {
        self.refresh_around(lattice, from);
        self.refresh_around(lattice, to);
    }
}

/// Configured tactic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Movement {
    Random(RandomMovement),
    Targeted(TargetedMovement),
}

impl Movement {
    pub fn new(kind: MovementKind, lattice: &Lattice, threshold: f64) -> Self {
        match kind {
            MovementKind::Random => Movement::Random(RandomMovement),
            MovementKind::Targeted => Movement::Targeted(TargetedMovement::new(lattice, threshold)),
        }
    }

    pub fn tactic(&mut self) -> &mut dyn Tactic {
        match self {
            Movement::Random(tactic) => tactic,
            Movement::Targeted(tactic) => tactic,
        }
    }
}
