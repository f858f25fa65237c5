//! Simulation data types.

use crate::grid::Pos;
use crate::stats::EpidemicCounts;
use serde::{Deserialize, Serialize};

/// A value with an optional pending replacement.
///
/// Writing the staged value never touches the current one; [`Staged::commit`]
/// applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staged<T> {
    current: T,
    staged: Option<T>,
}

impl<T: Copy + PartialEq> Staged<T> {
    pub fn new(current: T) -> Self {
        Self {
            current,
            staged: None,
        }
    }

    pub fn current(&self) -> T {
        self.current
    }

    pub fn staged(&self) -> Option<T> {
        self.staged
    }

    pub fn stage(&mut self, next: T) {
        self.staged = Some(next);
    }

    /// Apply the staged value, if any. Returns the previous value when it changed.
    pub fn commit(&mut self) -> Option<T> {
        let next = self.staged.take()?;
        let prev = self.current;
        self.current = next;
        (prev != next).then_some(prev)
    }
}

/// Infection state of a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfectionState {
    Susceptible,
    Infected,
    Recovered,
    Vaccinated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonId(pub u64);

/// Agent of the epidemic model.
///
/// Its position is owned by the spatial index, not by the person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub state: Staged<InfectionState>,
    /// Steps spent infected since the last infection.
    pub infection_duration: u32,
    /// Steps spent recovered since the last recovery.
    pub recovered_duration: u32,
}

impl Person {
    pub fn new(id: PersonId, state: InfectionState) -> Self {
        Self {
            id,
            state: Staged::new(state),
            infection_duration: 0,
            recovered_duration: 0,
        }
    }

    pub fn current(&self) -> InfectionState {
        self.state.current()
    }
}

/// Content of a segregation cell: a type id or empty.
pub type Token = Option<usize>;

/// Segregation grid at a given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub step: usize,
    /// Tokens relocated during this step.
    pub moved: usize,
    /// Tokens that were unstable at the start of this step.
    pub unstable: usize,
    /// Mean satisfaction score of all tokens after this step.
    pub mean_score: f64,
    /// Cells in row-major order.
    pub cells: Vec<Token>,
}

impl GridSnapshot {
    pub fn n_empty(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_none()).count()
    }

    pub fn count_type(&self, kind: usize) -> usize {
        self.cells.iter().filter(|&&cell| cell == Some(kind)).count()
    }
}

/// Record of a simulation at a single sampled step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Epidemic(EpidemicCounts),
    Segregation(GridSnapshot),
}

impl Record {
    pub fn step(&self) -> usize {
        match self {
            Record::Epidemic(counts) => counts.step,
            Record::Segregation(snapshot) => snapshot.step,
        }
    }
}

/// A staged relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub from: Pos,
    pub to: Pos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_leaves_current_value_alone() {
        let mut state = Staged::new(InfectionState::Susceptible);
        state.stage(InfectionState::Infected);
        assert_eq!(state.current(), InfectionState::Susceptible);
        assert_eq!(state.staged(), Some(InfectionState::Infected));

        assert_eq!(state.commit(), Some(InfectionState::Susceptible));
        assert_eq!(state.current(), InfectionState::Infected);
        assert_eq!(state.commit(), None);

        state.stage(InfectionState::Infected);
        assert_eq!(state.commit(), None);
        assert_eq!(state.staged(), None);
    }
}
