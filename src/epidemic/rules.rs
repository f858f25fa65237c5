//! Probability rules of the epidemic model.

use crate::config::check_num;
use crate::grid::{Grid, Pos, Shape};
use crate::random::{Variates, erlang_cdf};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Per-step probability that a spell (infection, immunity) ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hazard {
    /// Erlang CDF of the number of steps already spent in the state.
    Erlang { shape: u32, scale: f64 },
    /// Same probability every step.
    Constant { prob: f64 },
    /// Ends deterministically after `steps` steps.
    Countdown { steps: u32 },
}

impl Hazard {
    /// Probability of ending during the current step, given `elapsed` completed steps.
    pub fn end_chance(&self, elapsed: u32) -> f64 {
        match *self {
            Hazard::Erlang { shape, scale } => erlang_cdf(elapsed as f64, shape, scale),
            Hazard::Constant { prob } => prob,
            Hazard::Countdown { steps } => {
                if elapsed + 1 >= steps {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Hazard::Erlang { shape, scale } => {
                check_num(shape, 1..=10_000).context("invalid erlang shape")?;
                check_num(scale, f64::MIN_POSITIVE..1e9).context("invalid erlang scale")?;
            }
            Hazard::Constant { prob } => {
                check_num(prob, 0.0..=1.0).context("invalid constant probability")?;
            }
            Hazard::Countdown { steps } => {
                check_num(steps, 1..=1_000_000).context("invalid countdown length")?;
            }
        }
        Ok(())
    }
}

/// Probability that an infected person infects a susceptible one at a given distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InfectionKernel {
    /// `base / max(d², 1)`.
    InverseSquare { base: f64 },
    /// `probs[min(round(d), len - 1)]`.
    Table { probs: Vec<f64> },
}

impl InfectionKernel {
    pub fn chance(&self, dist_sq: f64) -> f64 {
        match self {
            InfectionKernel::InverseSquare { base } => base / dist_sq.max(1.0),
            InfectionKernel::Table { probs } => {
                let idx = (dist_sq.sqrt().round() as usize).min(probs.len() - 1);
                probs[idx]
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            InfectionKernel::InverseSquare { base } => {
                check_num(*base, 0.0..=1.0).context("invalid base probability")?;
            }
            InfectionKernel::Table { probs } => {
                if probs.is_empty() {
                    bail!("table must have at least one entry");
                }
                for (idx, &prob) in probs.iter().enumerate() {
                    check_num(prob, 0.0..=1.0).with_context(|| format!("invalid entry {idx}"))?;
                }
                if probs.windows(2).any(|pair| pair[1] > pair[0]) {
                    bail!("table must be non-increasing in distance");
                }
            }
        }
        Ok(())
    }
}

/// What recovery grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Immunity {
    /// Recovered people are susceptible again right away.
    None,
    /// Recovered people stay immune.
    Permanent,
    /// Immunity wears off with the given hazard.
    Waning { end: Hazard },
}

/// How people move every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Movement {
    /// Normally distributed distance along a uniform heading.
    Gaussian { mean: f64, sd: f64 },
    /// One step to a random orthogonal neighbour.
    VonNeumann,
}

impl Movement {
    /// Cell to move to, or `None` to stay (bounded grids reject off-grid moves).
    pub fn destination(&self, grid: &Grid, from: Pos, var: &mut Variates) -> Result<Option<Pos>> {
        match *self {
            Movement::Gaussian { mean, sd } => {
                let distance = var.normal(mean, sd)?;
                let heading = var.heading()?;
                let dx = (distance * heading.cos()).round() as i64;
                let dy = (distance * heading.sin()).round() as i64;
                Ok(grid.offset(from, dx, dy))
            }
            Movement::VonNeumann => {
                let cells = grid.neighborhood(from, Shape::VonNeumann, 1, false);
                if cells.is_empty() {
                    return Ok(None);
                }
                Ok(Some(cells[var.index(cells.len())]))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Movement::Gaussian { mean, sd } = *self {
            check_num(mean, -1e6..=1e6).context("invalid mean distance")?;
            check_num(sd, 0.0..=1e6).context("invalid distance standard deviation")?;
        }
        Ok(())
    }
}

/// Random infections coming from outside the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalInfection {
    /// Probability that each susceptible person gets infected when it fires.
    pub chance: f64,
    /// Fires on every step that is a multiple of `interval`.
    pub interval: usize,
}

/// Convert a yearly rate into a per-step probability.
pub fn per_step(yearly_rate: f64, steps_per_year: u32) -> f64 {
    yearly_rate / steps_per_year as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Topology;

    #[test]
    fn inverse_square_floors_distance() {
        let kernel = InfectionKernel::InverseSquare { base: 0.13 };
        assert_eq!(kernel.chance(0.0), 0.13);
        assert_eq!(kernel.chance(1.0), 0.13);
        assert!((kernel.chance(4.0) - 0.0325).abs() < 1e-12);
    }

    #[test]
    fn table_clamps_to_last_entry() {
        let kernel = InfectionKernel::Table {
            probs: vec![0.13, 0.06, 0.03],
        };
        assert_eq!(kernel.chance(0.0), 0.13);
        assert_eq!(kernel.chance(1.0), 0.06);
        assert_eq!(kernel.chance(2.0), 0.06);
        assert_eq!(kernel.chance(100.0), 0.03);

        let rising = InfectionKernel::Table {
            probs: vec![0.1, 0.2],
        };
        assert!(rising.validate().is_err());
    }

    #[test]
    fn countdown_fires_after_its_length() {
        let hazard = Hazard::Countdown { steps: 3 };
        assert_eq!(hazard.end_chance(0), 0.0);
        assert_eq!(hazard.end_chance(1), 0.0);
        assert_eq!(hazard.end_chance(2), 1.0);
    }

    #[test]
    fn von_neumann_moves_one_orthogonal_step() {
        let grid = Grid::new(10, 10, Topology::Toroidal);
        let mut var = Variates::seeded(3);
        for _ in 0..50 {
            let to = Movement::VonNeumann
                .destination(&grid, Pos::new(0, 0), &mut var)
                .unwrap()
                .unwrap();
            assert_eq!(grid.distance_sq(Pos::new(0, 0), to), 1.0);
        }
    }

    #[test]
    fn gaussian_moves_are_rejected_off_bounded_grid() {
        let grid = Grid::new(10, 10, Topology::Bounded);
        let movement = Movement::Gaussian { mean: 50.0, sd: 0.0 };
        let mut var = Variates::seeded(5);
        let to = movement.destination(&grid, Pos::new(5, 5), &mut var).unwrap();
        assert_eq!(to, None);
    }
}
