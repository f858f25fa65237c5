use crate::epidemic::rules::{ExternalInfection, Hazard, Immunity, InfectionKernel, Movement};
use crate::grid::{Grid, Topology};
use crate::segregation::movement::MovementKind;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base seed of the random generator. Runs are seeded from the OS when absent.
    pub seed: Option<u64>,

    pub grid: GridConfig,
    pub model: ModelConfig,
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub width: usize,
    pub height: usize,
    pub topology: Topology,
}

impl GridConfig {
    pub fn grid(&self) -> Grid {
        Grid::new(self.width, self.height, self.topology)
    }
}

/// Model to simulate and its parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelConfig {
    Epidemic(EpidemicConfig),
    Segregation(SegregationConfig),
}

/// Parameters of the epidemic model. One step is one hour by default.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EpidemicConfig {
    /// Initial number of people.
    pub num_agents: usize,
    /// Probability that each initial person starts infected.
    pub initial_infected_chance: f64,

    /// Moore radius within which infection spreads.
    pub infection_radius: usize,
    pub infection_kernel: InfectionKernel,
    /// Hazard of an infection ending.
    pub infection_end: Hazard,
    /// Probability that an ending infection kills.
    pub mortality_rate: f64,
    pub immunity: Immunity,

    /// First step of the vaccination campaign. No vaccination when absent.
    pub vaccination_start: Option<usize>,
    /// Per-step probability that a susceptible person gets vaccinated.
    pub general_vaccination_rate: f64,
    /// Probability that a newborn is vaccinated.
    pub newborn_vaccination_rate: f64,

    pub movement: Movement,

    /// Births per year as a fraction of the living population.
    pub population_birth_rate: f64,
    /// Deaths per year as a fraction of the living population.
    pub population_death_rate: f64,
    pub steps_per_year: u32,

    pub external_infection: Option<ExternalInfection>,
}

/// Parameters of the segregation model.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SegregationConfig {
    /// Fraction of cells left empty.
    pub empty_fraction: f64,
    /// Fraction of each type among non-empty cells.
    pub type_distribution: Vec<f64>,
    /// How well each type gets along with each other type, in `[-1, 1]`.
    pub compatibility: Vec<Vec<f64>>,
    /// Score below which a token is unstable.
    pub neighbour_amount: f64,
    pub movement: MovementKind,
}

impl SegregationConfig {
    pub fn n_types(&self) -> usize {
        self.type_distribution.len()
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Maximum number of steps of a run.
    pub max_iterations: usize,
    /// Number of steps between recorded samples.
    pub sample_every: usize,
    /// Maximum number of steps performed per trajectory file.
    pub steps_per_file: usize,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or deserialized,
    /// or if any configuration value is invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;
        config.validate().context("failed to validate config")?;
        Ok(config)
    }

    /// Check every parameter, reporting all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut checks = Checks::default();

        let grid = &self.grid;
        checks.add("grid.width", check_num(grid.width, 1..=100_000));
        checks.add("grid.height", check_num(grid.height, 1..=100_000));

        match &self.model {
            ModelConfig::Epidemic(epi) => epi.validate(grid, &mut checks),
            ModelConfig::Segregation(seg) => seg.validate(&mut checks),
        }

        let out = &self.output;
        checks.add("output.max_iterations", check_num(out.max_iterations, 1..));
        checks.add("output.sample_every", check_num(out.sample_every, 1..));
        checks.add("output.steps_per_file", check_num(out.steps_per_file, 1..));

        checks.finish()
    }
}

impl EpidemicConfig {
    fn validate(&self, grid: &GridConfig, checks: &mut Checks) {
        let n_cells = grid.width.saturating_mul(grid.height);
        checks.add("num_agents", check_num(self.num_agents, 1..=n_cells.max(1)));
        checks.add(
            "initial_infected_chance",
            check_num(self.initial_infected_chance, 0.0..=1.0),
        );

        let min_side = grid.width.min(grid.height);
        checks.add("infection_radius", check_num(self.infection_radius, 1..min_side.max(2)));
        checks.add("infection_kernel", self.infection_kernel.validate());
        checks.add("infection_end", self.infection_end.validate());
        checks.add("mortality_rate", check_num(self.mortality_rate, 0.0..=1.0));
        if let Immunity::Waning { end } = &self.immunity {
            checks.add("immunity.end", end.validate());
        }

        checks.add(
            "general_vaccination_rate",
            check_num(self.general_vaccination_rate, 0.0..=1.0),
        );
        checks.add(
            "newborn_vaccination_rate",
            check_num(self.newborn_vaccination_rate, 0.0..=1.0),
        );

        checks.add("movement", self.movement.validate());

        checks.add("steps_per_year", check_num(self.steps_per_year, 1..));
        checks.add(
            "population_birth_rate",
            check_num(self.population_birth_rate, 0.0..=1.0),
        );
        checks.add(
            "population_death_rate",
            check_num(self.population_death_rate, 0.0..=1.0),
        );

        if let Some(ext) = &self.external_infection {
            checks.add("external_infection.chance", check_num(ext.chance, 0.0..=1.0));
            checks.add("external_infection.interval", check_num(ext.interval, 1..));
        }
    }
}

impl SegregationConfig {
    fn validate(&self, checks: &mut Checks) {
        checks.add("empty_fraction", check_num(self.empty_fraction, 0.0..1.0));

        let n_types = self.n_types();
        checks.add("type_distribution", check_num(n_types, 1..=64));
        checks.add(
            "type_distribution",
            check_vec(&self.type_distribution, n_types, true),
        );
        checks.add(
            "compatibility",
            check_mat(&self.compatibility, (n_types, n_types), -1.0..=1.0),
        );
        checks.add("neighbour_amount", check_num(self.neighbour_amount, -1.0..=1.0));
    }
}

#[derive(Default)]
struct Checks {
    violations: Vec<String>,
}

impl Checks {
    fn add(&mut self, param: &str, res: Result<()>) {
        if let Err(error) = res {
            self.violations.push(format!("{param}: {error:#}"));
        }
    }

    fn finish(self) -> Result<()> {
        if self.violations.is_empty() {
            return Ok(());
        }
        bail!(
            "{} invalid parameter(s):\n  {}",
            self.violations.len(),
            self.violations.join("\n  ")
        );
    }
}

pub(crate) fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_vec(vec: &[f64], exp_len: usize, prob_vec: bool) -> Result<()> {
    // Ensure vector has expected length.
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }
    if !prob_vec {
        return Ok(());
    }
    // For probability vectors: non-negative elements and sums to ~1.0.
    if vec.iter().any(|&ele| ele < 0.0 || ele.is_nan()) {
        bail!("vector must have only non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    let tol = 1e-8;
    if (sum - 1.0).abs() > tol {
        bail!("vector must sum to 1.0 (tolerance: {tol}), but sums to {sum}");
    }
    Ok(())
}

fn check_mat<R>(mat: &[Vec<f64>], exp_dim: (usize, usize), range: R) -> Result<()>
where
    R: RangeBounds<f64> + Debug,
{
    // Ensure matrix has expected dimensions.
    let (exp_n_rows, exp_n_cols) = exp_dim;
    let n_rows = mat.len();
    if n_rows != exp_n_rows {
        bail!("matrix must have {exp_n_rows} rows, but has {n_rows}");
    }
    for (i_row, row) in mat.iter().enumerate() {
        check_vec(row, exp_n_cols, false).with_context(|| format!("invalid row {i_row}"))?;
        if let Some(ele) = row.iter().find(|ele| !range.contains(*ele)) {
            bail!("row {i_row} has element {ele} outside the range {range:?}");
        }
    }
    Ok(())
}
