use crate::config::{Config, ModelConfig};
use crate::epidemic::Epidemic;
use crate::model::Record;
use crate::random::Variates;
use crate::segregation::Segregation;
use crate::stats::Collector;
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// A model advanced one synchronous step at a time.
pub trait Simulation {
    /// Stage and commit one step. Does nothing once the model is terminal.
    fn step(&mut self, var: &mut Variates) -> Result<()>;

    /// Whether further steps can change the model.
    fn running(&self) -> bool;

    /// Number of steps performed so far.
    fn steps(&self) -> usize;

    /// Sample of the current state.
    fn record(&self) -> Record;
}

#[derive(Clone, Serialize, Deserialize)]
pub enum Model {
    Epidemic(Epidemic),
    Segregation(Segregation),
}

impl Model {
    pub fn sim(&self) -> &dyn Simulation {
        match self {
            Model::Epidemic(epi) => epi,
            Model::Segregation(seg) => seg,
        }
    }

    fn sim_mut(&mut self) -> &mut dyn Simulation {
        match self {
            Model::Epidemic(epi) => epi,
            Model::Segregation(seg) => seg,
        }
    }
}

/// Simulation engine.
///
/// Holds the configuration, current model, and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    model: Model,
    var: Variates,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    pub fn generate_initial_condition(cfg: Config, seed: Option<u64>) -> Result<Self> {
        let mut var = Variates::new(seed)?;
        let grid = cfg.grid.grid();

        let model = match &cfg.model {
            ModelConfig::Epidemic(epi) => Model::Epidemic(
                Epidemic::new(epi.clone(), grid, &mut var)
                    .context("failed to place initial population")?,
            ),
            ModelConfig::Segregation(seg) => Model::Segregation(
                Segregation::new(seg, grid, &mut var).context("failed to fill initial grid")?,
            ),
        };

        Ok(Self { cfg, model, var })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn steps(&self) -> usize {
        self.model.sim().steps()
    }

    /// Whether the run should continue: the model is not terminal and the
    /// iteration cap has not been reached.
    pub fn running(&self) -> bool {
        let sim = self.model.sim();
        sim.running() && sim.steps() < self.cfg.output.max_iterations
    }

    pub fn step(&mut self) -> Result<()> {
        self.model.sim_mut().step(&mut self.var)
    }

    pub fn record(&self) -> Record {
        self.model.sim().record()
    }

    /// Perform up to `steps_per_file` steps, writing every sampled record to `writer`.
    ///
    /// The initial state is sampled when the run has not started yet, and the
    /// final state is always sampled when the run ends.
    pub fn run<W: Write>(&mut self, writer: &mut W) -> Result<Collector<Record>> {
        let out = &self.cfg.output;
        let steps_per_file = out.steps_per_file;
        let mut series = Collector::new(out.sample_every);

        if self.steps() == 0 {
            let record = series.push(self.record());
            encode::write_named(writer, record).context("failed to serialize record")?;
        }

        for i_step in 0..steps_per_file {
            if !self.running() {
                break;
            }
            self.step().context("failed to perform step")?;

            if series.is_due(self.steps()) || !self.running() {
                let record = series.push(self.record());
                encode::write_named(writer, record).context("failed to serialize record")?;
            }

            if (i_step + 1) % (steps_per_file / 10).max(1) == 0 {
                let progress = 100.0 * (i_step + 1) as f64 / steps_per_file as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(series)
    }

    /// Perform the simulation and save the sampled records to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<Collector<Record>> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let series = self.run(&mut writer)?;

        writer.flush().context("failed to flush writer stream")?;

        Ok(series)
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}
