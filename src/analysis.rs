use crate::config::{Config, ModelConfig};
use crate::model::{GridSnapshot, Record};
use crate::stats::{Accumulator, AccumulatorReport, EpidemicCounts};
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::Path,
};

/// Consumer of sampled records.
pub trait Obs {
    fn update(&mut self, record: &Record) -> Result<()>;
    fn finish(&mut self, summary: &mut Summary) -> Result<()>;
}

/// Per-run summary of scalar observables.
pub type Summary = BTreeMap<String, ScalarReport>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ScalarReport {
    #[serde(flatten)]
    pub stats: AccumulatorReport,
    pub last: f64,
}

/// A scalar extracted from every record.
pub struct Scalar {
    name: &'static str,
    extract: fn(&Record) -> Option<f64>,
    acc: Accumulator,
    last: f64,
}

impl Scalar {
    pub fn new(name: &'static str, extract: fn(&Record) -> Option<f64>) -> Self {
        Self {
            name,
            extract,
            acc: Accumulator::new(),
            last: f64::NAN,
        }
    }
}

impl Obs for Scalar {
    fn update(&mut self, record: &Record) -> Result<()> {
        let val = (self.extract)(record)
            .with_context(|| format!("record has no {} value", self.name))?;
        self.acc.add(val);
        self.last = val;
        Ok(())
    }

    fn finish(&mut self, summary: &mut Summary) -> Result<()> {
        let report = ScalarReport {
            stats: self.acc.report(),
            last: self.last,
        };
        summary.insert(self.name.to_string(), report);
        Ok(())
    }
}

/// Row of the segregation time series.
#[derive(Debug, Serialize)]
struct SegregationRow {
    step: usize,
    moved: usize,
    unstable: usize,
    empty: usize,
    mean_score: f64,
}

/// Writes one CSV row per record.
pub struct CsvSeries {
    writer: csv::Writer<File>,
}

impl CsvSeries {
    pub fn create<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let writer =
            csv::Writer::from_path(file).with_context(|| format!("failed to create {file:?}"))?;
        Ok(Self { writer })
    }
}

impl Obs for CsvSeries {
    fn update(&mut self, record: &Record) -> Result<()> {
        match record {
            Record::Epidemic(counts) => self.writer.serialize(counts),
            Record::Segregation(snapshot) => self.writer.serialize(SegregationRow {
                step: snapshot.step,
                moved: snapshot.moved,
                unstable: snapshot.unstable,
                empty: snapshot.n_empty(),
                mean_score: snapshot.mean_score,
            }),
        }
        .context("failed to write csv row")
    }

    fn finish(&mut self, _summary: &mut Summary) -> Result<()> {
        self.writer.flush().context("failed to flush csv writer")
    }
}

fn epidemic_count(record: &Record, field: fn(&EpidemicCounts) -> usize) -> Option<f64> {
    match record {
        Record::Epidemic(counts) => Some(field(counts) as f64),
        Record::Segregation(_) => None,
    }
}

fn segregation_value(record: &Record, field: fn(&GridSnapshot) -> f64) -> Option<f64> {
    match record {
        Record::Segregation(snapshot) => Some(field(snapshot)),
        Record::Epidemic(_) => None,
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    n_records: usize,
}

impl Analyzer {
    /// Build the observables of the configured model, writing the time series to `csv_file`.
    pub fn new<P: AsRef<Path>>(cfg: &Config, csv_file: P) -> Result<Self> {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(CsvSeries::create(csv_file)?));
        match cfg.model {
            ModelConfig::Epidemic(_) => {
                obs_ptr_vec.push(Box::new(Scalar::new("infected", |rec| {
                    epidemic_count(rec, |c| c.infected)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("susceptible", |rec| {
                    epidemic_count(rec, |c| c.susceptible)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("recovered", |rec| {
                    epidemic_count(rec, |c| c.recovered)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("vaccinated", |rec| {
                    epidemic_count(rec, |c| c.vaccinated)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("alive", |rec| {
                    epidemic_count(rec, |c| c.alive)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("deaths", |rec| {
                    epidemic_count(rec, |c| c.deaths)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("total_infections", |rec| {
                    epidemic_count(rec, |c| c.total_infections)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("total_recoveries", |rec| {
                    epidemic_count(rec, |c| c.total_recoveries)
                })));
            }
            ModelConfig::Segregation(_) => {
                obs_ptr_vec.push(Box::new(Scalar::new("moved", |rec| {
                    segregation_value(rec, |s| s.moved as f64)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("unstable", |rec| {
                    segregation_value(rec, |s| s.unstable as f64)
                })));
                obs_ptr_vec.push(Box::new(Scalar::new("mean_score", |rec| {
                    segregation_value(rec, |s| s.mean_score)
                })));
            }
        }
        Ok(Self {
            obs_ptr_vec,
            n_records: 0,
        })
    }

    /// Feed every record of a trajectory file to the observables.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        while !reader.fill_buf().context("failed to read file")?.is_empty() {
            let record: Record = decode::from_read(&mut reader).context("failed to read record")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&record).context("failed to update observable")?;
            }
            self.n_records += 1;
        }
        Ok(())
    }

    /// Finish every observable and save the summary as TOML.
    pub fn save_results<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        if self.n_records == 0 {
            bail!("no records to analyze");
        }
        let mut summary = Summary::new();
        for obs in &mut self.obs_ptr_vec {
            obs.finish(&mut summary).context("failed to finish observable")?;
        }

        let file = file.as_ref();
        let contents = toml::to_string_pretty(&summary).context("failed to serialize summary")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }
}
