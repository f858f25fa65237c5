//! Spatial SIR/SIRS epidemic with vaccination and demography.
//!
//! Every step is split into a stage pass, which reads only the state at the
//! start of the step and produces one [`Plan`] per person, and a commit pass
//! that applies all plans together.

pub mod rules;

use crate::config::EpidemicConfig;
use crate::engine::Simulation;
use crate::grid::{Grid, Pos, Shape, SpatialIndex};
use crate::model::{InfectionState, Person, PersonId, Record};
use crate::random::{StreamKey, Variates};
use crate::stats::EpidemicCounts;
use anyhow::{Context, Result};
use rules::{Immunity, per_step};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use InfectionState::*;

#[derive(Clone, Serialize, Deserialize)]
pub struct Epidemic {
    cfg: EpidemicConfig,
    index: SpatialIndex<PersonId>,
    people: BTreeMap<PersonId, Person>,
    next_id: u64,
    step: usize,
    deaths: usize,
    total_infections: usize,
    total_recoveries: usize,
    running: bool,
}

/// Changes staged for one person during a step.
#[derive(Debug, Clone, PartialEq)]
struct Plan {
    id: PersonId,
    /// Own state transition.
    next: Option<InfectionState>,
    /// Susceptible neighbours infected by this person.
    infects: Vec<PersonId>,
    /// The infection ended in recovery.
    recovers: bool,
    destination: Option<Pos>,
    /// State of a newborn, if this person gives birth.
    birth: Option<InfectionState>,
    dies: bool,
}

impl Plan {
    fn new(id: PersonId) -> Self {
        Self {
            id,
            next: None,
            infects: Vec::new(),
            recovers: false,
            destination: None,
            birth: None,
            dies: false,
        }
    }
}

impl Epidemic {
    /// Place `num_agents` people uniformly at random on the grid.
    pub fn new(cfg: EpidemicConfig, grid: Grid, var: &mut Variates) -> Result<Self> {
        let mut epi = Self {
            index: SpatialIndex::new(grid),
            people: BTreeMap::new(),
            next_id: 0,
            step: 0,
            deaths: 0,
            total_infections: 0,
            total_recoveries: 0,
            running: true,
            cfg,
        };

        for _ in 0..epi.cfg.num_agents {
            let state = if var.chance(epi.cfg.initial_infected_chance) {
                Infected
            } else {
                Susceptible
            };
            if state == Infected {
                epi.total_infections += 1;
            }
            let pos = Pos::new(var.index(grid.width()), var.index(grid.height()));
            epi.add_person(state, pos)?;
        }

        epi.running = epi.is_active();
        log::info!(
            "placed {} people, {} infected",
            epi.people.len(),
            epi.total_infections
        );

        Ok(epi)
    }

    pub fn people(&self) -> impl Iterator<Item = &Person> {
        self.people.values()
    }

    pub fn position(&self, id: PersonId) -> Option<Pos> {
        self.index.position(id)
    }

    pub fn grid(&self) -> &Grid {
        self.index.grid()
    }

    pub fn vaccination_started(&self) -> bool {
        self.cfg
            .vaccination_start
            .is_some_and(|start| self.step >= start)
    }

    pub fn counts(&self) -> EpidemicCounts {
        let mut counts = EpidemicCounts {
            step: self.step,
            deaths: self.deaths,
            alive: self.people.len(),
            total_infections: self.total_infections,
            total_recoveries: self.total_recoveries,
            ..Default::default()
        };
        for person in self.people.values() {
            match person.current() {
                Susceptible => counts.susceptible += 1,
                Infected => counts.infected += 1,
                Recovered => counts.recovered += 1,
                Vaccinated => counts.vaccinated += 1,
            }
        }
        counts
    }

    fn is_active(&self) -> bool {
        let infected = self.people.values().any(|person| person.current() == Infected);
        infected || (self.cfg.external_infection.is_some() && self.has_susceptible_pool())
    }

    /// Someone is susceptible now or can still become susceptible.
    fn has_susceptible_pool(&self) -> bool {
        let waning = matches!(self.cfg.immunity, Immunity::Waning { .. });
        let births = self.cfg.population_birth_rate > 0.0 && !self.people.is_empty();
        births
            || self.people.values().any(|person| match person.current() {
                Susceptible => true,
                Recovered => waning,
                Infected | Vaccinated => false,
            })
    }

    fn add_person(&mut self, state: InfectionState, pos: Pos) -> Result<PersonId> {
        let id = PersonId(self.next_id);
        self.next_id += 1;
        self.index.place(id, pos)?;
        self.people.insert(id, Person::new(id, state));
        Ok(id)
    }

    fn remove_person(&mut self, id: PersonId) -> Result<()> {
        self.index.remove(id)?;
        self.people
            .remove(&id)
            .with_context(|| format!("{id:?} is not alive"))?;
        Ok(())
    }

    fn infect_externally(&mut self, var: &mut Variates) {
        let Some(ext) = &self.cfg.external_infection else {
            return;
        };
        if self.step % ext.interval != 0 {
            return;
        }
        let chance = ext.chance;
        for person in self.people.values_mut() {
            if person.current() == Susceptible && var.chance(chance) {
                person.state.stage(Infected);
                person.state.commit();
                person.infection_duration = 0;
                self.total_infections += 1;
            }
        }
    }

    /// Stage every person in `order`, each from its own random stream.
    fn stage(&self, order: &[PersonId], key: &StreamKey) -> Result<Vec<Plan>> {
        order
            .iter()
            .map(|&id| {
                let person = self
                    .people
                    .get(&id)
                    .with_context(|| format!("{id:?} is not alive"))?;
                let mut var = key.stream(id.0);
                self.stage_person(person, &mut var)
            })
            .collect()
    }

    fn stage_person(&self, person: &Person, var: &mut Variates) -> Result<Plan> {
        let cfg = &self.cfg;
        let pos = self
            .index
            .position(person.id)
            .with_context(|| format!("{:?} is not on the grid", person.id))?;
        let mut plan = Plan::new(person.id);

        match person.current() {
            Infected => {
                plan.infects = self.spread(person.id, pos, var);
                if var.chance(cfg.infection_end.end_chance(person.infection_duration)) {
                    if var.chance(cfg.mortality_rate) {
                        plan.dies = true;
                    } else {
                        plan.recovers = true;
                        plan.next = Some(match cfg.immunity {
                            Immunity::None => Susceptible,
                            Immunity::Permanent | Immunity::Waning { .. } => Recovered,
                        });
                    }
                }
            }
            Recovered => {
                if let Immunity::Waning { end } = &cfg.immunity {
                    if var.chance(end.end_chance(person.recovered_duration)) {
                        plan.next = Some(Susceptible);
                    }
                }
            }
            Susceptible => {
                if self.vaccination_started() && var.chance(cfg.general_vaccination_rate) {
                    plan.next = Some(Vaccinated);
                }
            }
            Vaccinated => {}
        }

        plan.destination = cfg.movement.destination(self.index.grid(), pos, var)?;

        if var.chance(per_step(cfg.population_birth_rate, cfg.steps_per_year)) {
            let vaccinated =
                self.vaccination_started() && var.chance(cfg.newborn_vaccination_rate);
            plan.birth = Some(if vaccinated { Vaccinated } else { Susceptible });
        }
        if var.chance(per_step(cfg.population_death_rate, cfg.steps_per_year)) {
            plan.dies = true;
        }

        Ok(plan)
    }

    /// Susceptible people around `pos` that catch the infection from `infector`.
    fn spread(&self, infector: PersonId, pos: Pos, var: &mut Variates) -> Vec<PersonId> {
        let grid = self.index.grid();
        let mut near = self
            .index
            .neighbors(pos, Shape::Moore, self.cfg.infection_radius, true);
        near.sort_unstable_by_key(|&(id, _)| id);
        near.into_iter()
            .filter(|&(id, _)| id != infector)
            .filter(|(id, _)| {
                self.people
                    .get(id)
                    .is_some_and(|person| person.current() == Susceptible)
            })
            .filter(|&(_, cell)| {
                var.chance(self.cfg.infection_kernel.chance(grid.distance_sq(pos, cell)))
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn commit(&mut self, mut plans: Vec<Plan>) -> Result<()> {
        plans.sort_unstable_by_key(|plan| plan.id);
        let exposed: BTreeSet<PersonId> = plans
            .iter()
            .flat_map(|plan| plan.infects.iter().copied())
            .collect();

        let mut births = Vec::new();
        let mut dead = Vec::new();
        for plan in &plans {
            let person = self
                .people
                .get_mut(&plan.id)
                .with_context(|| format!("{:?} was removed before commit", plan.id))?;

            if let Some(dest) = plan.destination {
                self.index.move_to(plan.id, dest)?;
            }
            if let Some(state) = plan.birth {
                let pos = self
                    .index
                    .position(plan.id)
                    .with_context(|| format!("{:?} is not on the grid", plan.id))?;
                births.push((state, pos));
            }
            if plan.dies {
                dead.push(plan.id);
                continue;
            }

            if exposed.contains(&plan.id) {
                person.state.stage(Infected);
            } else if let Some(next) = plan.next {
                person.state.stage(next);
            }
            if plan.recovers {
                self.total_recoveries += 1;
            }
        }

        for person in self.people.values_mut() {
            match person.current() {
                Infected => person.infection_duration += 1,
                Recovered => person.recovered_duration += 1,
                Susceptible | Vaccinated => {}
            }
            if person.state.commit().is_some() {
                match person.current() {
                    Infected => {
                        person.infection_duration = 0;
                        self.total_infections += 1;
                    }
                    Recovered => person.recovered_duration = 0,
                    Susceptible | Vaccinated => {}
                }
            }
        }

        for &id in &dead {
            self.remove_person(id)
                .with_context(|| format!("failed to remove {id:?}"))?;
        }
        self.deaths += dead.len();

        for (state, pos) in births {
            self.add_person(state, pos)?;
        }

        Ok(())
    }
}

impl Simulation for Epidemic {
    fn step(&mut self, var: &mut Variates) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        self.infect_externally(var);

        let key = var.split();
        let order: Vec<_> = self.people.keys().copied().collect();
        let plans = self
            .stage(&order, &key)
            .context("failed to stage transitions")?;
        self.commit(plans).context("failed to commit transitions")?;
        self.step += 1;

        self.running = self.is_active();
        let counts = self.counts();
        log::debug!("{counts:?}");
        if !self.running {
            log::info!("epidemic over after step {}", self.step);
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
        Record::Epidemic(self.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Topology;
    use rules::{Hazard, InfectionKernel, Movement};

    fn config() -> EpidemicConfig {
        EpidemicConfig {
            num_agents: 200,
            initial_infected_chance: 0.2,
            infection_radius: 2,
            infection_kernel: InfectionKernel::Table {
                probs: vec![0.5, 0.3, 0.1],
            },
            infection_end: Hazard::Constant { prob: 0.1 },
            mortality_rate: 0.2,
            immunity: Immunity::Waning {
                end: Hazard::Countdown { steps: 5 },
            },
            vaccination_start: Some(3),
            general_vaccination_rate: 0.05,
            newborn_vaccination_rate: 0.5,
            movement: Movement::Gaussian { mean: 2.0, sd: 1.0 },
            population_birth_rate: 50.0,
            population_death_rate: 30.0,
            steps_per_year: 100,
            external_infection: None,
        }
    }

    fn fingerprint(epi: &Epidemic) -> Vec<(PersonId, InfectionState, Option<Pos>, u32, u32)> {
        epi.people()
            .map(|person| {
                (
                    person.id,
                    person.current(),
                    epi.position(person.id),
                    person.infection_duration,
                    person.recovered_duration,
                )
            })
            .collect()
    }

    #[test]
    fn staging_order_does_not_matter() {
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(42);
        let mut forward = Epidemic::new(config(), grid, &mut var).unwrap();
        let mut reversed = forward.clone();
        let mut shuffled = forward.clone();

        for _ in 0..10 {
            let key = var.split();
            let order: Vec<_> = forward.people.keys().copied().collect();
            let mut rev = order.clone();
            rev.reverse();
            let mut mixed = order.clone();
            var.shuffle(&mut mixed);

            let plans = forward.stage(&order, &key).unwrap();
            forward.commit(plans).unwrap();
            let plans = reversed.stage(&rev, &key).unwrap();
            reversed.commit(plans).unwrap();
            let plans = shuffled.stage(&mixed, &key).unwrap();
            shuffled.commit(plans).unwrap();

            assert_eq!(fingerprint(&forward), fingerprint(&reversed));
            assert_eq!(fingerprint(&forward), fingerprint(&shuffled));
            assert_eq!(forward.counts(), reversed.counts());
            assert_eq!(forward.counts(), shuffled.counts());
        }
    }

    #[test]
    fn stage_reads_only_current_state() {
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(7);
        let epi = Epidemic::new(config(), grid, &mut var).unwrap();
        let before = fingerprint(&epi);
        let key = var.split();
        let order: Vec<_> = epi.people.keys().copied().collect();
        let plans = epi.stage(&order, &key).unwrap();
        assert_eq!(plans.len(), order.len());
        assert_eq!(fingerprint(&epi), before);
    }

    #[test]
    fn commit_rejects_removed_people() {
        let grid = Grid::new(10, 10, Topology::Toroidal);
        let mut var = Variates::seeded(1);
        let mut epi = Epidemic::new(config(), grid, &mut var).unwrap();
        let plans = vec![Plan::new(PersonId(10_000))];
        assert!(epi.commit(plans).is_err());
    }

    #[test]
    fn newborns_are_not_staged_in_their_birth_step() {
        let mut cfg = config();
        cfg.mortality_rate = 0.0;
        cfg.population_birth_rate = 100.0;
        cfg.population_death_rate = 0.0;
        cfg.steps_per_year = 100;
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(3);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();
        let born_before = epi.people.len();

        let key = var.split();
        let order: Vec<_> = epi.people.keys().copied().collect();
        let plans = epi.stage(&order, &key).unwrap();
        epi.commit(plans).unwrap();

        assert_eq!(epi.people.len(), 2 * born_before);
        assert!(
            epi.people()
                .filter(|person| person.id.0 >= born_before as u64)
                .all(|person| person.current() == Susceptible && person.infection_duration == 0)
        );
    }

    #[test]
    fn vaccination_waits_for_campaign_start() {
        let mut cfg = config();
        cfg.initial_infected_chance = 0.0;
        cfg.general_vaccination_rate = 1.0;
        cfg.vaccination_start = Some(2);
        cfg.population_birth_rate = 0.0;
        cfg.population_death_rate = 0.0;
        cfg.external_infection = Some(rules::ExternalInfection {
            chance: 0.0,
            interval: 1,
        });
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(9);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();

        epi.step(&mut var).unwrap();
        epi.step(&mut var).unwrap();
        assert_eq!(epi.counts().vaccinated, 0);
        epi.step(&mut var).unwrap();
        assert_eq!(epi.counts().vaccinated, 200);
    }

    /// Everyone starts infected and every infection ends after one step.
    fn closed_config() -> EpidemicConfig {
        EpidemicConfig {
            initial_infected_chance: 1.0,
            infection_end: Hazard::Countdown { steps: 1 },
            mortality_rate: 0.0,
            immunity: Immunity::Permanent,
            vaccination_start: None,
            population_birth_rate: 0.0,
            population_death_rate: 0.0,
            ..config()
        }
    }

    fn advance(epi: &mut Epidemic, var: &mut Variates) {
        let key = var.split();
        let order: Vec<_> = epi.people.keys().copied().collect();
        let plans = epi.stage(&order, &key).unwrap();
        epi.commit(plans).unwrap();
    }

    #[test]
    fn external_infection_reseeds_susceptibles() {
        let cfg = EpidemicConfig {
            initial_infected_chance: 0.0,
            infection_end: Hazard::Constant { prob: 0.0 },
            external_infection: Some(rules::ExternalInfection {
                chance: 1.0,
                interval: 2,
            }),
            ..closed_config()
        };
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(5);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();
        assert_eq!(epi.counts().infected, 0);
        assert!(epi.running());

        epi.step(&mut var).unwrap();
        let counts = epi.counts();
        assert_eq!(counts.infected, 200);
        assert_eq!(counts.susceptible, 0);
        assert_eq!(counts.total_infections, 200);
        assert!(epi.running());
    }

    #[test]
    fn certain_mortality_kills_without_recoveries() {
        let cfg = EpidemicConfig {
            mortality_rate: 1.0,
            external_infection: Some(rules::ExternalInfection {
                chance: 1.0,
                interval: 1,
            }),
            ..closed_config()
        };
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(6);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();

        epi.step(&mut var).unwrap();
        let counts = epi.counts();
        assert_eq!(counts.deaths, 200);
        assert_eq!(counts.alive, 0);
        assert_eq!(counts.total_recoveries, 0);
        assert!(epi.index.is_empty());
        assert!(!epi.running());
    }

    #[test]
    fn external_infection_stops_once_nobody_can_catch_it() {
        let cfg = EpidemicConfig {
            initial_infected_chance: 0.0,
            vaccination_start: Some(0),
            general_vaccination_rate: 1.0,
            external_infection: Some(rules::ExternalInfection {
                chance: 0.0,
                interval: 1,
            }),
            ..closed_config()
        };
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(8);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();
        assert!(epi.running());

        epi.step(&mut var).unwrap();
        assert_eq!(epi.counts().vaccinated, 200);
        assert!(!epi.running());
    }

    #[test]
    fn recovery_without_immunity_is_susceptible() {
        let cfg = EpidemicConfig {
            immunity: Immunity::None,
            ..closed_config()
        };
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(10);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();

        epi.step(&mut var).unwrap();
        let counts = epi.counts();
        assert_eq!(counts.susceptible, 200);
        assert_eq!(counts.recovered, 0);
        assert_eq!(counts.total_recoveries, 200);
        assert!(!epi.running());
    }

    #[test]
    fn waning_immunity_ends_after_countdown() {
        let cfg = EpidemicConfig {
            immunity: Immunity::Waning {
                end: Hazard::Countdown { steps: 3 },
            },
            ..closed_config()
        };
        let grid = Grid::new(20, 20, Topology::Toroidal);
        let mut var = Variates::seeded(12);
        let mut epi = Epidemic::new(cfg, grid, &mut var).unwrap();

        advance(&mut epi, &mut var);
        assert_eq!(epi.counts().recovered, 200);
        for elapsed in 1..3 {
            advance(&mut epi, &mut var);
            assert_eq!(epi.counts().recovered, 200);
            assert!(epi.people().all(|person| person.recovered_duration == elapsed));
        }
        advance(&mut epi, &mut var);
        assert_eq!(epi.counts().susceptible, 200);
    }
}
