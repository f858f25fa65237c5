//! Stochastic agent-based simulations on a 2-D grid: a spatial epidemic
//! model and Schelling's segregation model.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod epidemic;
pub mod grid;
pub mod manager;
pub mod model;
pub mod random;
pub mod segregation;
pub mod stats;
