//! Backtesting over recorded rounds and offline replay simulation.

pub mod runner;

pub use runner::{summarize, BacktestSummary, SimulationReport, Simulator};
