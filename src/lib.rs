//! CASHOUT ORACLE: crash-round safe cashout predictor
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod strategy;
pub mod engine;
pub mod feed;
pub mod backtest;
pub mod signal;
pub mod storage;
pub mod dashboard;
