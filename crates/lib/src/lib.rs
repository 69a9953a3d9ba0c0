//! taskforge-lib: build orchestration core
//!
//! This crate loads declarative build definitions and runs them:
//! - `build`: definition files, sub-build inlining, the build catalog
//! - `command`: the command contract, registry and built-in commands
//! - `execute`: the scheduler for sequential steps and parallel batches
//! - `server`: the run state machine, one build at a time
//! - `events`: the broadcast bus every front end listens on
//! - `controller`: text requests (`help`, `status`, `build`, `stop`)
//! - `stats`: statistics of successful runs

pub mod build;
pub mod command;
pub mod config;
pub mod consts;
pub mod controller;
pub mod events;
pub mod execute;
pub mod placeholder;
pub mod platform;
pub mod project;
pub mod server;
pub mod stats;
