//! Gridlatent Core
//!
//! Core types shared by the gridlatent crates.
//!
//! This crate contains the domain types that flow between the scheduler
//! client layer and the latent worker controller:
//! - Job identifiers, job states and job control actions
//! - Job templates describing what a submitted job runs
//! - Worker identity and build context handed over by the orchestrator

pub mod domain;
