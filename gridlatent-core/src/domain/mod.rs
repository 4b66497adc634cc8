//! Domain types
//!
//! Core business entities of the latent worker system.

pub mod job;
pub mod template;
pub mod worker;
