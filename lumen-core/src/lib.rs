//! Core utilities shared by the Lumen crates.

pub mod cli;
pub mod collections;
pub mod log;
