//! Flowbench CLI
//!
//! Command-line front end over the Flowbench project engine.

pub mod commands;
pub mod context;
pub mod output;
