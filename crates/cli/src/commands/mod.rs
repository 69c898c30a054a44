//! CLI Commands

pub mod config;
pub mod data;
pub mod fixture;
pub mod project;
pub mod run;
pub mod session;
