//! Flowbench E2E Test Framework
//!
//! Scenario-driven end-to-end tests for the project engine:
//! - Parses declarative YAML scenarios
//! - Builds a sample automation project (data model, data sources,
//!   fixtures, tests and their steps) in a temporary workspace
//! - Runs it through the execution coordinator against offline sessions
//! - Checks the recorded session against the scenario's expectations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scenario Runner (Rust)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner                                             │
//! │    ├── SampleProject::create(spec) -> project + repository  │
//! │    ├── run_sample(sample, spec) -> TestSession              │
//! │    └── check(expect, session) -> pass / fail                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioSpec (YAML)                                        │
//! │    ├── model, data_sources                                  │
//! │    ├── fixtures: [setup/teardown steps, tests: [steps]]     │
//! │    ├── run { select, abort_after }                          │
//! │    └── expect { total, passed, failed, result, order }      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod runner;
pub mod sample;
pub mod scenario;

pub use error::{E2eError, E2eResult};
pub use runner::{run_sample, RunnerConfig, ScenarioResult, ScenarioRunner, SuiteResult};
pub use sample::SampleProject;
pub use scenario::ScenarioSpec;
