//! Spotlight Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled environment where the rotation
//! scheduler runs against a simulated observation source on a virtual
//! clock, so hours of rotation can be checked in milliseconds and every
//! run is reproducible from a single seed.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock jumps to the next queued timer or response
//! - **Source**: In-memory catalog with latency, jitter, outages and failures
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ Event queue (virtual time, insertion order)          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ ticks / responses             ▲ commands            │
//! │  ┌────▼──────────────────┐      ┌─────┴──────────────┐      │
//! │  │  RotationScheduler    │─────►│ ObservationFetcher │      │
//! │  └───────────────────────┘      └─────┬──────────────┘      │
//! │                                       │                     │
//! │                                 ┌─────▼─────┐               │
//! │                                 │ SimSource │ ◄── faults    │
//! │                                 └───────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use spotlight_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::PauseResume).await;
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod runner;
mod source;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use error::{load_config, override_countdown, SimError};
pub use exporter::SimExport;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use source::{CatalogSpec, SimSource, SourceController};
pub use world::{SimConfig, SimWorld, TraceEvent, TraceRecord};
