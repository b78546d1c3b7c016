//! Spotlight Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Spotlight
//! rotation engine to run in both **Production** (tokio) and **Simulation**
//! (virtual clock) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For Deterministic Simulation Testing (DST), we intercept all I/O:
//! - Time (`now()`, `sleep()`)
//! - Data access (`fetch_candidates()`, `fetch_observation()`)
//! - Randomness (`derive_rng()`)
//!
//! By deriving all entropy from a single 64-bit seed, any rotation sequence
//! becomes reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use spotlight_env::{SpotlightContext, ObservationSource, CandidateFilter};
//!
//! async fn newest<Ctx: SpotlightContext, Src: ObservationSource>(
//!     ctx: &Ctx,
//!     source: &Src,
//! ) {
//!     tokio::select! {
//!         batch = source.fetch_candidates(&CandidateFilter::with_limit(15)) => show(batch),
//!         _ = ctx.sleep(Duration::from_secs(5)) => give_up(),
//!     }
//! }
//! ```

mod context;
mod source;
mod types;
mod error;
mod tokio_impl;

pub use context::SpotlightContext;
pub use source::ObservationSource;
pub use types::{
    CandidateFilter, CandidateRecord, DeploymentId, Location, Observation, ObservationId,
    ObservationResult, PhenomenonTime, Relation, SeriesId, ValueKind,
};
pub use error::SourceError;
pub use tokio_impl::TokioContext;
