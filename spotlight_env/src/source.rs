//! Observation source abstraction for the rotation engine.

use async_trait::async_trait;
use crate::error::SourceError;
use crate::types::{CandidateFilter, CandidateRecord, Observation, ObservationId, Relation};

/// Abstraction over the observation data-access layer.
///
/// # Implementations
///
/// - **Production**: Wraps the HTTP observations API
/// - **Simulation**: In-memory catalog with configurable latency/faults
///
/// # Request Flow
///
/// ```text
/// Fetcher                      Source                      Backend
///   |                            |                            |
///   |-- fetch_candidates(f) ---->|-- GET /observations?... -->|
///   |<-- [CandidateRecord] ------|<---------------------------|
///   |                            |                            |
///   |-- fetch_observation(id) -->|-- GET /observations/id --->|
///   |<-- Observation ------------|<---------------------------|
/// ```
#[async_trait]
pub trait ObservationSource: Send + Sync + 'static {
    /// Fetches a batch of unpopulated candidates matching the filter.
    ///
    /// # Arguments
    /// * `filter` - Exclusion filters and batch limit
    ///
    /// # Returns
    /// * `Ok(candidates)` - Possibly empty, at most `filter.limit` long
    /// * `Err(SourceError::Transport)` - The request failed
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateRecord>, SourceError>;

    /// Fetches the fully-populated record for a single observation.
    ///
    /// # Arguments
    /// * `id` - The observation to fetch
    /// * `expand` - Metadata relations to populate
    ///
    /// # Returns
    /// * `Ok(observation)` - The populated record
    /// * `Err(SourceError::NotFound)` - No such observation
    /// * `Err(SourceError::Transport)` - The request failed
    async fn fetch_observation(
        &self,
        id: &ObservationId,
        expand: &[Relation],
    ) -> Result<Observation, SourceError>;
}
